//! Durable change tokens.

use crate::db::KeyValueStore;
use rowcloud_engine::{token_key, ChangeToken, Scope, ZoneId};
use tracing::debug;

/// Per-scope and per-zone change tokens in the key-value area.
///
/// A missing token means "fetch from the beginning".
#[derive(Debug, Clone)]
pub struct ChangeTokenStore {
    kv: KeyValueStore,
}

impl ChangeTokenStore {
    pub fn new(kv: KeyValueStore) -> Self {
        Self { kv }
    }

    pub fn get(&self, scope: Scope, zone: Option<&ZoneId>) -> Option<ChangeToken> {
        self.kv.get_bytes(&token_key(scope, zone)).map(ChangeToken)
    }

    /// Persist `token`, or forget the stored one when `None`.
    pub fn set(&self, scope: Scope, zone: Option<&ZoneId>, token: Option<&ChangeToken>) -> bool {
        let key = token_key(scope, zone);
        debug!(key = %key, reset = token.is_none(), "storing change token");
        match token {
            Some(token) => self.kv.set_bytes(&key, token.0.clone()),
            None => self.kv.delete(&key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;

    fn tokens() -> ChangeTokenStore {
        let store = LocalStore::open_in_memory().unwrap();
        ChangeTokenStore::new(KeyValueStore::new(store).unwrap())
    }

    #[test]
    fn scope_and_zone_tokens_are_independent() {
        let tokens = tokens();
        let zone = ZoneId::new("tasks-zone");
        tokens.set(Scope::Private, None, Some(&ChangeToken(vec![1])));
        tokens.set(Scope::Private, Some(&zone), Some(&ChangeToken(vec![2])));

        assert_eq!(tokens.get(Scope::Private, None), Some(ChangeToken(vec![1])));
        assert_eq!(tokens.get(Scope::Private, Some(&zone)), Some(ChangeToken(vec![2])));
        assert_eq!(tokens.get(Scope::Shared, Some(&zone)), None);
    }

    #[test]
    fn none_removes_token() {
        let tokens = tokens();
        tokens.set(Scope::Shared, None, Some(&ChangeToken(vec![9, 9])));
        tokens.set(Scope::Shared, None, None);
        assert_eq!(tokens.get(Scope::Shared, None), None);
    }
}
