//! Query builder for table reads.

use rowcloud_engine::{FetchType, Value};

/// Filter, ordering and limit for a table read.
///
/// The filter is raw SQL; bind values with [`Query::bind`] instead of
/// formatting them into the string.
///
/// ```
/// use rowcloud::Query;
/// use rowcloud_engine::FetchType;
///
/// let query = Query::new()
///     .filter("name = ?")
///     .bind("Books")
///     .order("name")
///     .fetch(FetchType::All);
/// assert_eq!(query.where_clause(), " WHERE name = ?");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: String,
    params: Vec<Value>,
    order: String,
    limit: Option<usize>,
    fetch: FetchType,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `Query::new().filter(filter)`.
    pub fn filtered(filter: impl Into<String>) -> Self {
        Self::new().filter(filter)
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Bind the next `?` placeholder of the filter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fetch(mut self, fetch: FetchType) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn fetch_type(&self) -> FetchType {
        self.fetch
    }

    pub fn raw_filter(&self) -> &str {
        &self.filter
    }

    /// `WHERE` clause with the fetch type applied, or empty.
    pub fn where_clause(&self) -> String {
        Self::clause(self.fetch.compose(&self.filter))
    }

    /// `WHERE` clause for an explicit fetch type.
    pub(crate) fn where_clause_for(&self, fetch: FetchType) -> String {
        Self::clause(fetch.compose(&self.filter))
    }

    /// `ORDER BY` and `LIMIT` suffix.
    pub(crate) fn tail(&self) -> String {
        let mut tail = String::new();
        if !self.order.trim().is_empty() {
            tail.push_str(" ORDER BY ");
            tail.push_str(self.order.trim());
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            tail.push_str(&format!(" LIMIT {}", limit));
        }
        tail
    }

    /// `ORDER BY` only.
    pub(crate) fn order_clause(&self) -> String {
        if self.order.trim().is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", self.order.trim())
        }
    }

    fn clause(body: String) -> String {
        if body.is_empty() {
            body
        } else {
            format!(" WHERE {}", body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_hides_deleted_rows() {
        assert_eq!(Query::new().where_clause(), " WHERE isDeleted = 0");
        assert_eq!(Query::new().fetch(FetchType::All).where_clause(), "");
    }

    #[test]
    fn tail_orders_and_limits() {
        let query = Query::new().order("name DESC").limit(5);
        assert_eq!(query.tail(), " ORDER BY name DESC LIMIT 5");
        assert_eq!(Query::new().limit(0).tail(), "");
    }

    #[test]
    fn binds_accumulate_in_order() {
        let query = Query::filtered("a = ? AND b = ?").bind(1i64).bind("x");
        assert_eq!(query.params(), &[Value::Integer(1), Value::Text("x".into())]);
    }
}
