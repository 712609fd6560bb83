//! Unified error handling for the client.

use rowcloud_engine::CloudError;

/// Local store and schema errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] rowcloud_engine::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("statement expects {expected} parameter(s), got {got}")]
    ParameterCount { expected: usize, got: usize },

    #[error("database is closed")]
    Closed,

    #[error("database worker has stopped")]
    WorkerGone,

    #[error("{matches} tables match '{table}', expected exactly one")]
    SchemaIntegrity { table: String, matches: usize },

    #[error("could not create table '{0}'")]
    TableCreation(String),

    #[error("could not add column '{column}' to '{table}'")]
    Migration { table: String, column: String },

    #[error("local write failed for {0}")]
    LocalWrite(String),
}

/// Remote sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] CloudError),

    #[error("Local error: {0}")]
    Local(#[from] Error),

    #[error("no async runtime available for background sync")]
    NoRuntime,
}

impl From<rowcloud_engine::Error> for SyncError {
    fn from(err: rowcloud_engine::Error) -> Self {
        SyncError::Local(Error::Engine(err))
    }
}

impl SyncError {
    /// The remote error, if this is one.
    pub fn remote(&self) -> Option<&CloudError> {
        match self {
            SyncError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for local operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for remote operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
