//! Error types for pgmap

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pgmap operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for mapping and database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// The connection was opened without a usable configuration (no DSN).
    #[error("config unset: {0}")]
    ConfigUnset(String),

    /// `Connection::open` was called on an already open connection.
    #[error("connection already open")]
    ConnectionAlreadyOpen,

    /// The connection is closed or was never opened.
    #[error("connection closed")]
    ConnectionClosed,

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// The statement cache is unavailable on this connection.
    #[error("statement cache unset")]
    StatementCacheUnset,

    /// A cached statement was requested with an empty label.
    #[error("statement label unset")]
    StatementLabelUnset,

    /// The mapped type has no `pk` column.
    #[error("no primary key on type `{0}`")]
    NoPrimaryKey(String),

    /// `get` was called with no ids, or with a count that does not match the key.
    #[error("invalid ids: {0}")]
    InvalidIds(String),

    /// The destination type maps no columns.
    #[error("destination is not a mapped struct: `{0}`")]
    DestinationNotStruct(String),

    /// A column path did not address a settable field.
    #[error("field unsettable: {0}")]
    FieldUnsettable(String),

    /// A statement that must touch at most one row touched more.
    #[error("too many rows: {0}")]
    TooManyRows(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// The invocation's cancel signal fired before the query completed.
    #[error("query cancelled")]
    Cancelled,

    /// A panic raised while populating rows or inside a row consumer.
    ///
    /// `prior` holds the error that was already in flight, if any.
    #[error("panic recovered: {message}")]
    Panic {
        message: String,
        prior: Option<Box<OrmError>>,
    },

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn field_unsettable(message: impl Into<String>) -> Self {
        Self::FieldUnsettable(message.into())
    }

    pub fn too_many_rows(message: impl Into<String>) -> Self {
        Self::TooManyRows(message.into())
    }

    /// Build a panic error from a caught payload, keeping any error already in flight.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>, prior: Option<OrmError>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panic {
            message,
            prior: prior.map(Box::new),
        }
    }

    pub fn is_config_unset(&self) -> bool {
        matches!(self, Self::ConfigUnset(_))
    }

    pub fn is_connection_already_open(&self) -> bool {
        matches!(self, Self::ConnectionAlreadyOpen)
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    pub fn is_statement_cache_unset(&self) -> bool {
        matches!(self, Self::StatementCacheUnset)
    }

    pub fn is_statement_label_unset(&self) -> bool {
        matches!(self, Self::StatementLabelUnset)
    }

    /// Check if this is a no primary key error
    pub fn is_no_primary_key(&self) -> bool {
        matches!(self, Self::NoPrimaryKey(_))
    }

    pub fn is_invalid_ids(&self) -> bool {
        matches!(self, Self::InvalidIds(_))
    }

    pub fn is_destination_not_struct(&self) -> bool {
        matches!(self, Self::DestinationNotStruct(_))
    }

    pub fn is_field_unsettable(&self) -> bool {
        matches!(self, Self::FieldUnsettable(_))
    }

    pub fn is_too_many_rows(&self) -> bool {
        matches!(self, Self::TooManyRows(_))
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::ForeignKeyViolation(_))
    }

    pub fn is_check_violation(&self) -> bool {
        matches!(self, Self::CheckViolation(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_pool(&self) -> bool {
        matches!(self, Self::Pool(_))
    }

    /// Driver error not classified into a more specific kind.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    pub fn is_other(&self) -> bool {
        matches!(self, Self::Other(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic { .. })
    }

    /// The SQLSTATE code reported by the server, when this error carries one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query(e) => e.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        Self::Query(err)
    }
}

impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
