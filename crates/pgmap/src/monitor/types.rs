use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The kind of statement being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// DDL, TRUNCATE and anything unrecognised.
    Other,
}

impl QueryType {
    /// Classify a statement by its leading keyword, skipping whitespace,
    /// comments and opening parentheses.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = strip_sql_prefix(sql);
        if starts_with_keyword(trimmed, "SELECT") || starts_with_keyword(trimmed, "WITH") {
            QueryType::Select
        } else if starts_with_keyword(trimmed, "INSERT") {
            QueryType::Insert
        } else if starts_with_keyword(trimmed, "UPDATE") {
            QueryType::Update
        } else if starts_with_keyword(trimmed, "DELETE") {
            QueryType::Delete
        } else {
            QueryType::Other
        }
    }
}

fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            match rest.find('\n') {
                Some(pos) => s = &rest[pos + 1..],
                None => return "",
            }
        } else if let Some(rest) = s.strip_prefix("/*") {
            match rest.find("*/") {
                Some(pos) => s = &rest[pos + 2..],
                None => return "",
            }
        } else if let Some(rest) = s.strip_prefix('(') {
            s = rest;
        } else {
            return s;
        }
    }
}

fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    s.get(0..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
}

/// What a hook sees about the statement being executed.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Statement text as generated (or as handed to `exec`/`query`).
    pub canonical_sql: String,
    /// Statement text actually sent to Postgres.
    pub exec_sql: String,
    pub param_count: usize,
    pub query_type: QueryType,
    /// Prepared statement label, when the invocation has one.
    pub label: Option<String>,
    /// Dialect name from [`crate::Config::engine`].
    pub engine: String,
    pub database: Option<String>,
    pub username: Option<String>,
    /// Low-cardinality structured fields (`stmt_cache`, `table`, ...).
    pub fields: BTreeMap<String, String>,
}

impl QueryContext {
    pub fn new(sql: &str, param_count: usize) -> Self {
        Self {
            canonical_sql: sql.to_string(),
            exec_sql: sql.to_string(),
            param_count,
            query_type: QueryType::from_sql(sql),
            label: None,
            engine: crate::config::DEFAULT_ENGINE.to_string(),
            database: None,
            username: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn with_database(mut self, database: Option<String>, username: Option<String>) -> Self {
        self.database = database;
        self.username = username;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Maximum length for error messages in `QueryResult::Error`.
const MAX_ERROR_LEN: usize = 512;

/// Outcome of a statement, as reported to [`QueryHook::after_query`].
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Rows consumed by the caller.
    Rows(usize),
    /// Rows affected by a mutation.
    Affected(u64),
    /// Failure text, truncated to 512 bytes.
    Error(String),
}

impl QueryResult {
    pub fn error(msg: String) -> Self {
        if msg.len() <= MAX_ERROR_LEN {
            return Self::Error(msg);
        }
        Self::Error(format!(
            "{}...",
            super::truncate_sql_bytes(&msg, MAX_ERROR_LEN)
        ))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryResult::Error(_))
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows(n) => write!(f, "{n} rows"),
            QueryResult::Affected(n) => write!(f, "{n} affected"),
            QueryResult::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Action to take after a hook inspects a statement.
#[derive(Debug, Clone)]
pub enum HookAction {
    /// Run the statement unchanged.
    Continue,
    /// Run different SQL.
    ModifySql {
        /// SQL to execute against Postgres.
        exec_sql: String,
        /// Optional override for the canonical SQL.
        canonical_sql: Option<String>,
    },
    /// Fail the invocation without touching the database.
    Abort(String),
}

/// Callbacks around every statement a [`crate::Connection`] executes.
///
/// Hooks can inspect, modify or abort statements before they run.
pub trait QueryHook: Send + Sync {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        let _ = ctx;
        HookAction::Continue
    }

    /// Called once the statement finished, successfully or not.
    fn after_query(&self, _ctx: &QueryContext, _duration: Duration, _result: &QueryResult) {}
}
