use std::time::Duration;

pub const DEFAULT_ENGINE: &str = "postgres";
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 32;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string (`postgres://...` or key/value form).
    pub dsn: Option<String>,
    /// Dialect name reported to hooks.
    pub engine: String,
    /// Pool size.
    pub max_connections: usize,
    /// Prepared statement cache configuration.
    pub statement_cache: StatementCacheConfig,
    /// Idle buffers kept for building statement text.
    pub buffer_pool_size: usize,
    /// Default timeout applied to every invocation.
    pub query_timeout: Option<Duration>,
}

/// Prepared statement cache configuration.
#[derive(Debug, Clone)]
pub struct StatementCacheConfig {
    pub enabled: bool,
    /// Maximum number of labels kept; `None` keeps every label.
    pub capacity: Option<usize>,
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dsn: None,
            engine: DEFAULT_ENGINE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            statement_cache: StatementCacheConfig::default(),
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            query_timeout: None,
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Bound the statement cache to `capacity` labels (LRU).
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache.enabled = true;
        self.statement_cache.capacity = Some(capacity);
        self
    }

    /// Disable the statement cache; every statement is prepared per call.
    pub fn no_statement_cache(mut self) -> Self {
        self.statement_cache.enabled = false;
        self
    }

    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Set query timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// The configured DSN, if present and non-blank.
    pub fn dsn_or_none(&self) -> Option<&str> {
        self.dsn.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.dsn, None);
        assert_eq!(config.engine, "postgres");
        assert_eq!(config.max_connections, 16);
        assert!(config.statement_cache.enabled);
        assert_eq!(config.statement_cache.capacity, None);
        assert_eq!(config.query_timeout, None);
    }

    #[test]
    fn builder() {
        let config = Config::new()
            .dsn("postgres://localhost/app")
            .max_connections(4)
            .statement_cache_capacity(64)
            .timeout(Duration::from_secs(30));
        assert_eq!(config.dsn_or_none(), Some("postgres://localhost/app"));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.statement_cache.capacity, Some(64));
        assert_eq!(config.query_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn blank_dsn_counts_as_unset() {
        assert_eq!(Config::new().dsn("  ").dsn_or_none(), None);
        assert!(!Config::new().no_statement_cache().statement_cache.enabled);
    }
}
