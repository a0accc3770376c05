use super::truncate_sql_bytes;
use super::types::{HookAction, QueryContext, QueryHook, QueryResult};
use std::time::Duration;
use tracing::Level;

/// Emits every statement as a `tracing` event on target `pgmap.sql`.
///
/// The statement is logged before it runs; failures are logged again at
/// `WARN` once they come back.
#[derive(Debug, Clone)]
pub struct TracingSqlHook {
    pub level: Level,
    /// Truncate long SQL (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for TracingSqlHook {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
        }
    }
}

impl TracingSqlHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub(crate) fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

impl QueryHook for TracingSqlHook {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let label = ctx.label.as_deref().unwrap_or("-");
        let fields = tracing::field::debug(&ctx.fields);
        emit_at_level!(
            self.level,
            target: "pgmap.sql",
            query_type = ?ctx.query_type,
            label,
            engine = %ctx.engine,
            param_count = ctx.param_count,
            sql = %self.truncate_sql(&ctx.exec_sql),
            fields = fields,
        );
        HookAction::Continue
    }

    fn after_query(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        if let QueryResult::Error(error) = result {
            tracing::warn!(
                target: "pgmap.sql",
                label = ctx.label.as_deref().unwrap_or("-"),
                ?duration,
                error = %error,
                sql = %self.truncate_sql(&ctx.exec_sql),
                "statement failed",
            );
        }
    }
}
