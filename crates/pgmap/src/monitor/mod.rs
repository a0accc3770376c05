//! Statement hooks: inspect, rewrite, abort, log and count what a
//! [`crate::Connection`] sends to Postgres.
//!
//! ```rust,ignore
//! use pgmap::monitor::{CompositeHook, StatsHook, TracingSqlHook};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(StatsHook::new());
//! let hook = CompositeHook::new()
//!     .add(TracingSqlHook::new())
//!     .add_arc(stats.clone());
//! let conn = pgmap::Connection::new(config).with_hook(hook);
//! ```

mod hooks;
mod tracing_hook;
mod types;


pub use hooks::{CompositeHook, QueryStats, StatsHook};
pub use tracing_hook::TracingSqlHook;
pub use types::{HookAction, QueryContext, QueryHook, QueryResult, QueryType};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
