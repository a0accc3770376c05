use super::types::{HookAction, QueryContext, QueryHook, QueryResult, QueryType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Runs several hooks in order.
///
/// `ModifySql` results are chained: each hook sees the SQL the previous one
/// produced. The first `Abort` wins.
#[derive(Default)]
pub struct CompositeHook {
    hooks: Vec<Arc<dyn QueryHook>>,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add<H: QueryHook + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn add_arc(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl QueryHook for CompositeHook {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        let mut current = ctx.clone();
        for hook in &self.hooks {
            match hook.before_query(&current) {
                HookAction::Continue => {}
                HookAction::ModifySql {
                    exec_sql,
                    canonical_sql,
                } => {
                    current.exec_sql = exec_sql;
                    if let Some(canonical_sql) = canonical_sql {
                        current.canonical_sql = canonical_sql;
                    }
                    current.query_type = QueryType::from_sql(&current.canonical_sql);
                }
                action @ HookAction::Abort(_) => return action,
            }
        }

        if current.exec_sql == ctx.exec_sql && current.canonical_sql == ctx.canonical_sql {
            return HookAction::Continue;
        }
        HookAction::ModifySql {
            canonical_sql: (current.canonical_sql != ctx.canonical_sql)
                .then_some(current.canonical_sql),
            exec_sql: current.exec_sql,
        }
    }

    fn after_query(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        for hook in &self.hooks {
            hook.after_query(ctx, duration, result);
        }
    }
}

/// Counts statements, failures and statement cache outcomes.
#[derive(Debug, Default)]
pub struct StatsHook {
    total_queries: AtomicU64,
    failed_queries: AtomicU64,
    total_duration_nanos: AtomicU64,
    select_count: AtomicU64,
    insert_count: AtomicU64,
    update_count: AtomicU64,
    delete_count: AtomicU64,
    max_duration_nanos: AtomicU64,
    slowest_query: Mutex<Option<String>>,
    stmt_cache_hits: AtomicU64,
    stmt_cache_misses: AtomicU64,
    stmt_cache_bypasses: AtomicU64,
}

/// A snapshot of [`StatsHook`] counters.
#[derive(Debug, Clone, Default)]
pub struct QueryStats {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub total_duration: Duration,
    pub select_count: u64,
    pub insert_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub max_duration: Duration,
    /// Canonical SQL of the slowest statement seen.
    pub slowest_query: Option<String>,
    /// Labeled statements served from the statement cache.
    pub stmt_cache_hits: u64,
    /// Labeled statements prepared into the statement cache.
    pub stmt_cache_misses: u64,
    /// Statements prepared per call (unlabeled, cache disabled or in a transaction).
    pub stmt_cache_bypasses: u64,
}

impl StatsHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed)),
            select_count: self.select_count.load(Ordering::Relaxed),
            insert_count: self.insert_count.load(Ordering::Relaxed),
            update_count: self.update_count.load(Ordering::Relaxed),
            delete_count: self.delete_count.load(Ordering::Relaxed),
            max_duration: Duration::from_nanos(self.max_duration_nanos.load(Ordering::Relaxed)),
            slowest_query: self.slowest().clone(),
            stmt_cache_hits: self.stmt_cache_hits.load(Ordering::Relaxed),
            stmt_cache_misses: self.stmt_cache_misses.load(Ordering::Relaxed),
            stmt_cache_bypasses: self.stmt_cache_bypasses.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_queries,
            &self.failed_queries,
            &self.total_duration_nanos,
            &self.select_count,
            &self.insert_count,
            &self.update_count,
            &self.delete_count,
            &self.max_duration_nanos,
            &self.stmt_cache_hits,
            &self.stmt_cache_misses,
            &self.stmt_cache_bypasses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.slowest() = None;
    }

    fn slowest(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.slowest_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueryHook for StatsHook {
    fn after_query(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        let duration_nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        self.total_queries.fetch_add(1, Ordering::Relaxed);
        let prev_total = self
            .total_duration_nanos
            .fetch_add(duration_nanos, Ordering::Relaxed);
        if prev_total.checked_add(duration_nanos).is_none() {
            // Saturate instead of wrapping.
            self.total_duration_nanos.store(u64::MAX, Ordering::Relaxed);
        }

        let by_type = match ctx.query_type {
            QueryType::Select => Some(&self.select_count),
            QueryType::Insert => Some(&self.insert_count),
            QueryType::Update => Some(&self.update_count),
            QueryType::Delete => Some(&self.delete_count),
            QueryType::Other => None,
        };
        if let Some(counter) = by_type {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        match ctx.fields.get("stmt_cache").map(String::as_str) {
            Some("hit") => self.stmt_cache_hits.fetch_add(1, Ordering::Relaxed),
            Some("miss") => self.stmt_cache_misses.fetch_add(1, Ordering::Relaxed),
            Some(_) => self.stmt_cache_bypasses.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };

        if result.is_error() {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }

        let mut current_max = self.max_duration_nanos.load(Ordering::Relaxed);
        while duration_nanos > current_max {
            match self.max_duration_nanos.compare_exchange_weak(
                current_max,
                duration_nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    *self.slowest() = Some(ctx.canonical_sql.clone());
                    break;
                }
                Err(updated) => current_max = updated,
            }
        }
    }
}
