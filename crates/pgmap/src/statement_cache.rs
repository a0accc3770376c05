//! Prepared statements cached by label on the pool's connections.

use crate::error::{OrmError, OrmResult};
use deadpool_postgres::{Client, Pool};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_postgres::Statement;

/// Label map with optional LRU eviction.
#[derive(Debug)]
pub(crate) struct LabelMap<V> {
    capacity: Option<usize>,
    map: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> LabelMap<V> {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn get(&mut self, label: &str) -> Option<V> {
        let value = self.map.get(label).cloned()?;
        self.touch(label);
        Some(value)
    }

    /// Store `value` unless the label is already bound. Returns the bound
    /// value and whatever was evicted to make room.
    pub(crate) fn insert_if_absent(&mut self, label: &str, value: V) -> (V, Vec<V>) {
        if let Some(existing) = self.map.get(label).cloned() {
            self.touch(label);
            return (existing, Vec::new());
        }

        self.map.insert(label.to_string(), value.clone());
        self.order.push_back(label.to_string());
        let evicted = self.evict_if_needed();
        (value, evicted)
    }

    pub(crate) fn remove(&mut self, label: &str) -> Option<V> {
        let removed = self.map.remove(label);
        if removed.is_some() {
            self.order.retain(|l| l != label);
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    fn touch(&mut self, label: &str) {
        if let Some(pos) = self.order.iter().position(|l| l == label)
            && let Some(l) = self.order.remove(pos)
        {
            self.order.push_back(l);
        }
    }

    fn evict_if_needed(&mut self) -> Vec<V> {
        let mut evicted = Vec::new();
        let Some(capacity) = self.capacity else {
            return evicted;
        };
        while self.map.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            evicted.extend(self.map.remove(&oldest));
        }
        evicted
    }
}

/// A statement handed out by the cache.
pub struct CachedStatement {
    pub statement: Statement,
    /// Whether the label was already bound and the connection had the plan.
    pub hit: bool,
}

/// Label to statement-text registry over the pool's per-connection caches.
///
/// Plans live in each pooled connection's own cache, so labeled statements run
/// on whichever connection the pool hands out. A label maps to at most one
/// statement text. When a label loses its text, that text's plan is dropped
/// from every connection of the pool.
#[derive(Debug)]
pub struct StatementCache {
    pool: Pool,
    labels: Mutex<LabelMap<Arc<str>>>,
}

impl StatementCache {
    pub fn new(pool: Pool, capacity: Option<usize>) -> Self {
        Self {
            pool,
            labels: Mutex::new(LabelMap::new(capacity)),
        }
    }

    fn labels(&self) -> std::sync::MutexGuard<'_, LabelMap<Arc<str>>> {
        self.labels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `label` to `sql`. Returns whether it was already bound to that text.
    pub(crate) fn register(&self, label: &str, sql: &str) -> bool {
        let stale = {
            let mut labels = self.labels();
            match labels.get(label) {
                Some(bound) if &*bound == sql => return true,
                previous => {
                    let mut stale: Vec<Arc<str>> = previous.into_iter().collect();
                    labels.remove(label);
                    let (_, evicted) = labels.insert_if_absent(label, Arc::from(sql));
                    stale.extend(evicted);
                    stale
                }
            }
        };
        for sql in &stale {
            self.forget(sql);
        }
        false
    }

    fn forget(&self, sql: &str) {
        self.pool.manager().statement_caches.remove(sql, &[]);
    }

    /// Return the plan for `label` on `client`, preparing it there on a miss.
    pub async fn prepare(
        &self,
        client: &Client,
        label: &str,
        sql: &str,
    ) -> OrmResult<CachedStatement> {
        if label.is_empty() {
            return Err(OrmError::StatementLabelUnset);
        }
        let bound = self.register(label, sql);

        let before = client.statement_cache.size();
        let statement = match client.prepare_cached(sql).await {
            Ok(statement) => statement,
            Err(e) => {
                if !bound {
                    self.labels().remove(label);
                }
                return Err(OrmError::from_db_error(e));
            }
        };
        Ok(CachedStatement {
            statement,
            hit: bound && client.statement_cache.size() == before,
        })
    }

    /// Drop the statement bound to `label` from every connection. The next
    /// `prepare` re-prepares it.
    pub fn invalidate(&self, label: &str) -> bool {
        let removed = self.labels().remove(label);
        let Some(sql) = removed else {
            return false;
        };
        self.forget(&sql);
        tracing::debug!(target: "pgmap", label, "invalidated cached statement");
        true
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels().map.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.labels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every label and every cached plan of the pool.
    pub fn close(&self) {
        self.labels().clear();
        self.pool.manager().statement_caches.clear();
    }
}

/// Whether `err` indicates a prepared plan that no longer matches the schema.
pub(crate) fn is_stale_plan_error(err: &OrmError) -> bool {
    let OrmError::Query(e) = err else {
        return false;
    };
    let Some(db_err) = e.as_db_error() else {
        return false;
    };

    match db_err.code().code() {
        // "cached plan must not change result type" (e.g. after schema change)
        "0A000" => db_err
            .message()
            .to_ascii_lowercase()
            .contains("cached plan must not change result type"),
        // invalid_sql_statement_name
        "26000" => true,
        _ => false,
    }
}
