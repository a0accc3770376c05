//! The connection: pool, statement cache, statement-text buffers and hook.

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::error::{OrmError, OrmResult};
use crate::invocation::{Invocation, Query};
use crate::mapped::DatabaseMapped;
use crate::monitor::QueryHook;
use crate::pool::{parse_config, pool_from_config};
use crate::statement_cache::StatementCache;
use deadpool_postgres::Pool;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_postgres::Transaction;
use tokio_postgres::types::ToSql;

pub(crate) struct OpenState {
    pub(crate) pool: Pool,
    pub(crate) statements: Option<Arc<StatementCache>>,
    pub(crate) database: Option<String>,
    pub(crate) username: Option<String>,
}

/// Entry point for every mapped operation.
///
/// ```rust,ignore
/// let conn = Connection::new(Config::new().dsn("postgres://app@localhost/app"));
/// conn.open().await?;
///
/// let mut user = User { name: "ada".into(), ..Default::default() };
/// conn.create(&mut user).await?;          // sets user.id
/// conn.invoke()
///     .with_timeout(Duration::from_secs(2))
///     .get(&mut user, &[&user_id])
///     .await?;
/// ```
pub struct Connection {
    config: Config,
    state: RwLock<Option<Arc<OpenState>>>,
    opening: tokio::sync::Mutex<()>,
    buffers: BufferPool,
    hook: Option<Arc<dyn QueryHook>>,
}

impl Connection {
    /// A closed connection; call [`Connection::open`] before use.
    pub fn new(config: Config) -> Self {
        Self {
            buffers: BufferPool::new(config.buffer_pool_size),
            config,
            state: RwLock::new(None),
            opening: tokio::sync::Mutex::new(()),
            hook: None,
        }
    }

    /// An open connection over an existing pool.
    pub fn from_pool(pool: Pool, config: Config) -> Self {
        let (database, username) = config
            .dsn_or_none()
            .and_then(|dsn| parse_config(dsn).ok())
            .map(|pg| {
                (
                    pg.get_dbname().map(str::to_string),
                    pg.get_user().map(str::to_string),
                )
            })
            .unwrap_or_default();
        let conn = Self::new(config);
        conn.install(pool, database, username);
        conn
    }

    /// Run `hook` around every statement.
    pub fn with_hook<H: QueryHook + 'static>(self, hook: H) -> Self {
        self.with_hook_arc(Arc::new(hook))
    }

    pub fn with_hook_arc(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Build the pool and check that the database answers.
    ///
    /// Fails with `ConnectionAlreadyOpen` on an open connection and with
    /// `ConfigUnset` when no DSN is configured.
    pub async fn open(&self) -> OrmResult<()> {
        let _opening = self.opening.lock().await;
        if self.is_open() {
            return Err(OrmError::ConnectionAlreadyOpen);
        }
        let dsn = self
            .config
            .dsn_or_none()
            .ok_or_else(|| OrmError::ConfigUnset("dsn".to_string()))?;

        let pg = parse_config(dsn)?;
        let database = pg.get_dbname().map(str::to_string);
        let username = pg.get_user().map(str::to_string);
        let pool = pool_from_config(&self.config)?;

        let client = pool.get().await?;
        let ok: String = client
            .query_one("select 'ok!'", &[])
            .await
            .map_err(OrmError::from_db_error)?
            .try_get(0)?;
        if ok != "ok!" {
            return Err(OrmError::Connection(format!(
                "unexpected sanity check reply {ok:?}"
            )));
        }
        drop(client);

        tracing::info!(
            target: "pgmap",
            database = database.as_deref().unwrap_or("-"),
            engine = %self.config.engine,
            max_connections = self.config.max_connections,
            "connection open"
        );
        self.install(pool, database, username);
        Ok(())
    }

    fn install(&self, pool: Pool, database: Option<String>, username: Option<String>) {
        let statements = self.config.statement_cache.enabled.then(|| {
            Arc::new(StatementCache::new(
                pool.clone(),
                self.config.statement_cache.capacity,
            ))
        });
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(OpenState {
            pool,
            statements,
            database,
            username,
        }));
    }

    /// Drop cached statements and close the pool. Closing a closed connection
    /// is a no-op.
    pub async fn close(&self) {
        let state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(state) = state else {
            return;
        };
        if let Some(statements) = &state.statements {
            statements.close();
        }
        state.pool.close();
        tracing::info!(target: "pgmap", "connection closed");
    }

    pub fn is_open(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn state(&self) -> OrmResult<Arc<OpenState>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(OrmError::ConnectionClosed)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> OrmResult<Pool> {
        Ok(self.state()?.pool.clone())
    }

    /// The label-keyed statement cache.
    pub fn statement_cache(&self) -> OrmResult<Arc<StatementCache>> {
        self.state()?
            .statements
            .clone()
            .ok_or(OrmError::StatementCacheUnset)
    }

    pub(crate) fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub(crate) fn hook(&self) -> Option<&Arc<dyn QueryHook>> {
        self.hook.as_ref()
    }

    /// Start an invocation on the pool.
    pub fn invoke(&self) -> Invocation<'_> {
        Invocation::new(self, None)
    }

    /// Start an invocation inside a caller-owned transaction. Statements are
    /// prepared on the transaction and never cached.
    pub fn invoke_in_tx<'a>(&'a self, tx: &'a Transaction<'a>) -> Invocation<'a> {
        Invocation::new(self, Some(tx))
    }

    // ===== shortcuts =====

    pub async fn get<T: DatabaseMapped>(
        &self,
        obj: &mut T,
        ids: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<bool> {
        self.invoke().get(obj, ids).await
    }

    pub async fn get_all<T: DatabaseMapped + Default>(&self, out: &mut Vec<T>) -> OrmResult<usize> {
        self.invoke().get_all(out).await
    }

    pub async fn create<T: DatabaseMapped>(&self, obj: &mut T) -> OrmResult<()> {
        self.invoke().create(obj).await
    }

    pub async fn create_if_not_exists<T: DatabaseMapped>(&self, obj: &mut T) -> OrmResult<bool> {
        self.invoke().create_if_not_exists(obj).await
    }

    pub async fn create_many<T: DatabaseMapped>(&self, objs: &[T]) -> OrmResult<u64> {
        self.invoke().create_many(objs).await
    }

    pub async fn upsert_many<T: DatabaseMapped>(&self, objs: &[T]) -> OrmResult<u64> {
        self.invoke().upsert_many(objs).await
    }

    pub async fn update<T: DatabaseMapped>(&self, obj: &T) -> OrmResult<bool> {
        self.invoke().update(obj).await
    }

    pub async fn upsert<T: DatabaseMapped>(&self, obj: &mut T) -> OrmResult<()> {
        self.invoke().upsert(obj).await
    }

    pub async fn exists<T: DatabaseMapped>(&self, obj: &T) -> OrmResult<bool> {
        self.invoke().exists(obj).await
    }

    pub async fn delete<T: DatabaseMapped>(&self, obj: &T) -> OrmResult<bool> {
        self.invoke().delete(obj).await
    }

    pub async fn truncate<T: DatabaseMapped>(&self) -> OrmResult<()> {
        self.invoke().truncate::<T>().await
    }

    pub async fn exec(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        self.invoke().exec(sql, params).await
    }

    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Query<'_>> {
        self.invoke().query(sql, params).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &self.config.engine)
            .field("open", &self.is_open())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::User;

    #[tokio::test]
    async fn open_without_dsn_is_config_unset() {
        let conn = Connection::new(Config::new());
        let err = conn.open().await.unwrap_err();
        assert!(err.is_config_unset(), "{err:?}");
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn operations_on_a_closed_connection_fail() {
        let conn = Connection::new(Config::new().dsn("postgres://app@localhost/app"));
        let err = conn.exists(&User::default()).await.unwrap_err();
        assert!(err.is_connection_closed(), "{err:?}");
        assert!(conn.statement_cache().unwrap_err().is_connection_closed());
    }

    #[tokio::test]
    async fn from_pool_is_open_and_cannot_be_reopened() {
        let config = Config::new().dsn("postgres://app@localhost/app");
        let pool = crate::pool::create_pool(config.dsn_or_none().unwrap()).unwrap();
        let conn = Connection::from_pool(pool, config);
        assert!(conn.is_open());
        assert!(conn.statement_cache().unwrap().is_empty());

        let err = conn.open().await.unwrap_err();
        assert!(err.is_connection_already_open(), "{err:?}");

        conn.close().await;
        assert!(!conn.is_open());
        conn.close().await;
    }

    #[tokio::test]
    async fn disabled_statement_cache_is_unset() {
        let config = Config::new()
            .dsn("postgres://app@localhost/app")
            .no_statement_cache();
        let pool = crate::pool::create_pool(config.dsn_or_none().unwrap()).unwrap();
        let conn = Connection::from_pool(pool, config);
        let err = conn.statement_cache().unwrap_err();
        assert!(err.is_statement_cache_unset(), "{err:?}");
    }
}
