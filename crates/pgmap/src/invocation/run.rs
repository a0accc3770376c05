use super::cancel::CancelSignal;
use crate::client::{GenericClient, RowStream};
use crate::connection::{Connection, OpenState};
use crate::error::{OrmError, OrmResult};
use crate::mapped::{DatabaseMapped, RowScanner};
use crate::monitor::{HookAction, QueryContext, QueryHook, QueryResult, QueryType};
use crate::populate::populate;
use crate::statement_cache::{StatementCache, is_stale_plan_error};
use futures_util::TryStreamExt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_postgres::types::{FromSqlOwned, ToSql};
use tokio_postgres::{CancelToken, NoTls, Row, Statement, Transaction};

type FinishFn<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Runs the caller's completion callback once, on drop.
#[derive(Default)]
pub(crate) struct FinishGuard<'a>(Mutex<Option<FinishFn<'a>>>);

impl<'a> FinishGuard<'a> {
    pub(crate) fn new(callback: impl FnOnce() + Send + 'a) -> Self {
        Self(Mutex::new(Some(Box::new(callback))))
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        let callback = self
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Deadline and cancellation signal of one invocation.
#[derive(Clone, Default)]
pub(crate) struct Limits {
    deadline: Option<(Instant, Duration)>,
    cancel: Option<CancelSignal>,
}

impl Limits {
    pub(crate) fn new(timeout: Option<Duration>, cancel: Option<CancelSignal>) -> Self {
        Self {
            deadline: timeout.map(|t| (Instant::now() + t, t)),
            cancel,
        }
    }

    /// Drive `fut` unless the deadline passes or the signal fires first. In
    /// that case `fut` is dropped and, when a token is known, the running
    /// statement is cancelled server-side.
    pub(crate) async fn guard<T, F>(&self, token: Option<&CancelToken>, fut: F) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>>,
    {
        if self.deadline.is_none() && self.cancel.is_none() {
            return fut.await;
        }
        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(OrmError::Cancelled);
        }

        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            result = fut => result,
            timeout = expired(self.deadline) => {
                cancel_server_side(token);
                Err(OrmError::Timeout(timeout))
            }
            () = fired(cancel.as_mut()) => {
                cancel_server_side(token);
                Err(OrmError::Cancelled)
            }
        }
    }
}

async fn expired(deadline: Option<(Instant, Duration)>) -> Duration {
    match deadline {
        Some((at, timeout)) => {
            tokio::time::sleep_until(at).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

async fn fired(signal: Option<&mut CancelSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

fn cancel_server_side(token: Option<&CancelToken>) {
    if let Some(token) = token.cloned() {
        tokio::spawn(async move {
            let _ = token.cancel_query(NoTls).await;
        });
    }
}

/// Where a prepared statement lives.
pub(crate) enum Target<'a> {
    Tx(&'a Transaction<'a>),
    Pooled(deadpool_postgres::Client),
}

impl Target<'_> {
    async fn execute(&self, stmt: &Statement, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        match self {
            Target::Tx(tx) => GenericClient::execute_prepared(*tx, stmt, params).await,
            Target::Pooled(client) => GenericClient::execute_prepared(client, stmt, params).await,
        }
    }

    async fn query(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        match self {
            Target::Tx(tx) => GenericClient::query_prepared(*tx, stmt, params).await,
            Target::Pooled(client) => GenericClient::query_prepared(client, stmt, params).await,
        }
    }

    fn cancel_token(&self) -> CancelToken {
        match self {
            Target::Tx(tx) => GenericClient::cancel_token(*tx),
            Target::Pooled(client) => GenericClient::cancel_token(client),
        }
    }
}

/// Bookkeeping of one statement from hook to completion.
pub(crate) struct Run<'a> {
    ctx: QueryContext,
    hook: Option<Arc<dyn QueryHook>>,
    started: std::time::Instant,
    limits: Limits,
    cached: Option<(Arc<StatementCache>, String)>,
    _finish: FinishGuard<'a>,
}

impl Run<'_> {
    /// Report the outcome to the hook and drop a stale cached plan. Consuming
    /// `self` fires the completion callback afterwards.
    fn report<T>(self, result: &OrmResult<T>, summary: impl FnOnce(&T) -> QueryResult) {
        match result {
            Ok(value) => self.complete(summary(value)),
            Err(e) => self.fail(e),
        }
    }

    fn fail(self, err: &OrmError) {
        if let Some((cache, label)) = &self.cached
            && is_stale_plan_error(err)
        {
            cache.invalidate(label);
        }
        let outcome = match err {
            OrmError::Timeout(d) => QueryResult::Error(format!("timeout after {d:?}")),
            e => QueryResult::error(e.to_string()),
        };
        self.complete(outcome);
    }

    fn complete(self, outcome: QueryResult) {
        if let Some(hook) = &self.hook {
            hook.after_query(&self.ctx, self.started.elapsed(), &outcome);
        }
    }
}

/// A prepared statement ready to run.
pub(crate) struct Begun<'a> {
    target: Target<'a>,
    statement: Statement,
    run: Run<'a>,
}

pub(crate) async fn begin<'a>(
    conn: &'a Connection,
    tx: Option<&'a Transaction<'a>>,
    label: Option<String>,
    sql: &str,
    param_count: usize,
    limits: Limits,
    finish: FinishGuard<'a>,
) -> OrmResult<Begun<'a>> {
    let state = match tx {
        Some(_) => conn.state().ok(),
        None => Some(conn.state()?),
    };

    let mut ctx = QueryContext::new(sql, param_count)
        .with_engine(conn.config().engine.as_str())
        .with_database(
            state.as_ref().and_then(|s| s.database.clone()),
            state.as_ref().and_then(|s| s.username.clone()),
        );
    if let Some(label) = &label {
        ctx = ctx.with_label(label.as_str());
    }

    let hook = conn.hook().cloned();
    if let Some(hook) = &hook {
        match hook.before_query(&ctx) {
            HookAction::Continue => {}
            HookAction::ModifySql {
                exec_sql,
                canonical_sql,
            } => {
                ctx.exec_sql = exec_sql;
                if let Some(canonical_sql) = canonical_sql {
                    ctx.canonical_sql = canonical_sql;
                }
                ctx.query_type = QueryType::from_sql(&ctx.canonical_sql);
            }
            HookAction::Abort(reason) => {
                return Err(OrmError::validation(format!(
                    "query aborted by hook: {reason}"
                )));
            }
        }
    }

    let started = std::time::Instant::now();
    let prepared = limits
        .guard(
            None,
            prepare(tx, state.as_deref(), label.as_deref(), &ctx.exec_sql),
        )
        .await;
    let (target, statement, cached, cache_use) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            let run = Run {
                ctx,
                hook,
                started,
                limits,
                cached: None,
                _finish: finish,
            };
            run.fail(&e);
            return Err(e);
        }
    };
    ctx.fields.insert("stmt_cache".to_string(), cache_use.to_string());

    Ok(Begun {
        target,
        statement,
        run: Run {
            ctx,
            hook,
            started,
            limits,
            cached,
            _finish: finish,
        },
    })
}

type Prepared<'a> = (
    Target<'a>,
    Statement,
    Option<(Arc<StatementCache>, String)>,
    &'static str,
);

async fn prepare<'a>(
    tx: Option<&'a Transaction<'a>>,
    state: Option<&OpenState>,
    label: Option<&str>,
    sql: &str,
) -> OrmResult<Prepared<'a>> {
    if let Some(tx) = tx {
        let statement = GenericClient::prepare_statement(tx, sql).await?;
        return Ok((Target::Tx(tx), statement, None, "tx"));
    }
    let state = state.ok_or(OrmError::ConnectionClosed)?;

    let client = state.pool.get().await?;
    if let (Some(label), Some(cache)) = (label, &state.statements) {
        let cached = cache.prepare(&client, label, sql).await?;
        let outcome = if cached.hit { "hit" } else { "miss" };
        return Ok((
            Target::Pooled(client),
            cached.statement,
            Some((Arc::clone(cache), label.to_string())),
            outcome,
        ));
    }

    let statement = GenericClient::prepare_statement(&client, sql).await?;
    Ok((Target::Pooled(client), statement, None, "bypass"))
}

impl<'a> Begun<'a> {
    pub(crate) async fn execute(self, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        let Begun {
            target,
            statement,
            run,
        } = self;
        let token = target.cancel_token();
        let result = run
            .limits
            .guard(Some(&token), target.execute(&statement, params))
            .await;
        run.report(&result, |n| QueryResult::Affected(*n));
        result
    }

    pub(crate) async fn query(self, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Query<'a>> {
        let Begun {
            target,
            statement,
            run,
        } = self;
        let token = target.cancel_token();
        let result = run
            .limits
            .guard(Some(&token), target.query(&statement, params))
            .await;
        match result {
            Ok(rows) => Ok(Query {
                rows,
                _target: target,
                token,
                run,
            }),
            Err(e) => {
                run.fail(&e);
                Err(e)
            }
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// A cursor over the rows of one statement.
///
/// Every terminal operation consumes the query, closes the cursor on all
/// paths and converts a panic in row population or a consumer into
/// [`OrmError::Panic`].
#[must_use = "a query does nothing until a terminal operation runs"]
pub struct Query<'a> {
    rows: RowStream,
    // Keeps the pooled client checked out while rows stream.
    _target: Target<'a>,
    token: CancelToken,
    run: Run<'a>,
}

impl Query<'_> {
    async fn consume<F>(self, mut on_row: F) -> OrmResult<usize>
    where
        F: FnMut(usize, Row) -> OrmResult<Flow>,
    {
        let Query {
            mut rows,
            _target,
            token,
            run,
        } = self;

        let mut seen = 0_usize;
        let outcome = run
            .limits
            .guard(Some(&token), async {
                while let Some(row) = rows.try_next().await? {
                    let idx = seen;
                    seen += 1;
                    let flow = catch_unwind(AssertUnwindSafe(|| on_row(idx, row)))
                        .unwrap_or_else(|payload| Err(OrmError::from_panic(payload, None)))?;
                    if let Flow::Stop = flow {
                        break;
                    }
                }
                Ok::<(), OrmError>(())
            })
            .await;
        drop(rows);
        let result = outcome.map(|()| seen);
        run.report(&result, |n| QueryResult::Rows(*n));
        result
    }

    /// Whether the statement returned any row.
    pub async fn any(self) -> OrmResult<bool> {
        let seen = self.consume(|_, _| Ok(Flow::Stop)).await?;
        Ok(seen > 0)
    }

    /// Whether the statement returned no rows.
    pub async fn none(self) -> OrmResult<bool> {
        self.any().await.map(|found| !found)
    }

    /// Decode the first row into `targets`, one target per column. Returns
    /// whether there was a row; a second row is `TooManyRows`.
    pub async fn scan<S: ScanTargets>(self, targets: S) -> OrmResult<bool> {
        let mut targets = Some(targets);
        let seen = self
            .consume(|idx, row| match idx {
                0 => {
                    if let Some(targets) = targets.take() {
                        targets.scan_from(&row)?;
                    }
                    Ok(Flow::Continue)
                }
                _ => Err(OrmError::too_many_rows("scan expected at most one row")),
            })
            .await?;
        Ok(seen > 0)
    }

    /// Populate `obj` from the first row. Returns whether there was a row; a
    /// second row is `TooManyRows`, with `obj` already populated.
    pub async fn out<T: DatabaseMapped>(self, obj: &mut T) -> OrmResult<bool> {
        self.out_with(obj, |obj, row| populate(obj, row)).await
    }

    /// Append one populated `T` per row to `out`. Returns the number of rows.
    pub async fn out_many<T: DatabaseMapped + Default>(self, out: &mut Vec<T>) -> OrmResult<usize> {
        self.out_many_with(out, |obj, row| populate(obj, row)).await
    }

    /// Call `consumer` for every row. Returns the number of rows.
    pub async fn each<F>(self, mut consumer: F) -> OrmResult<usize>
    where
        F: FnMut(&Row) -> OrmResult<()>,
    {
        self.consume(|_, row| consumer(&row).map(|()| Flow::Continue))
            .await
    }

    /// Call `consumer` for the first row only. Returns whether there was one.
    pub async fn first<F>(self, consumer: F) -> OrmResult<bool>
    where
        F: FnOnce(&Row) -> OrmResult<()>,
    {
        let mut consumer = Some(consumer);
        let seen = self
            .consume(|_, row| {
                if let Some(consumer) = consumer.take() {
                    consumer(&row)?;
                }
                Ok(Flow::Stop)
            })
            .await?;
        Ok(seen > 0)
    }

    /// Collect the raw rows.
    pub async fn rows(self) -> OrmResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.consume(|_, row| {
            rows.push(row);
            Ok(Flow::Continue)
        })
        .await?;
        Ok(rows)
    }

    pub(crate) async fn out_with<T, F>(self, obj: &mut T, mut fill: F) -> OrmResult<bool>
    where
        F: FnMut(&mut T, &Row) -> OrmResult<()>,
    {
        let table = std::any::type_name::<T>();
        let seen = self
            .consume(|idx, row| match idx {
                0 => fill(obj, &row).map(|()| Flow::Continue),
                _ => Err(OrmError::too_many_rows(format!(
                    "expected at most one row for `{table}`"
                ))),
            })
            .await?;
        Ok(seen > 0)
    }

    pub(crate) async fn out_many_with<T, F>(self, out: &mut Vec<T>, mut fill: F) -> OrmResult<usize>
    where
        T: Default,
        F: FnMut(&mut T, &Row) -> OrmResult<()>,
    {
        self.consume(|_, row| {
            let mut obj = T::default();
            fill(&mut obj, &row)?;
            out.push(obj);
            Ok(Flow::Continue)
        })
        .await
    }
}

/// Destinations for [`Query::scan`]: `&mut T` or a tuple of them.
pub trait ScanTargets {
    fn scan_from<R: RowScanner + ?Sized>(self, row: &R) -> OrmResult<()>;
}

impl<A: FromSqlOwned> ScanTargets for &mut A {
    fn scan_from<R: RowScanner + ?Sized>(self, row: &R) -> OrmResult<()> {
        *self = row.scan(0)?;
        Ok(())
    }
}

macro_rules! impl_scan_targets {
    ($($name:ident: $idx:tt),+) => {
        impl<$($name: FromSqlOwned),+> ScanTargets for ($(&mut $name,)+) {
            fn scan_from<R: RowScanner + ?Sized>(self, row: &R) -> OrmResult<()> {
                $(*self.$idx = row.scan($idx)?;)+
                Ok(())
            }
        }
    };
}

impl_scan_targets!(A: 0);
impl_scan_targets!(A: 0, B: 1);
impl_scan_targets!(A: 0, B: 1, C: 2);
impl_scan_targets!(A: 0, B: 1, C: 2, D: 3);
impl_scan_targets!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_scan_targets!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_scan_targets!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_scan_targets!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_postgres::types::Type;

    #[test]
    fn finish_guard_fires_once_on_drop() {
        let calls = AtomicUsize::new(0);
        {
            let _guard = FinishGuard::new(|| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(FinishGuard::default());
    }

    #[tokio::test]
    async fn guard_without_limits_just_awaits() {
        let limits = Limits::default();
        let value = limits.guard(None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn guard_times_out() {
        let limits = Limits::new(Some(Duration::from_millis(10)), None);
        let err = limits
            .guard(None, std::future::pending::<OrmResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Timeout(d) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn guard_observes_cancellation() {
        let handle = super::super::CancelHandle::new();
        let limits = Limits::new(None, Some(handle.signal()));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(
            limits.guard(None, std::future::pending::<OrmResult<()>>()),
            cancel
        );
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn guard_rejects_already_cancelled_signals() {
        let handle = super::super::CancelHandle::new();
        handle.cancel();
        let limits = Limits::new(Some(Duration::from_secs(5)), Some(handle.signal()));
        let err = limits.guard(None, async { Ok(()) }).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn scan_targets_fill_in_column_order() {
        let row = FakeRow::new()
            .with("n", Type::INT4, &5_i32)
            .with("s", Type::TEXT, &"five".to_string())
            .null("o", Type::INT8);
        let (mut n, mut s, mut o) = (0_i32, String::new(), Some(1_i64));
        (&mut n, &mut s, &mut o).scan_from(&row).unwrap();
        assert_eq!((n, s.as_str(), o), (5, "five", None));

        let mut single = 0_i32;
        (&mut single).scan_from(&row).unwrap();
        assert_eq!(single, 5);
    }

    #[test]
    fn scan_targets_report_missing_columns() {
        let row = FakeRow::new().with("n", Type::INT4, &5_i32);
        let (mut a, mut b) = (0_i32, 0_i32);
        let err = (&mut a, &mut b).scan_from(&row).unwrap_err();
        assert!(err.is_decode(), "{err:?}");
    }
}
