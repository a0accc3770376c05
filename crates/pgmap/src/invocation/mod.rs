//! One mapped operation against a [`Connection`].
//!
//! An `Invocation` resolves the target type's columns, writes the statement
//! text into a pooled buffer, prepares it (through the statement cache when the
//! statement is labeled and no transaction is involved), executes it and maps
//! rows back. Every operation consumes the invocation.

mod cancel;
mod generate;
mod run;

#[cfg(test)]
mod tests;

pub use cancel::{CancelHandle, CancelSignal};
pub use generate::{make_where_clause, param_tokens};
pub use run::{Query, ScanTargets};

use crate::column_collection::ColumnCollection;
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::mapped::{ColumnValue, DatabaseMapped, params};
use crate::populate::{mapped_columns, populate_generated, populate_in_order};
use generate::Conflict;
use run::{FinishGuard, Limits};
use std::time::Duration;
use tokio_postgres::Transaction;
use tokio_postgres::types::ToSql;

/// Postgres binds at most this many parameters per statement.
const MAX_PARAMS: usize = u16::MAX as usize;

/// A single logical operation bound to a connection and, optionally, a
/// caller-owned transaction.
///
/// Invocations sharing one transaction must not run concurrently.
pub struct Invocation<'a> {
    conn: &'a Connection,
    tx: Option<&'a Transaction<'a>>,
    label: Option<String>,
    timeout: Option<Duration>,
    cancel: Option<CancelSignal>,
    finish: FinishGuard<'a>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(conn: &'a Connection, tx: Option<&'a Transaction<'a>>) -> Self {
        Self {
            conn,
            tx,
            label: None,
            timeout: None,
            cancel: None,
            finish: FinishGuard::default(),
        }
    }

    /// Statement label for the statement cache, replacing the default
    /// `"{table}_{operation}"`.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Fail with `Timeout` when the operation takes longer than `timeout`.
    /// Overrides [`crate::Config::query_timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail with `Cancelled` when `signal` fires.
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Run `callback` exactly once when the operation completes, whatever the
    /// outcome. For [`Invocation::query`] that is when the returned [`Query`]
    /// is consumed or dropped.
    pub fn on_finish(mut self, callback: impl FnOnce() + Send + 'a) -> Self {
        self.finish = FinishGuard::new(callback);
        self
    }

    /// Load the row with primary key values `ids` into `obj`.
    ///
    /// Returns whether a row was found.
    pub async fn get<T: DatabaseMapped>(
        self,
        obj: &mut T,
        ids: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<bool> {
        let cols = mapped_columns::<T>()?;
        let select = cols.not_read_only();
        let pks = select.primary_keys();
        if pks.is_empty() {
            return Err(no_primary_key::<T>());
        }
        if ids.len() != pks.len() {
            return Err(OrmError::InvalidIds(format!(
                "`{}` has {} primary key column(s), got {} value(s)",
                T::table_name(),
                pks.len(),
                ids.len()
            )));
        }

        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::select_by_keys(&mut sql, T::table_name(), select, pks);
        let query = self
            .open_query(default_label::<T>("get"), &sql, ids)
            .await?;
        query
            .out_with(obj, |obj, row| populate_generated(obj, select, row))
            .await
    }

    /// Append every row of `T`'s table to `out`. Returns the number of rows
    /// appended.
    pub async fn get_all<T: DatabaseMapped + Default>(self, out: &mut Vec<T>) -> OrmResult<usize> {
        let cols = mapped_columns::<T>()?;
        let select = cols.not_read_only();

        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::select_all(&mut sql, T::table_name(), select);
        let query = self
            .open_query(default_label::<T>("get_all"), &sql, &[])
            .await?;
        query
            .out_many_with(out, |obj, row| populate_generated(obj, select, row))
            .await
    }

    /// Insert `obj`. Auto columns are left to the database and read back into
    /// `obj`.
    pub async fn create<T: DatabaseMapped>(self, obj: &mut T) -> OrmResult<()> {
        let cols = mapped_columns::<T>()?;
        self.insert_one(
            obj,
            default_label::<T>("create"),
            cols.insert_columns(),
            Conflict::None,
            cols.autos(),
        )
        .await
        .map(|_| ())
    }

    /// Insert `obj` unless a row with its primary key exists. Returns whether
    /// a row was inserted.
    pub async fn create_if_not_exists<T: DatabaseMapped>(self, obj: &mut T) -> OrmResult<bool> {
        let cols = mapped_columns::<T>()?;
        self.insert_one(
            obj,
            default_label::<T>("create_if_not_exists"),
            cols.insert_columns(),
            Conflict::DoNothing(cols.primary_keys()),
            cols.autos(),
        )
        .await
    }

    /// Insert all of `objs` with one statement. Auto columns are not read
    /// back. An empty slice is a no-op.
    pub async fn create_many<T: DatabaseMapped>(self, objs: &[T]) -> OrmResult<u64> {
        let cols = mapped_columns::<T>()?;
        self.insert_many(objs, cols.insert_columns(), Conflict::None)
            .await
    }

    /// Insert all of `objs`, updating rows that conflict on the unique keys
    /// (or the primary keys when the type has no unique keys).
    pub async fn upsert_many<T: DatabaseMapped>(self, objs: &[T]) -> OrmResult<u64> {
        let cols = mapped_columns::<T>()?;
        let insert = cols.insert_columns();
        let target = if cols.unique_keys().is_empty() {
            cols.primary_keys()
        } else {
            cols.unique_keys()
        };
        let set = insert.filter(|c| !target.has_column(&c.column_name));
        self.insert_many(objs, insert, Conflict::DoUpdate { target, set: &set })
            .await
    }

    /// Write `obj`'s non-key columns to the row with its primary key.
    ///
    /// Returns whether a row was updated; more than one is `TooManyRows`.
    pub async fn update<T: DatabaseMapped>(self, obj: &T) -> OrmResult<bool> {
        let cols = mapped_columns::<T>()?;
        let pks = cols.primary_keys();
        if pks.is_empty() {
            return Err(no_primary_key::<T>());
        }
        let set = cols.update_columns();
        if set.is_empty() {
            return Err(OrmError::validation(format!(
                "`{}` has no updatable columns",
                T::table_name()
            )));
        }

        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::update(&mut sql, T::table_name(), set, pks);
        let mut values = set.column_values(obj)?;
        values.extend(pks.column_values(obj)?);
        let affected = self
            .run_execute(default_label::<T>("update"), &sql, &params(&values))
            .await?;
        single_row::<T>(affected, "update")
    }

    /// Insert `obj`, or update the row with its primary key.
    ///
    /// Auto columns are written when `obj` sets them. With exactly one auto
    /// column its value is read back. A type without primary keys gets a plain
    /// insert.
    pub async fn upsert<T: DatabaseMapped>(self, obj: &mut T) -> OrmResult<()> {
        let cols = mapped_columns::<T>()?;
        let present_autos = cols.autos().not_zero(&*obj);
        let insert = cols.filter(|c| {
            !c.is_read_only && (!c.is_auto || present_autos.has_column(&c.column_name))
        });
        // Auto columns are written on insert when set but never overwritten on conflict.
        let set = cols
            .update_columns()
            .filter(|c| !c.is_auto && insert.has_column(&c.column_name));
        let no_returning = ColumnCollection::new();
        let returning = if cols.autos().len() == 1 {
            cols.autos()
        } else {
            &no_returning
        };

        let label = if present_autos.is_empty() {
            format!("{}_upsert", T::table_name())
        } else {
            format!(
                "{}_upsert_with_{}",
                T::table_name(),
                present_autos.column_names().join("_")
            )
        };
        self.insert_one(
            obj,
            Some(label),
            &insert,
            Conflict::DoUpdate {
                target: cols.primary_keys(),
                set: &set,
            },
            returning,
        )
        .await
        .map(|_| ())
    }

    /// Whether a row with `obj`'s primary key exists.
    pub async fn exists<T: DatabaseMapped>(self, obj: &T) -> OrmResult<bool> {
        let cols = mapped_columns::<T>()?;
        let pks = cols.primary_keys();
        if pks.is_empty() {
            return Err(no_primary_key::<T>());
        }

        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::exists(&mut sql, T::table_name(), pks);
        let query = {
            let values = pks.column_values(obj)?;
            self.open_query(default_label::<T>("exists"), &sql, &params(&values))
                .await?
        };
        query.any().await
    }

    /// Delete the row with `obj`'s primary key.
    ///
    /// Returns whether a row was deleted; more than one is `TooManyRows`.
    pub async fn delete<T: DatabaseMapped>(self, obj: &T) -> OrmResult<bool> {
        let cols = mapped_columns::<T>()?;
        let pks = cols.primary_keys();
        if pks.is_empty() {
            return Err(no_primary_key::<T>());
        }

        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::delete(&mut sql, T::table_name(), pks);
        let values = pks.column_values(obj)?;
        let affected = self
            .run_execute(default_label::<T>("delete"), &sql, &params(&values))
            .await?;
        single_row::<T>(affected, "delete")
    }

    /// Empty `T`'s table.
    pub async fn truncate<T: DatabaseMapped>(self) -> OrmResult<()> {
        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::truncate(&mut sql, T::table_name());
        self.run_execute(default_label::<T>("truncate"), &sql, &[])
            .await
            .map(|_| ())
    }

    /// Execute arbitrary SQL, returning the affected row count. Cached only
    /// when a label was set.
    pub async fn exec(self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        self.run_execute(None, sql, params).await
    }

    /// Run arbitrary SQL and return a cursor over its rows. Cached only when a
    /// label was set.
    pub async fn query(self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Query<'a>> {
        self.open_query(None, sql, params).await
    }

    async fn insert_one<T: DatabaseMapped>(
        self,
        obj: &mut T,
        label: Option<String>,
        insert: &ColumnCollection,
        conflict: Conflict<'_>,
        returning: &ColumnCollection,
    ) -> OrmResult<bool> {
        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::insert(&mut sql, T::table_name(), insert, 1, conflict, returning);

        if returning.is_empty() {
            let values = insert.column_values(&*obj)?;
            let affected = self.run_execute(label, &sql, &params(&values)).await?;
            return Ok(affected > 0);
        }

        let query = {
            let values = insert.column_values(&*obj)?;
            self.open_query(label, &sql, &params(&values)).await?
        };
        query
            .out_with(obj, |obj, row| populate_in_order(obj, returning, row))
            .await
    }

    async fn insert_many<T: DatabaseMapped>(
        self,
        objs: &[T],
        insert: &ColumnCollection,
        conflict: Conflict<'_>,
    ) -> OrmResult<u64> {
        if objs.is_empty() {
            return Ok(0);
        }
        if insert.is_empty() {
            return Err(OrmError::validation(format!(
                "`{}` has no insertable columns",
                T::table_name()
            )));
        }
        let total = objs.len() * insert.len();
        if total > MAX_PARAMS {
            return Err(OrmError::validation(format!(
                "{total} parameters exceed the limit of {MAX_PARAMS}; split the batch"
            )));
        }

        let mut values: Vec<ColumnValue<'_>> = Vec::with_capacity(total);
        for obj in objs {
            values.extend(insert.column_values(obj)?);
        }

        let conn = self.conn;
        let mut sql = conn.buffers().get();
        generate::insert(
            &mut sql,
            T::table_name(),
            insert,
            objs.len(),
            conflict,
            &ColumnCollection::new(),
        );
        self.run_execute(None, &sql, &params(&values)).await
    }

    async fn begin(
        self,
        default_label: Option<String>,
        sql: &str,
        param_count: usize,
    ) -> OrmResult<run::Begun<'a>> {
        let Invocation {
            conn,
            tx,
            label,
            timeout,
            cancel,
            finish,
        } = self;
        let limits = Limits::new(timeout.or(conn.config().query_timeout), cancel);
        run::begin(
            conn,
            tx,
            label.or(default_label),
            sql,
            param_count,
            limits,
            finish,
        )
        .await
    }

    async fn run_execute(
        self,
        default_label: Option<String>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<u64> {
        self.begin(default_label, sql, params.len())
            .await?
            .execute(params)
            .await
    }

    async fn open_query(
        self,
        default_label: Option<String>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<Query<'a>> {
        self.begin(default_label, sql, params.len())
            .await?
            .query(params)
            .await
    }
}

fn default_label<T: DatabaseMapped>(operation: &str) -> Option<String> {
    Some(format!("{}_{operation}", T::table_name()))
}

fn no_primary_key<T: DatabaseMapped>() -> OrmError {
    OrmError::NoPrimaryKey(T::table_name().to_string())
}

fn single_row<T: DatabaseMapped>(affected: u64, operation: &str) -> OrmResult<bool> {
    if affected > 1 {
        return Err(OrmError::too_many_rows(format!(
            "{operation} on `{}` affected {affected} rows",
            T::table_name()
        )));
    }
    Ok(affected == 1)
}
