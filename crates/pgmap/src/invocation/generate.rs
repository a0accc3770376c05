//! Statement text for the CRUD shapes.
//!
//! Every generator writes column names and `$n` placeholders from the same
//! column iteration, so the names half and the values half of a clause always
//! line up. Placeholders are numbered in binding order.

use crate::column_collection::ColumnCollection;
use std::fmt::Write;

/// `ON CONFLICT` tail of an insert.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Conflict<'c> {
    None,
    /// `ON CONFLICT (target) DO NOTHING`. Skipped when `target` is empty.
    DoNothing(&'c ColumnCollection),
    /// `ON CONFLICT (target) DO UPDATE SET c = EXCLUDED.c, ...`; `DO NOTHING`
    /// when `set` is empty. Skipped when `target` is empty.
    DoUpdate {
        target: &'c ColumnCollection,
        set: &'c ColumnCollection,
    },
}

/// `$start,$start+1,...` for `count` placeholders.
pub fn param_tokens(start: usize, count: usize) -> String {
    let mut out = String::new();
    write_param_tokens(&mut out, start, count);
    out
}

/// `pk1 = $start AND pk2 = $start+1 ...`.
pub fn make_where_clause(pks: &ColumnCollection, start: usize) -> String {
    let mut out = String::new();
    write_where(&mut out, pks, start);
    out
}

fn write_param_tokens(buf: &mut String, start: usize, count: usize) {
    for i in 0..count {
        if i > 0 {
            buf.push(',');
        }
        let _ = write!(buf, "${}", start + i);
    }
}

fn write_names(buf: &mut String, cols: &ColumnCollection) {
    for (i, col) in cols.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        buf.push_str(&col.column_name);
    }
}

fn write_where(buf: &mut String, pks: &ColumnCollection, start: usize) {
    for (i, col) in pks.iter().enumerate() {
        if i > 0 {
            buf.push_str(" AND ");
        }
        let _ = write!(buf, "{} = ${}", col.column_name, start + i);
    }
}

pub(crate) fn select_by_keys(
    buf: &mut String,
    table: &str,
    cols: &ColumnCollection,
    pks: &ColumnCollection,
) {
    select_all(buf, table, cols);
    buf.push_str(" WHERE ");
    write_where(buf, pks, 1);
}

pub(crate) fn select_all(buf: &mut String, table: &str, cols: &ColumnCollection) {
    buf.push_str("SELECT ");
    write_names(buf, cols);
    let _ = write!(buf, " FROM {table}");
}

/// `INSERT INTO table (cols) VALUES (...)[,(...)]` for `rows` rows, followed by
/// the conflict clause and `RETURNING returning` when that is non-empty.
/// Without columns a single `DEFAULT VALUES` row is inserted.
pub(crate) fn insert(
    buf: &mut String,
    table: &str,
    cols: &ColumnCollection,
    rows: usize,
    conflict: Conflict<'_>,
    returning: &ColumnCollection,
) {
    if cols.is_empty() {
        let _ = write!(buf, "INSERT INTO {table} DEFAULT VALUES");
    } else {
        let _ = write!(buf, "INSERT INTO {table} (");
        write_names(buf, cols);
        buf.push_str(") VALUES ");
        for row in 0..rows {
            if row > 0 {
                buf.push(',');
            }
            buf.push('(');
            write_param_tokens(buf, 1 + row * cols.len(), cols.len());
            buf.push(')');
        }
    }

    match conflict {
        Conflict::None => {}
        Conflict::DoNothing(target) if !target.is_empty() => {
            buf.push_str(" ON CONFLICT (");
            write_names(buf, target);
            buf.push_str(") DO NOTHING");
        }
        Conflict::DoUpdate { target, set } if !target.is_empty() => {
            buf.push_str(" ON CONFLICT (");
            write_names(buf, target);
            if set.is_empty() {
                buf.push_str(") DO NOTHING");
            } else {
                buf.push_str(") DO UPDATE SET ");
                for (i, col) in set.iter().enumerate() {
                    if i > 0 {
                        buf.push_str(", ");
                    }
                    let _ = write!(buf, "{0} = EXCLUDED.{0}", col.column_name);
                }
            }
        }
        Conflict::DoNothing(_) | Conflict::DoUpdate { .. } => {}
    }

    if !returning.is_empty() {
        buf.push_str(" RETURNING ");
        write_names(buf, returning);
    }
}

/// `UPDATE table SET a = $1, b = $2 WHERE pk = $3`.
pub(crate) fn update(
    buf: &mut String,
    table: &str,
    set: &ColumnCollection,
    pks: &ColumnCollection,
) {
    let _ = write!(buf, "UPDATE {table} SET ");
    for (i, col) in set.iter().enumerate() {
        if i > 0 {
            buf.push_str(", ");
        }
        let _ = write!(buf, "{} = ${}", col.column_name, i + 1);
    }
    buf.push_str(" WHERE ");
    write_where(buf, pks, set.len() + 1);
}

pub(crate) fn exists(buf: &mut String, table: &str, pks: &ColumnCollection) {
    let _ = write!(buf, "SELECT 1 FROM {table} WHERE ");
    write_where(buf, pks, 1);
}

pub(crate) fn delete(buf: &mut String, table: &str, pks: &ColumnCollection) {
    let _ = write!(buf, "DELETE FROM {table} WHERE ");
    write_where(buf, pks, 1);
}

pub(crate) fn truncate(buf: &mut String, table: &str) {
    let _ = write!(buf, "TRUNCATE {table}");
}
