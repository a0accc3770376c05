//! Shared fixtures for unit tests: hand-written mapped types and an in-memory row.

use crate::column::FieldSpec;
use crate::error::{OrmError, OrmResult};
use crate::mapped::{
    ColumnValue, DatabaseMapped, RowScanner, field_value, is_json_zero, is_zero, json_value,
    set_field, set_json, unsettable,
};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_postgres::types::{FromSqlOwned, IsNull, ToSql, Type};

pub(crate) struct FakeRow {
    columns: Vec<(String, Type, Option<BytesMut>)>,
}

impl FakeRow {
    pub(crate) fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub(crate) fn with<T: ToSql>(mut self, name: &str, ty: Type, value: T) -> Self {
        let mut buf = BytesMut::new();
        let encoded = match value.to_sql(&ty, &mut buf) {
            Ok(IsNull::No) => Some(buf),
            Ok(IsNull::Yes) => None,
            Err(e) => panic!("encode {name}: {e}"),
        };
        self.columns.push((name.to_string(), ty, encoded));
        self
    }

    pub(crate) fn null(mut self, name: &str, ty: Type) -> Self {
        self.columns.push((name.to_string(), ty, None));
        self
    }
}

impl RowScanner for FakeRow {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, idx: usize) -> Option<&str> {
        self.columns.get(idx).map(|(n, _, _)| n.as_str())
    }

    fn scan<T: FromSqlOwned>(&self, idx: usize) -> OrmResult<T> {
        let (name, ty, raw) = self
            .columns
            .get(idx)
            .ok_or_else(|| OrmError::decode(format!("#{idx}"), "out of range"))?;
        if !T::accepts(ty) {
            return Err(OrmError::decode(name.clone(), format!("cannot decode {ty}")));
        }
        T::from_sql_nullable(ty, raw.as_deref())
            .map_err(|e| OrmError::decode(name.clone(), e.to_string()))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Prefs {
    pub theme: String,
}

/// Columns every widget row carries.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Audit {
    pub id: i64,
    pub created_utc: i64,
}

impl DatabaseMapped for Audit {
    fn table_name() -> &'static str {
        "audit"
    }

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(0, "id", "id,pk,serial", "i64"),
            FieldSpec::new(1, "created_utc", "", "i64"),
        ]
    }

    fn column_value(&self, path: &[usize]) -> OrmResult<ColumnValue<'_>> {
        match path {
            [0] => Ok(field_value(&self.id)),
            [1] => Ok(field_value(&self.created_utc)),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn set_column<R: RowScanner + ?Sized>(
        &mut self,
        path: &[usize],
        row: &R,
        idx: usize,
    ) -> OrmResult<()> {
        match path {
            [0] => set_field(&mut self.id, row, idx),
            [1] => set_field(&mut self.created_utc, row, idx),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn is_zero_column(&self, path: &[usize]) -> bool {
        match path {
            [0] => is_zero(&self.id),
            [1] => is_zero(&self.created_utc),
            _ => false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Widget {
    pub audit: Audit,
    pub name: String,
    pub prefs: Option<Prefs>,
    pub computed: i64,
    pub scratch: String,
}

impl DatabaseMapped for Widget {
    fn table_name() -> &'static str {
        "widgets"
    }

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(0, "audit", ",inline", "Audit").with_inline(Audit::field_specs),
            FieldSpec::new(1, "name", "name,uk", "String"),
            FieldSpec::new(2, "prefs", "prefs,json", "Option<Prefs>"),
            FieldSpec::new(3, "computed", "computed,readonly", "i64"),
            FieldSpec::new(4, "scratch", "-", "String"),
        ]
    }

    fn column_value(&self, path: &[usize]) -> OrmResult<ColumnValue<'_>> {
        match path {
            [0, rest @ ..] => self.audit.column_value(rest),
            [1] => Ok(field_value(&self.name)),
            [2] => json_value(&self.prefs),
            [3] => Ok(field_value(&self.computed)),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn set_column<R: RowScanner + ?Sized>(
        &mut self,
        path: &[usize],
        row: &R,
        idx: usize,
    ) -> OrmResult<()> {
        match path {
            [0, rest @ ..] => self.audit.set_column(rest, row, idx),
            [1] => set_field(&mut self.name, row, idx),
            [2] => set_json(&mut self.prefs, row, idx),
            [3] => set_field(&mut self.computed, row, idx),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn is_zero_column(&self, path: &[usize]) -> bool {
        match path {
            [0, rest @ ..] => self.audit.is_zero_column(rest),
            [1] => is_zero(&self.name),
            [2] => is_json_zero(&self.prefs),
            [3] => is_zero(&self.computed),
            _ => false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct User {
    pub id: i64,
    pub name: String,
}

impl DatabaseMapped for User {
    fn table_name() -> &'static str {
        "users"
    }

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(0, "id", "id,pk,serial", "i64"),
            FieldSpec::new(1, "name", "name", "String"),
        ]
    }

    fn column_value(&self, path: &[usize]) -> OrmResult<ColumnValue<'_>> {
        match path {
            [0] => Ok(field_value(&self.id)),
            [1] => Ok(field_value(&self.name)),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn set_column<R: RowScanner + ?Sized>(
        &mut self,
        path: &[usize],
        row: &R,
        idx: usize,
    ) -> OrmResult<()> {
        match path {
            [0] => set_field(&mut self.id, row, idx),
            [1] => set_field(&mut self.name, row, idx),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn is_zero_column(&self, path: &[usize]) -> bool {
        match path {
            [0] => is_zero(&self.id),
            [1] => is_zero(&self.name),
            _ => false,
        }
    }
}

/// Caller-assigned key with a database sequence alongside it.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Ticket {
    pub id: i64,
    pub seq: i64,
    pub title: String,
}

impl DatabaseMapped for Ticket {
    fn table_name() -> &'static str {
        "tickets"
    }

    fn field_specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(0, "id", "id,pk", "i64"),
            FieldSpec::new(1, "seq", "seq,auto", "i64"),
            FieldSpec::new(2, "title", "title", "String"),
        ]
    }

    fn column_value(&self, path: &[usize]) -> OrmResult<ColumnValue<'_>> {
        match path {
            [0] => Ok(field_value(&self.id)),
            [1] => Ok(field_value(&self.seq)),
            [2] => Ok(field_value(&self.title)),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn set_column<R: RowScanner + ?Sized>(
        &mut self,
        path: &[usize],
        row: &R,
        idx: usize,
    ) -> OrmResult<()> {
        match path {
            [0] => set_field(&mut self.id, row, idx),
            [1] => set_field(&mut self.seq, row, idx),
            [2] => set_field(&mut self.title, row, idx),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn is_zero_column(&self, path: &[usize]) -> bool {
        match path {
            [0] => is_zero(&self.id),
            [1] => is_zero(&self.seq),
            [2] => is_zero(&self.title),
            _ => false,
        }
    }
}

/// A mapping with no primary key.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Note {
    pub body: String,
}

impl DatabaseMapped for Note {
    fn table_name() -> &'static str {
        "notes"
    }

    fn field_specs() -> Vec<FieldSpec> {
        vec![FieldSpec::new(0, "body", "body", "String")]
    }

    fn column_value(&self, path: &[usize]) -> OrmResult<ColumnValue<'_>> {
        match path {
            [0] => Ok(field_value(&self.body)),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn set_column<R: RowScanner + ?Sized>(
        &mut self,
        path: &[usize],
        row: &R,
        idx: usize,
    ) -> OrmResult<()> {
        match path {
            [0] => set_field(&mut self.body, row, idx),
            _ => Err(unsettable::<Self>(path)),
        }
    }

    fn is_zero_column(&self, path: &[usize]) -> bool {
        matches!(path, [0] if is_zero(&self.body))
    }
}
