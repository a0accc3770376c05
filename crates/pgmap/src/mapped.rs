//! Traits implemented by mapped types, and the field accessors the derive
//! macro generates calls to.

use crate::column::FieldSpec;
use crate::error::{OrmError, OrmResult};
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::error::Error;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, FromSqlOwned, IsNull, ToSql, Type, to_sql_checked};

/// A struct whose fields map onto table columns.
///
/// Normally implemented with `#[derive(DatabaseMapped)]`. Columns are addressed
/// by their field path: the declaration positions from the root struct down
/// through any inline fields.
pub trait DatabaseMapped {
    /// Table the type maps to.
    fn table_name() -> &'static str;

    /// Custom suffix for the metadata cache key, for types whose mapping would
    /// otherwise alias another type's.
    fn column_meta_cache_key() -> Option<&'static str> {
        None
    }

    /// Field list in declaration order.
    fn field_specs() -> Vec<FieldSpec>;

    /// Bindable value of the field at `path`.
    fn column_value(&self, path: &[usize]) -> OrmResult<ColumnValue<'_>>;

    /// Decode column `idx` of `row` into the field at `path`.
    fn set_column<R: RowScanner + ?Sized>(
        &mut self,
        path: &[usize],
        row: &R,
        idx: usize,
    ) -> OrmResult<()>;

    /// Whether the field at `path` holds its zero value.
    fn is_zero_column(&self, path: &[usize]) -> bool;

    /// Custom row population. `None` uses the generic populator.
    fn self_populate<R: RowScanner + ?Sized>(&mut self, row: &R) -> Option<OrmResult<()>> {
        let _ = row;
        None
    }
}

/// A type that populates itself from a row, bypassing column lookup.
///
/// Opt in with `#[db(populatable)]` on a derived type.
pub trait Populatable {
    fn populate<R: RowScanner + ?Sized>(&mut self, row: &R) -> OrmResult<()>;
}

/// The minimal row capability the populator needs.
pub trait RowScanner {
    fn column_count(&self) -> usize;

    fn column_name(&self, idx: usize) -> Option<&str>;

    /// Decode column `idx` as `T`.
    fn scan<T: FromSqlOwned>(&self, idx: usize) -> OrmResult<T>;
}

impl RowScanner for Row {
    fn column_count(&self) -> usize {
        self.len()
    }

    fn column_name(&self, idx: usize) -> Option<&str> {
        self.columns().get(idx).map(|c| c.name())
    }

    fn scan<T: FromSqlOwned>(&self, idx: usize) -> OrmResult<T> {
        if idx >= self.len() {
            return Err(OrmError::decode(
                format!("#{idx}"),
                format!("row has {} columns", self.len()),
            ));
        }
        self.try_get(idx).map_err(|e| {
            let column = self
                .columns()
                .get(idx)
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            OrmError::decode(column, e.to_string())
        })
    }
}

/// A bindable statement parameter extracted from a field.
#[derive(Debug)]
pub enum ColumnValue<'a> {
    /// The field itself.
    Field(&'a (dyn ToSql + Sync)),
    /// Serialized JSON text; `None` binds SQL NULL.
    Json(Option<JsonText>),
}

impl ColumnValue<'_> {
    pub fn as_param(&self) -> &(dyn ToSql + Sync) {
        match self {
            ColumnValue::Field(v) => *v,
            ColumnValue::Json(v) => v,
        }
    }

    pub fn is_null_json(&self) -> bool {
        matches!(self, ColumnValue::Json(None))
    }
}

/// Collect parameter references for binding.
pub fn params<'a>(values: &'a [ColumnValue<'_>]) -> Vec<&'a (dyn ToSql + Sync)> {
    values.iter().map(ColumnValue::as_param).collect()
}

/// JSON document carried as text.
///
/// Binds against text-like and `json`/`jsonb` parameters, and decodes from the
/// same column types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonText(pub String);

impl JsonText {
    fn accepts_type(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::UNKNOWN
                | Type::JSON
                | Type::JSONB
        )
    }
}

impl ToSql for JsonText {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if *ty == Type::JSONB {
            out.put_u8(1);
        }
        out.put_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        Self::accepts_type(ty)
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for JsonText {
    fn from_sql(ty: &Type, mut raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if *ty == Type::JSONB {
            match raw.split_first() {
                Some((1, rest)) => raw = rest,
                Some((v, _)) => return Err(format!("unsupported jsonb version {v}").into()),
                None => return Err("empty jsonb value".into()),
            }
        }
        Ok(JsonText(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        Self::accepts_type(ty)
    }
}

/// Bind a plain field.
pub fn field_value<T: ToSql + Sync>(value: &T) -> ColumnValue<'_> {
    ColumnValue::Field(value)
}

/// Bind a `json` field as JSON text. A value serializing to `null` binds SQL NULL.
pub fn json_value<T: Serialize>(value: &T) -> OrmResult<ColumnValue<'static>> {
    let text = serde_json::to_string(value)?;
    if text == "null" {
        Ok(ColumnValue::Json(None))
    } else {
        Ok(ColumnValue::Json(Some(JsonText(text))))
    }
}

/// Assign a decoded column to a plain field.
///
/// `Option<T>` fields take NULL as `None`; a NULL into a non-optional field is
/// a decode error.
pub fn set_field<T: FromSqlOwned, R: RowScanner + ?Sized>(
    field: &mut T,
    row: &R,
    idx: usize,
) -> OrmResult<()> {
    *field = row.scan::<T>(idx)?;
    Ok(())
}

/// Assign a decoded JSON column to a `json` field.
///
/// NULL and empty text leave the field untouched.
pub fn set_json<T: DeserializeOwned, R: RowScanner + ?Sized>(
    field: &mut T,
    row: &R,
    idx: usize,
) -> OrmResult<()> {
    match row.scan::<Option<JsonText>>(idx)? {
        Some(JsonText(text)) if !text.is_empty() => {
            *field = serde_json::from_str(&text).map_err(|e| {
                OrmError::decode(row.column_name(idx).unwrap_or_default(), e.to_string())
            })?;
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// A `json` field is zero when it serializes to `null`.
pub fn is_json_zero<T: Serialize>(value: &T) -> bool {
    serde_json::to_value(value).is_ok_and(|v| v.is_null())
}

/// Error for a path that addresses no mapped field.
pub fn unsettable<T: ?Sized>(path: &[usize]) -> OrmError {
    OrmError::field_unsettable(format!(
        "no mapped field at path {path:?} on `{}`",
        std::any::type_name::<T>()
    ))
}
