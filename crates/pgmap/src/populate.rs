//! Mapping result rows onto mapped structs.

use crate::column_collection::ColumnCollection;
use crate::error::{OrmError, OrmResult};
use crate::mapped::{DatabaseMapped, RowScanner};
use crate::meta_cache::columns;

/// Populate `obj` from `row`, matching result columns to mapped columns by
/// name. Result columns with no mapped counterpart are skipped.
pub fn populate_by_name<T, R>(obj: &mut T, cols: &ColumnCollection, row: &R) -> OrmResult<()>
where
    T: DatabaseMapped,
    R: RowScanner + ?Sized,
{
    for idx in 0..row.column_count() {
        let Some(column) = row.column_name(idx).and_then(|name| cols.lookup(name)) else {
            continue;
        };
        obj.set_column(&column.path, row, idx)?;
    }
    Ok(())
}

/// Populate `obj` assuming the result columns are positionally aligned with
/// `cols`. Only valid for statements whose select list was generated from
/// `cols` itself.
pub fn populate_in_order<T, R>(obj: &mut T, cols: &ColumnCollection, row: &R) -> OrmResult<()>
where
    T: DatabaseMapped,
    R: RowScanner + ?Sized,
{
    if row.column_count() < cols.len() {
        return Err(OrmError::decode(
            T::table_name(),
            format!(
                "row has {} columns, expected {}",
                row.column_count(),
                cols.len()
            ),
        ));
    }
    for (idx, column) in cols.iter().enumerate() {
        obj.set_column(&column.path, row, idx)?;
    }
    Ok(())
}

/// Populate `obj` with its own logic when it has some, else by name.
pub fn populate<T, R>(obj: &mut T, row: &R) -> OrmResult<()>
where
    T: DatabaseMapped,
    R: RowScanner + ?Sized,
{
    if let Some(result) = obj.self_populate(row) {
        return result;
    }
    let cols = mapped_columns::<T>()?;
    populate_by_name(obj, &cols, row)
}

/// Populate from a statement whose select list was generated from `cols`.
pub(crate) fn populate_generated<T, R>(obj: &mut T, cols: &ColumnCollection, row: &R) -> OrmResult<()>
where
    T: DatabaseMapped,
    R: RowScanner + ?Sized,
{
    if let Some(result) = obj.self_populate(row) {
        return result;
    }
    populate_in_order(obj, cols, row)
}

/// Columns of `T`, failing when the type maps none.
pub(crate) fn mapped_columns<T: DatabaseMapped>() -> OrmResult<std::sync::Arc<ColumnCollection>> {
    let cols = columns::<T>();
    if cols.is_empty() {
        return Err(OrmError::DestinationNotStruct(
            std::any::type_name::<T>().to_string(),
        ));
    }
    Ok(cols)
}
