//! Ordered column sets with memoized filtered views.

use crate::column::Column;
use crate::error::OrmResult;
use crate::mapped::{ColumnValue, DatabaseMapped};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

type View = OnceLock<Box<ColumnCollection>>;

#[derive(Default)]
struct Views {
    primary_keys: View,
    not_primary_keys: View,
    unique_keys: View,
    not_unique_keys: View,
    autos: View,
    not_autos: View,
    read_only: View,
    not_read_only: View,
    insert_columns: View,
    update_columns: View,
}

/// The ordered columns of one mapped type.
///
/// Filtered views (`primary_keys`, `autos`, ...) are computed on first use and
/// memoized on the instance. `add` and `remove` take `&mut self` and drop every
/// memoized view, so a view never reflects a stale base set. Collections shared
/// through the metadata cache sit behind an `Arc` and cannot be mutated.
pub struct ColumnCollection {
    columns: Vec<Arc<Column>>,
    lookup: HashMap<String, usize>,
    column_prefix: String,
    views: Views,
}

impl ColumnCollection {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    /// An empty collection whose names are reported with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            lookup: HashMap::new(),
            column_prefix: prefix.into(),
            views: Views::default(),
        }
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self::from_shared("", columns.into_iter().map(Arc::new))
    }

    fn from_shared(prefix: &str, columns: impl IntoIterator<Item = Arc<Column>>) -> Self {
        let mut cc = Self::with_prefix(prefix);
        for col in columns {
            cc.push(col);
        }
        cc
    }

    fn push(&mut self, col: Arc<Column>) {
        match self.lookup.get(&col.column_name) {
            Some(&pos) => self.columns[pos] = col,
            None => {
                self.lookup.insert(col.column_name.clone(), self.columns.len());
                self.columns.push(col);
            }
        }
    }

    fn filtered(&self, keep: impl Fn(&Column) -> bool) -> Box<ColumnCollection> {
        Box::new(Self::from_shared(
            &self.column_prefix,
            self.columns.iter().filter(|c| keep(c)).cloned(),
        ))
    }

    /// Ad hoc subset keeping column order and prefix. Not memoized.
    pub fn filter(&self, keep: impl Fn(&Column) -> bool) -> ColumnCollection {
        *self.filtered(keep)
    }

    /// Append a column. A column with the same name is replaced in place.
    pub fn add(&mut self, column: Column) {
        self.push(Arc::new(column));
        self.views = Views::default();
    }

    pub fn remove(&mut self, column_name: &str) {
        if self.lookup.remove(column_name).is_none() {
            return;
        }
        self.columns.retain(|c| c.column_name != column_name);
        self.lookup = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column_name.clone(), i))
            .collect();
        self.views = Views::default();
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_prefix(&self) -> &str {
        &self.column_prefix
    }

    pub fn has_column(&self, column_name: &str) -> bool {
        self.lookup.contains_key(column_name)
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Column>> {
        self.columns.iter()
    }

    pub fn first(&self) -> Option<&Arc<Column>> {
        self.columns.first()
    }

    /// Find a column by its reported (prefixed) name.
    pub fn lookup(&self, name: &str) -> Option<&Arc<Column>> {
        let bare = name.strip_prefix(self.column_prefix.as_str())?;
        self.lookup.get(bare).map(|&i| &self.columns[i])
    }

    pub fn copy(&self) -> ColumnCollection {
        Self::from_shared(&self.column_prefix, self.columns.iter().cloned())
    }

    pub fn copy_with_column_prefix(&self, prefix: &str) -> ColumnCollection {
        Self::from_shared(prefix, self.columns.iter().cloned())
    }

    /// Columns of `self` followed by those of `other`, without a prefix.
    pub fn concat_with(&self, other: &ColumnCollection) -> ColumnCollection {
        Self::from_shared("", self.columns.iter().chain(other.columns.iter()).cloned())
    }

    pub fn primary_keys(&self) -> &ColumnCollection {
        self.views
            .primary_keys
            .get_or_init(|| self.filtered(|c| c.is_primary_key))
    }

    pub fn not_primary_keys(&self) -> &ColumnCollection {
        self.views
            .not_primary_keys
            .get_or_init(|| self.filtered(|c| !c.is_primary_key))
    }

    pub fn unique_keys(&self) -> &ColumnCollection {
        self.views
            .unique_keys
            .get_or_init(|| self.filtered(|c| c.is_unique_key))
    }

    pub fn not_unique_keys(&self) -> &ColumnCollection {
        self.views
            .not_unique_keys
            .get_or_init(|| self.filtered(|c| !c.is_unique_key))
    }

    pub fn autos(&self) -> &ColumnCollection {
        self.views.autos.get_or_init(|| self.filtered(|c| c.is_auto))
    }

    pub fn not_autos(&self) -> &ColumnCollection {
        self.views
            .not_autos
            .get_or_init(|| self.filtered(|c| !c.is_auto))
    }

    pub fn read_only(&self) -> &ColumnCollection {
        self.views
            .read_only
            .get_or_init(|| self.filtered(|c| c.is_read_only))
    }

    pub fn not_read_only(&self) -> &ColumnCollection {
        self.views
            .not_read_only
            .get_or_init(|| self.filtered(|c| !c.is_read_only))
    }

    /// Columns written by an insert: not read-only and not auto.
    pub fn insert_columns(&self) -> &ColumnCollection {
        self.views
            .insert_columns
            .get_or_init(|| self.filtered(|c| !c.is_read_only && !c.is_auto))
    }

    /// Columns written by an update: not read-only and not primary key.
    pub fn update_columns(&self) -> &ColumnCollection {
        self.views
            .update_columns
            .get_or_init(|| self.filtered(|c| !c.is_read_only && !c.is_primary_key))
    }

    /// Columns whose field on `instance` holds its zero value.
    pub fn zero<T: DatabaseMapped>(&self, instance: &T) -> ColumnCollection {
        Self::from_shared(
            &self.column_prefix,
            self.columns
                .iter()
                .filter(|c| instance.is_zero_column(&c.path))
                .cloned(),
        )
    }

    /// Columns whose field on `instance` holds a non-zero value.
    pub fn not_zero<T: DatabaseMapped>(&self, instance: &T) -> ColumnCollection {
        Self::from_shared(
            &self.column_prefix,
            self.columns
                .iter()
                .filter(|c| !instance.is_zero_column(&c.path))
                .cloned(),
        )
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| format!("{}{}", self.column_prefix, c.column_name))
            .collect()
    }

    pub fn column_names_csv(&self) -> String {
        self.column_names().join(",")
    }

    /// `alias.column`, or `alias.column as prefixcolumn` when a prefix is set.
    pub fn column_names_from_alias(&self, table_alias: &str) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| {
                if self.column_prefix.is_empty() {
                    format!("{table_alias}.{}", c.column_name)
                } else {
                    format!(
                        "{table_alias}.{} as {}{}",
                        c.column_name, self.column_prefix, c.column_name
                    )
                }
            })
            .collect()
    }

    pub fn column_names_csv_from_alias(&self, table_alias: &str) -> String {
        self.column_names_from_alias(table_alias).join(",")
    }

    /// Bindable values of `instance`, in column order.
    pub fn column_values<'o, T: DatabaseMapped>(
        &self,
        instance: &'o T,
    ) -> OrmResult<Vec<ColumnValue<'o>>> {
        self.columns
            .iter()
            .map(|c| instance.column_value(&c.path))
            .collect()
    }
}

impl Default for ColumnCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ColumnCollection {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl fmt::Debug for ColumnCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnCollection")
            .field("prefix", &self.column_prefix)
            .field("columns", &self.column_names())
            .finish()
    }
}

impl fmt::Display for ColumnCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_names().join(", "))
    }
}
