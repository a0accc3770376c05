//! Column descriptors derived from `#[db("...")]` field tags.
//!
//! A tag has the shape `name,flag,flag,...`. Recognized flags are matched
//! case-insensitively by substring against the flag segments:
//!
//! | flag              | effect                                            |
//! |-------------------|---------------------------------------------------|
//! | `pk`              | primary key                                       |
//! | `uk`              | unique key (conflict target for `upsert_many`)    |
//! | `serial` / `auto` | database generated, read back after insert        |
//! | `nullable`        | informational                                     |
//! | `readonly`        | excluded from insert and update projections       |
//! | `json`            | stored as JSON text                               |
//! | `inline`          | nested struct flattened into the parent           |
//!
//! A tag of exactly `-` excludes the field. An empty name segment falls back to
//! the lower-cased field name.

use std::sync::Arc;

/// Static description of one struct field, emitted by `#[derive(DatabaseMapped)]`.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Declaration position of the field in its struct.
    pub index: usize,
    pub field_name: &'static str,
    /// Raw tag text; empty when the field carries no `#[db]` attribute.
    pub tag: &'static str,
    /// Rust type of the field as written in the struct.
    pub type_name: &'static str,
    /// Field specs of the nested type for `inline` fields.
    pub inline: Option<fn() -> Vec<FieldSpec>>,
}

impl FieldSpec {
    pub const fn new(
        index: usize,
        field_name: &'static str,
        tag: &'static str,
        type_name: &'static str,
    ) -> Self {
        Self {
            index,
            field_name,
            tag,
            type_name,
            inline: None,
        }
    }

    /// Attach the nested field list of an inline field.
    pub const fn with_inline(mut self, nested: fn() -> Vec<FieldSpec>) -> Self {
        self.inline = Some(nested);
        self
    }
}

/// Mapping metadata for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Inline field this column was flattened out of.
    pub parent: Option<Arc<Column>>,
    /// Table of the root mapped type; inline columns inherit it.
    pub table_name: String,
    pub field_name: &'static str,
    pub field_type: &'static str,
    pub column_name: String,
    /// Declaration position within the owning struct.
    pub index: usize,
    /// Field positions from the root struct down to this field.
    pub path: Vec<usize>,
    pub is_primary_key: bool,
    pub is_unique_key: bool,
    pub is_auto: bool,
    pub is_nullable: bool,
    pub is_read_only: bool,
    pub is_json: bool,
    pub is_inline: bool,
}

impl Column {
    /// Parse a field spec. Returns `None` for fields tagged `-`.
    pub fn from_field_tag(spec: &FieldSpec) -> Option<Column> {
        let tag = spec.tag.trim();
        if tag == "-" {
            return None;
        }

        let mut col = Column {
            parent: None,
            table_name: String::new(),
            field_name: spec.field_name,
            field_type: spec.type_name,
            column_name: spec.field_name.to_lowercase(),
            index: spec.index,
            path: vec![spec.index],
            is_primary_key: false,
            is_unique_key: false,
            is_auto: false,
            is_nullable: false,
            is_read_only: false,
            is_json: false,
            is_inline: false,
        };

        if tag.is_empty() {
            return Some(col);
        }

        let mut pieces = tag.split(',');
        if let Some(name) = pieces.next().map(str::trim)
            && !name.is_empty()
        {
            col.column_name = name.to_string();
        }

        let flags = pieces.collect::<Vec<_>>().join(",").to_lowercase();
        col.is_primary_key = flags.contains("pk");
        col.is_unique_key = flags.contains("uk");
        col.is_auto = flags.contains("serial") || flags.contains("auto");
        col.is_nullable = flags.contains("nullable");
        col.is_read_only = flags.contains("readonly");
        col.is_json = flags.contains("json");
        col.is_inline = flags.contains("inline");

        Some(col)
    }
}

/// Walk a field list into flattened columns.
///
/// Inline fields with a nested spec are replaced by their nested columns, in
/// declaration order, with `parent` and `path` pointing back through the
/// inline field.
pub(crate) fn generate_columns(
    table_name: &str,
    parent: Option<&Arc<Column>>,
    specs: &[FieldSpec],
) -> Vec<Column> {
    let mut cols = Vec::with_capacity(specs.len());
    for spec in specs {
        let Some(mut col) = Column::from_field_tag(spec) else {
            continue;
        };
        col.table_name = table_name.to_string();
        if let Some(parent) = parent {
            let mut path = parent.path.clone();
            path.push(spec.index);
            col.path = path;
            col.parent = Some(Arc::clone(parent));
        }

        match spec.inline {
            Some(nested) if col.is_inline => {
                let parent = Arc::new(col);
                cols.extend(generate_columns(table_name, Some(&parent), &nested()));
            }
            _ => cols.push(col),
        }
    }
    cols
}
