//! Parsing of struct-level and field-level `#[db(...)]` attributes.

use syn::{DeriveInput, Field, LitStr, Result};

/// Struct-level options.
#[derive(Default)]
pub(super) struct StructAttr {
    pub table: Option<String>,
    pub cache_key: Option<String>,
    pub populatable: bool,
}

impl syn::parse::Parse for StructAttr {
    fn parse(input: syn::parse::ParseStream) -> Result<Self> {
        let mut attr = StructAttr::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            if ident == "populatable" {
                attr.populatable = true;
            } else if ident == "table" || ident == "cache_key" {
                let _: syn::Token![=] = input.parse()?;
                let value: LitStr = input.parse()?;
                if ident == "table" {
                    attr.table = Some(value.value());
                } else {
                    attr.cache_key = Some(value.value());
                }
            } else {
                return Err(syn::Error::new(
                    ident.span(),
                    "expected `table = \"...\"`, `cache_key = \"...\"` or `populatable`",
                ));
            }

            if input.is_empty() {
                break;
            }
            let _: syn::Token![,] = input.parse()?;
        }

        Ok(attr)
    }
}

pub(super) fn struct_attr(input: &DeriveInput) -> Result<StructAttr> {
    let mut merged = StructAttr::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("db") {
            continue;
        }
        let parsed: StructAttr = attr.parse_args()?;
        merged.table = parsed.table.or(merged.table);
        merged.cache_key = parsed.cache_key.or(merged.cache_key);
        merged.populatable |= parsed.populatable;
    }
    Ok(merged)
}

/// How the generated accessors treat a field.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum FieldKind {
    Plain,
    Json,
    Inline,
    Skipped,
}

pub(super) struct FieldAttr {
    /// Raw tag text, empty without `#[db]`.
    pub tag: String,
    pub kind: FieldKind,
}

/// Read a field's `#[db("...")]` tag and classify it the same way the
/// runtime tag parser does.
pub(super) fn field_attr(field: &Field) -> Result<FieldAttr> {
    let mut tag = String::new();
    for attr in &field.attrs {
        if attr.path().is_ident("db") {
            let lit: LitStr = attr.parse_args()?;
            tag = lit.value();
        }
    }

    let trimmed = tag.trim();
    let kind = if trimmed == "-" {
        FieldKind::Skipped
    } else {
        let flags = trimmed
            .split(',')
            .skip(1)
            .collect::<Vec<_>>()
            .join(",")
            .to_lowercase();
        if flags.contains("inline") {
            FieldKind::Inline
        } else if flags.contains("json") {
            FieldKind::Json
        } else {
            FieldKind::Plain
        }
    };

    Ok(FieldAttr { tag, kind })
}
