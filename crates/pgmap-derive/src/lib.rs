//! Derive macro for pgmap.
//!
//! Provides `#[derive(DatabaseMapped)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod database_mapped;

/// Derive `DatabaseMapped` for a struct with named fields.
///
/// # Example
///
/// ```ignore
/// use pgmap::DatabaseMapped;
///
/// #[derive(Default, DatabaseMapped)]
/// #[db(table = "users")]
/// struct User {
///     #[db(",inline")]
///     audit: Audit,
///     #[db("name,uk")]
///     name: String,
///     #[db("settings,json")]
///     settings: Option<Settings>,
///     #[db("-")]
///     scratch: String,
/// }
/// ```
///
/// # Attributes
///
/// Field level, a tag string `#[db("name,flag,...")]`:
/// - `name` - column name; empty means the lower-cased field name
/// - flags: `pk`, `uk`, `serial` / `auto`, `nullable`, `readonly`, `json`, `inline`
/// - `#[db("-")]` - not mapped
///
/// Fields without `#[db]` map to their lower-cased name with no flags.
///
/// Struct level:
/// - `#[db(table = "name")]` - table name (default: lower-cased type name)
/// - `#[db(cache_key = "key")]` - metadata cache key suffix
/// - `#[db(populatable)]` - populate rows through the type's `Populatable` impl
#[proc_macro_derive(DatabaseMapped, attributes(db))]
pub fn derive_database_mapped(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    database_mapped::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
