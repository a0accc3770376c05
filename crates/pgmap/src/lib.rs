//! # pgmap
//!
//! A thin struct mapping and CRUD statement layer for Postgres.
//!
//! - **Tag-driven metadata**: `#[db("name,pk,serial")]` field tags describe columns
//! - **Cached per type**: column metadata is built once per type, process-wide
//! - **Fixed statement shapes**: get, get_all, create, create_if_not_exists,
//!   create_many, upsert_many, update, upsert, exists, delete and truncate
//! - **Labeled statement cache**: prepared once per label on each pooled connection, dropped when the plan goes stale
//! - **Hooks**: inspect, rewrite, abort, log and count every statement
//!
//! It is not a query builder: anything beyond the fixed shapes goes through
//! [`Connection::exec`] and [`Connection::query`].
//!
//! ```ignore
//! use pgmap::prelude::*;
//!
//! #[derive(Debug, Default, DatabaseMapped)]
//! #[db(table = "users")]
//! struct User {
//!     #[db("id,pk,serial")]
//!     id: i64,
//!     #[db("name")]
//!     name: String,
//!     #[db("settings,json")]
//!     settings: Option<Settings>,
//! }
//!
//! let conn = Connection::new(Config::new().dsn("postgres://app@localhost/app"));
//! conn.open().await?;
//!
//! let mut user = User { name: "ada".into(), ..Default::default() };
//! conn.create(&mut user).await?;
//!
//! let mut found = User::default();
//! conn.get(&mut found, &[&user.id]).await?;
//!
//! let mut names: Vec<String> = Vec::new();
//! conn.query("SELECT name FROM users ORDER BY name", &[])
//!     .await?
//!     .each(|row| {
//!         names.push(row.try_get(0)?);
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod buffer_pool;
pub mod client;
pub mod column;
pub mod column_collection;
pub mod config;
pub mod connection;
pub mod error;
pub mod invocation;
pub mod mapped;
pub mod meta_cache;
pub mod monitor;
pub mod pool;
pub mod populate;
pub mod prelude;
pub mod statement_cache;

#[cfg(test)]
mod testing;

pub use client::{GenericClient, RowStream};
pub use column::{Column, FieldSpec};
pub use column_collection::ColumnCollection;
pub use config::{Config, StatementCacheConfig};
pub use connection::Connection;
pub use error::{OrmError, OrmResult};
pub use invocation::{
    CancelHandle, CancelSignal, Invocation, Query, ScanTargets, make_where_clause, param_tokens,
};
pub use mapped::{ColumnValue, DatabaseMapped, JsonText, Populatable, RowScanner};
pub use meta_cache::{MetadataCache, columns, metadata_cache};
pub use monitor::{
    CompositeHook, HookAction, QueryContext, QueryHook, QueryResult, QueryStats, QueryType,
    StatsHook, TracingSqlHook,
};
pub use pool::{create_pool, pool_from_config};
pub use populate::{populate, populate_by_name, populate_in_order};
pub use statement_cache::StatementCache;

#[cfg(feature = "derive")]
pub use pgmap_derive::DatabaseMapped;

// Derive support: the macro expands to `::pgmap::__private::...` paths.
#[doc(hidden)]
pub mod __private {
    pub use crate::column::FieldSpec;
    pub use crate::error::OrmResult;
    pub use crate::mapped::{
        ColumnValue, DatabaseMapped, Populatable, RowScanner, field_value, is_json_zero, is_zero,
        json_value, set_field, set_json, unsettable,
    };
}
