//! Common imports:
//!
//! ```ignore
//! use pgmap::prelude::*;
//! ```

pub use crate::{
    CancelHandle, Config, Connection, DatabaseMapped, Invocation, OrmError, OrmResult,
    Populatable, Query, RowScanner,
};

pub use crate::{CompositeHook, QueryHook, StatsHook, TracingSqlHook};
