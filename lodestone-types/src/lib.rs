//! Shared model types for the lodestone distributed KV store.
//!
//! This crate is pure data: the versioned [`Value`] record, the merge
//! arbiter that totally orders values (modulo [`ValueCompare::Unknown`]),
//! key/originator filters, and the prost wire messages exchanged between
//! stores. Nothing here does IO.

pub mod compare;
pub mod consts;
pub mod convert;
pub mod filter;
pub mod value;
pub mod wire;

pub use compare::{compare_values, ValueCompare};
pub use filter::{FilterError, FilterOperator, KeyFilters};
pub use value::{AreaId, Value, ValueBody};
