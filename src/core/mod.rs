//! Registry internals
//!
//! Leaves first: `model` and `table` know nothing of each other except the
//! object types; `store` caches objects and loads them through `table`;
//! `linker` and `notify` mutate the store and report changes; `registry` is
//! the facade over all of it.

pub mod config;
pub mod error;
pub mod files;
pub mod handle;
pub mod linker;
pub mod model;
pub mod module;
pub mod notify;
pub mod registry;
pub mod store;
pub mod table;

pub use registry::ExtensionRegistry;
