//! Batch ingestion of agri-food production statistics.
//!
//! Raw payloads are fetched into a write-once [`raw_store`], then
//! [`loader::Loader`] normalizes them and loads only rows whose natural key is
//! not yet present in the destination [`table`].

pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod loader;
pub mod normalize;
pub mod notify;
pub mod output;
pub mod raw_store;
pub mod table;
