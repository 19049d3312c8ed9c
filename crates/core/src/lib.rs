//! amanmcp core — AST-aware chunking, hybrid query classification and
//! fusion, and the per-project store contracts the daemon serves from.

pub mod chunker;
pub mod classify;
pub mod config;
pub mod embed;
pub mod error;
pub mod search;
pub mod store;
pub mod types;

pub use error::{Error, Result};
