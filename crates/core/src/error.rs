//! Error taxonomy with stable RPC error codes.
//!
//! Transient store/embedder failures are retried locally by the callers;
//! client errors carry their code to the wire unchanged; compaction errors
//! are logged and never surfaced; fatal startup errors exit the process.

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire error codes (stable)
// ---------------------------------------------------------------------------

pub mod codes {
    pub const PARSE: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;
    pub const PROJECT_NOT_INDEXED: i64 = -32001;
    pub const SEARCH_FAILED: i64 = -32002;
}

// ---------------------------------------------------------------------------
// Library error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("project not indexed: {}", .0.display())]
    ProjectNotIndexed(PathBuf),

    #[error("search_failed: {0}")]
    SearchFailed(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("embedder error: {0}")]
    Embed(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map to the stable numeric code surfaced on the wire.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::ProjectNotIndexed(_) => codes::PROJECT_NOT_INDEXED,
            Error::SearchFailed(_) => codes::SEARCH_FAILED,
            _ => codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_code_mapping() {
        assert_eq!(Error::InvalidParams("query".into()).rpc_code(), -32602);
        assert_eq!(Error::ProjectNotIndexed(PathBuf::from("/x")).rpc_code(), -32001);
        assert_eq!(Error::SearchFailed("both backends down".into()).rpc_code(), -32002);
        assert_eq!(Error::Store("closed".into()).rpc_code(), -32603);
    }

    #[test]
    fn test_invalid_params_mentions_field() {
        let e = Error::InvalidParams("query must not be empty".into());
        assert!(e.to_string().contains("query"));
    }
}
