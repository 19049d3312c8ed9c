//! Loopback JSON-RPC server over a unix stream socket.
//!
//! Framing is one JSON object per line in each direction. Each accepted
//! connection runs on its own task and handles requests sequentially, so
//! per-connection response order matches request order. A malformed
//! request gets a parse-error response and the connection is closed.

use crate::compact::CompactionManager;
use crate::indexer;
use crate::registry::ProjectRegistry;
use amanmcp_core::classify::QueryClassifier;
use amanmcp_core::config::Config;
use amanmcp_core::embed::Embedder;
use amanmcp_core::error::codes;
use amanmcp_core::search::{ContentFilter, HybridSearchEngine, SearchRequest, DEFAULT_LIMIT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection read deadline.
pub const READ_DEADLINE: Duration = Duration::from_secs(30);
/// Shutdown grace for in-flight handlers.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    root_path: String,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
    #[serde(default)]
    bm25_only: bool,
    #[serde(default)]
    explain: bool,
}

#[derive(Deserialize)]
struct IndexParams {
    root_path: String,
}

fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct RpcServer {
    registry: Arc<ProjectRegistry>,
    compaction: CompactionManager,
    engine: Arc<HybridSearchEngine>,
    embedder: Option<Arc<dyn Embedder>>,
    config: Config,
    started_at: Instant,
}

impl RpcServer {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        compaction: CompactionManager,
        embedder: Option<Arc<dyn Embedder>>,
        config: Config,
    ) -> Arc<Self> {
        let classifier = Arc::new(QueryClassifier::new(config.classifier_cache_size));
        let engine = Arc::new(HybridSearchEngine::new(classifier, config.rrf_constant));
        Arc::new(Self {
            registry,
            compaction,
            engine,
            embedder,
            config,
            started_at: Instant::now(),
        })
    }

    /// Accept loop. Stops accepting on cancellation, then waits out the
    /// grace period for in-flight handlers before abandoning them.
    pub async fn serve(
        self: Arc<Self>,
        listener: UnixListener,
        shutdown: CancellationToken,
        grace: Duration,
    ) {
        let mut handlers = JoinSet::new();
        info!("rpc server accepting connections");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let server = Arc::clone(&self);
                            let token = shutdown.clone();
                            handlers.spawn(async move {
                                server.handle_connection(stream, token).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
        drop(listener);

        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(remaining = handlers.len(), "grace period expired, abandoning handlers");
            handlers.abort_all();
        }
        info!("rpc server stopped");
    }

    /// Handle one connection: requests are processed strictly in order;
    /// a parse error or an expired read deadline ends the connection.
    async fn handle_connection(self: Arc<Self>, stream: UnixStream, shutdown: CancellationToken) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                _ = shutdown.cancelled() => return,
                read = tokio::time::timeout(READ_DEADLINE, reader.read_line(&mut line)) => read,
            };
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    debug!(error = %e, "connection read error");
                    return;
                }
                Err(_) => {
                    debug!("read deadline expired, closing connection");
                    return;
                }
            };
            if n == 0 {
                return;
            }
            if line.trim().is_empty() {
                continue;
            }

            let msg: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => {
                    let resp = error_response(Value::Null, codes::PARSE, "Parse error");
                    let _ = write_response(&mut write_half, &resp).await;
                    return;
                }
            };

            let response = self.dispatch(msg).await;
            if write_response(&mut write_half, &response).await.is_err() {
                return;
            }
        }
    }

    /// Dispatch one decoded request to its method handler.
    pub async fn dispatch(&self, msg: Value) -> Value {
        let id = msg.get("id").cloned().unwrap_or(Value::Null);

        if msg.get("jsonrpc").and_then(|v| v.as_str()) != Some("2.0") {
            return error_response(id, codes::INVALID_REQUEST, "expected jsonrpc \"2.0\"");
        }
        let Some(method) = msg.get("method").and_then(|v| v.as_str()) else {
            return error_response(id, codes::INVALID_REQUEST, "missing method");
        };
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        match method {
            "ping" => result_response(id, json!({ "pong": true })),
            "status" => result_response(id, self.status()),
            "search" => self.handle_search(id, params).await,
            "index" => self.handle_index(id, params).await,
            other => error_response(
                id,
                codes::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        }
    }

    fn status(&self) -> Value {
        let projects: Vec<Value> = self
            .registry
            .loaded()
            .into_iter()
            .filter_map(|root| {
                let handle = self.registry.peek(&root)?;
                let stores = handle.stores();
                let stats = stores.vector.stats();
                Some(json!({
                    "root": root.to_string_lossy(),
                    "chunks": stores.metadata.chunk_count(),
                    "keyword_docs": stores.keyword.len(),
                    "vector_nodes": stats.nodes,
                    "vector_orphans": stats.orphans,
                    "vector_dim": stats.dim,
                    "compacting": self.compaction.is_compacting(&root),
                    "loaded_secs": handle.loaded_at().elapsed().as_secs(),
                }))
            })
            .collect();
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "embedder": self.embedder.as_ref().map(|e| e.name()),
            "max_projects": self.config.max_projects,
            "projects": projects,
        })
    }

    async fn handle_search(&self, id: Value, params: Value) -> Value {
        let params: SearchParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return error_response(id, codes::INVALID_PARAMS, format!("invalid params: {e}"))
            }
        };
        if params.query.trim().is_empty() {
            return error_response(id, codes::INVALID_PARAMS, "query must not be empty");
        }
        let root = match resolve_root(&params.root_path) {
            Ok(r) => r,
            Err(msg) => return error_response(id, codes::INVALID_PARAMS, msg),
        };
        let filter = match params.filter.as_deref() {
            None => ContentFilter::All,
            Some(s) => match ContentFilter::parse(s) {
                Some(f) => f,
                None => {
                    return error_response(
                        id,
                        codes::INVALID_PARAMS,
                        format!("filter must be one of all, code, docs; got {s:?}"),
                    )
                }
            },
        };

        let handle = match self.registry.acquire(&root) {
            Ok(h) => h,
            Err(e) => return error_response(id, e.rpc_code(), e.to_string()),
        };

        // An in-flight compaction yields to the search now, whatever the
        // search outcome; only the idle-timer reset waits for success.
        self.compaction.interrupt(&root);

        let mut request = SearchRequest::new(params.query);
        request.limit = match params.limit {
            Some(n) if n > 0 => n as usize,
            _ => DEFAULT_LIMIT,
        };
        request.filters.content = filter;
        request.filters.language = params.language;
        request.filters.scopes = params.scopes.unwrap_or_default();
        request.bm25_only = params.bm25_only;
        request.explain = params.explain;

        let stores = handle.stores();
        let engine = Arc::clone(&self.engine);
        let embedder = self.embedder.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            engine.search(&stores, embedder.as_deref(), &request)
        })
        .await;

        match outcome {
            Ok(Ok(results)) => {
                self.compaction.notify_search(&root);
                result_response(id, json!(results))
            }
            Ok(Err(e)) => error_response(id, e.rpc_code(), e.to_string()),
            Err(e) => error_response(id, codes::INTERNAL, format!("search task failed: {e}")),
        }
    }

    async fn handle_index(&self, id: Value, params: Value) -> Value {
        let params: IndexParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return error_response(id, codes::INVALID_PARAMS, format!("invalid params: {e}"))
            }
        };
        let root = match resolve_root(&params.root_path) {
            Ok(r) => r,
            Err(msg) => return error_response(id, codes::INVALID_PARAMS, msg),
        };

        let registry = Arc::clone(&self.registry);
        let embedder = self.embedder.clone();
        let chunker_config = self.config.chunker();
        let exclude = self.config.exclude.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            indexer::index_project(
                &registry,
                embedder.as_deref(),
                chunker_config,
                &exclude,
                &root,
            )
        })
        .await;

        match outcome {
            Ok(Ok(counts)) => {
                result_response(id, json!({ "files": counts.files, "chunks": counts.chunks }))
            }
            Ok(Err(e)) => error_response(id, e.rpc_code(), e.to_string()),
            Err(e) => error_response(id, codes::INTERNAL, format!("index task failed: {e}")),
        }
    }
}

fn resolve_root(root_path: &str) -> Result<PathBuf, String> {
    if root_path.is_empty() {
        return Err("root_path must not be empty".to_string());
    }
    std::fs::canonicalize(root_path)
        .map_err(|e| format!("root_path not resolvable: {e}"))
}

async fn write_response(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| {
        "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\"encode error\"}}"
            .to_string()
    });
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use amanmcp_core::embed::HashEmbedder;

    fn test_server() -> (tempfile::TempDir, Arc<RpcServer>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ProjectRegistry::new(2));
        let compaction = CompactionManager::new(
            Arc::clone(&registry),
            amanmcp_core::config::CompactionConfig::default(),
            CancellationToken::new(),
        );
        let server = RpcServer::new(
            registry,
            compaction,
            Some(Arc::new(HashEmbedder::default())),
            Config::default(),
        );
        (dir, server)
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, server) = test_server();
        let resp = server
            .dispatch(json!({ "jsonrpc": "2.0", "method": "ping", "id": "1" }))
            .await;
        assert_eq!(resp, json!({ "jsonrpc": "2.0", "id": "1", "result": { "pong": true } }));
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let (_dir, server) = test_server();
        let resp = server
            .dispatch(json!({ "jsonrpc": "2.0", "method": "nope", "id": 7 }))
            .await;
        assert_eq!(resp["error"]["code"], json!(codes::METHOD_NOT_FOUND));
        assert_eq!(resp["id"], json!(7));
    }

    #[tokio::test]
    async fn test_invalid_request_without_version() {
        let (_dir, server) = test_server();
        let resp = server.dispatch(json!({ "method": "ping", "id": 1 })).await;
        assert_eq!(resp["error"]["code"], json!(codes::INVALID_REQUEST));
    }

    #[tokio::test]
    async fn test_search_empty_query_rejected() {
        let (_dir, server) = test_server();
        let resp = server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "search",
                "params": { "query": "", "root_path": "/tmp" },
                "id": 2
            }))
            .await;
        assert_eq!(resp["error"]["code"], json!(codes::INVALID_PARAMS));
        assert!(resp["error"]["message"].as_str().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn test_search_unindexed_project() {
        let (dir, server) = test_server();
        let root = dir.path().join("bare");
        std::fs::create_dir_all(&root).unwrap();
        let resp = server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "search",
                "params": { "query": "anything", "root_path": root.to_string_lossy() },
                "id": 3
            }))
            .await;
        assert_eq!(resp["error"]["code"], json!(codes::PROJECT_NOT_INDEXED));
    }

    #[tokio::test]
    async fn test_index_then_search_roundtrip() {
        let (dir, server) = test_server();
        let root = dir.path().join("proj");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(
            root.join("src/lib.rs"),
            "pub fn evict_least_recently_used() -> bool {\n    true\n}\n",
        )
        .unwrap();

        let resp = server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "index",
                "params": { "root_path": root.to_string_lossy() },
                "id": 4
            }))
            .await;
        assert!(resp["result"]["chunks"].as_u64().unwrap() >= 1, "index response: {resp}");

        let resp = server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "search",
                "params": {
                    "query": "evict_least_recently_used",
                    "root_path": root.to_string_lossy(),
                    "explain": true
                },
                "id": 5
            }))
            .await;
        let results = resp["result"].as_array().expect("search results");
        assert!(!results.is_empty(), "search response: {resp}");
        assert_eq!(results[0]["file_path"], json!("src/lib.rs"));
        assert!(results[0]["explain"].is_object());
    }

    #[tokio::test]
    async fn test_negative_limit_corrected_to_default() {
        let (dir, server) = test_server();
        let root = dir.path().join("proj");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn one() {}\n").unwrap();
        server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "index",
                "params": { "root_path": root.to_string_lossy() },
                "id": 1
            }))
            .await;

        let resp = server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "search",
                "params": { "query": "one", "root_path": root.to_string_lossy(), "limit": -5 },
                "id": 2
            }))
            .await;
        assert!(resp["result"].is_array(), "negative limit must not error: {resp}");
    }

    #[tokio::test]
    async fn test_status_lists_projects() {
        let (dir, server) = test_server();
        let root = dir.path().join("proj");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn one() {}\n").unwrap();
        server
            .dispatch(json!({
                "jsonrpc": "2.0",
                "method": "index",
                "params": { "root_path": root.to_string_lossy() },
                "id": 1
            }))
            .await;

        let resp = server
            .dispatch(json!({ "jsonrpc": "2.0", "method": "status", "id": 2 }))
            .await;
        let status = &resp["result"];
        assert!(status["version"].is_string());
        assert_eq!(status["projects"].as_array().unwrap().len(), 1);
    }
}
