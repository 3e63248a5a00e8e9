//! Peer-facing HTTP server: the RPC endpoint and shared container files.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use swarmscan_p2p::{PeerCall, RpcReply, RpcService};
use tracing::{debug, warn};

const MALICIOUS_PAGE: &str = "<html><head><title>Blocked</title></head>\
<body><h1>Download blocked</h1>\
<p>This object was classified as malicious by your peers or your local scanner.</p>\
</body></html>";

struct ShareState {
    rpc: RpcService,
    share_dir: PathBuf,
}

/// Routes: `POST /rpc`, `GET /{share_root}/{name}` and the deny page.
pub fn router(rpc: RpcService, share_dir: PathBuf, share_root: &str) -> Router {
    let state = Arc::new(ShareState { rpc, share_dir });
    let share_route = format!("/{}/:name", share_root.trim_matches('/'));
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route(&share_route, get(serve_container))
        .route("/malicious.html", get(malicious_page))
        .with_state(state)
}

async fn handle_rpc(State(state): State<Arc<ShareState>>, Json(call): Json<PeerCall>) -> Json<RpcReply> {
    Json(state.rpc.handle(call))
}

/// Container file names are uuids, logs carry a `.log` suffix.
fn is_container_name(name: &str) -> bool {
    let stem = name.strip_suffix(".log").unwrap_or(name);
    !stem.is_empty() && stem.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

async fn serve_container(
    State(state): State<Arc<ShareState>>,
    Path(name): Path<String>,
) -> Result<Vec<u8>, StatusCode> {
    if !is_container_name(&name) {
        warn!(%name, "refused container download");
        return Err(StatusCode::NOT_FOUND);
    }
    match tokio::fs::read(state.share_dir.join(&name)).await {
        Ok(bytes) => {
            debug!(%name, bytes = bytes.len(), "container served");
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(%name, error = %e, "failed to read container");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn malicious_page() -> Html<&'static str> {
    Html(MALICIOUS_PAGE)
}
