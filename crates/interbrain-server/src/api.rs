use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use interbrain_core::{
    CompositionReport, Coordinator, DecisionOutcome, DependencyAnalysis, LedgerEntry, ReceivedShare, SyncPreview,
};
use interbrain_shared::{ChangeHash, Identity, NodeKind, PeerId, RelationshipRecord, Rid, VisibilityScope};
use interbrain_store::{NodeRecord, SyncRun};
use interbrain_vcs::Delegate;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;

type ApiResult<T> = Result<Json<T>, ServerError>;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub identity: Arc<Identity>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/trust/followed", get(list_followed))
        .route("/trust/follow", post(follow))
        .route("/trust/unfollow", post(unfollow))
        .route("/nodes", get(list_nodes).post(create_node))
        .route("/nodes/clone", post(clone_node))
        .route("/nodes/delegates", get(list_delegates).post(add_delegate))
        .route("/nodes/scope", post(set_scope))
        .route("/nodes/collaborators", get(collaborators))
        .route("/sync/preview", post(preview))
        .route("/sync/accept", post(accept_change))
        .route("/sync/reject", post(reject_change))
        .route("/sync/runs", get(sync_runs))
        .route("/dependencies/analyze", post(analyze_dependencies))
        .route("/dependencies/sync", post(sync_dependencies))
        .route("/contacts/relationships", get(relationships))
        .route("/contacts/link", post(link))
        .route("/contacts/unlink", post(unlink))
        .route("/memory", get(ledger_entries))
        .route("/memory/quarantine", post(quarantine))
        .route("/share/create", post(create_share_link))
        .route("/share/receive", post(receive_share_link))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

async fn require_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(expected) = &state.config.api_token {
        verify_token(&headers, expected)?;
    }
    Ok(next.run(request).await)
}

fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let (token, expected) = (token.as_bytes(), expected.as_bytes());
    if token.len() != expected.len() || token.ct_eq(expected).unwrap_u8() != 1 {
        return Err(ServerError::Unauthorized);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

fn parse_peer(raw: &str) -> Result<PeerId, ServerError> {
    raw.parse()
        .map_err(|e| ServerError::BadRequest(format!("peer: {e}")))
}

fn parse_hash(raw: &str) -> Result<ChangeHash, ServerError> {
    ChangeHash::parse(raw).ok_or_else(|| ServerError::BadRequest(format!("not a commit hash: {raw}")))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct PeerRequest {
    peer: String,
}

#[derive(Deserialize)]
struct RidQuery {
    rid: Rid,
}

#[derive(Deserialize)]
struct CreateNodeRequest {
    title: String,
}

#[derive(Deserialize)]
struct CloneNodeRequest {
    rid: Rid,
    peer: String,
    dir_name: Option<String>,
}

#[derive(Deserialize)]
struct DelegateRequest {
    rid: Rid,
    peer: String,
    #[serde(default = "default_weight")]
    weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Deserialize)]
struct ScopeRequest {
    rid: Rid,
    scope: String,
}

#[derive(Deserialize)]
struct DecisionRequest {
    rid: Rid,
    peer: String,
    hash: String,
}

#[derive(Deserialize)]
struct RunsQuery {
    rid: Rid,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    content_path: PathBuf,
}

#[derive(Deserialize)]
struct ComposeRequest {
    rid: Rid,
    analysis: DependencyAnalysis,
}

#[derive(Deserialize)]
struct LinkRequest {
    peer: String,
    rid: Rid,
}

#[derive(Deserialize)]
struct LedgerQuery {
    peer: String,
    rid: Rid,
}

#[derive(Deserialize)]
struct ShareRequest {
    alias: Option<String>,
    rids: Vec<Rid>,
}

#[derive(Serialize)]
struct ShareResponse {
    link: String,
}

#[derive(Deserialize)]
struct ReceiveRequest {
    link: String,
}

#[derive(Serialize)]
struct ChangedResponse {
    changed: bool,
}

#[derive(Serialize)]
struct QuarantineResponse {
    moved_to: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_followed(State(state): State<AppState>) -> ApiResult<Vec<PeerId>> {
    Ok(Json(state.coordinator.trust().list_followed().await?))
}

async fn follow(State(state): State<AppState>, Json(req): Json<PeerRequest>) -> ApiResult<ChangedResponse> {
    let peer = parse_peer(&req.peer)?;
    state.coordinator.trust().follow(&peer).await?;
    Ok(Json(ChangedResponse { changed: true }))
}

async fn unfollow(State(state): State<AppState>, Json(req): Json<PeerRequest>) -> ApiResult<ChangedResponse> {
    let peer = parse_peer(&req.peer)?;
    state.coordinator.trust().unfollow(&peer).await?;
    Ok(Json(ChangedResponse { changed: true }))
}

async fn list_nodes(State(state): State<AppState>) -> ApiResult<Vec<NodeRecord>> {
    Ok(Json(state.coordinator.vault().list_nodes(Some(NodeKind::Dream))?))
}

async fn create_node(State(state): State<AppState>, Json(req): Json<CreateNodeRequest>) -> ApiResult<NodeRecord> {
    if req.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title must not be empty".into()));
    }
    Ok(Json(state.coordinator.vault().create_node(req.title.trim()).await?))
}

async fn clone_node(State(state): State<AppState>, Json(req): Json<CloneNodeRequest>) -> ApiResult<NodeRecord> {
    let peer = parse_peer(&req.peer)?;
    let node = state
        .coordinator
        .vault()
        .clone_node(&req.rid, &peer, req.dir_name.as_deref())
        .await?;
    Ok(Json(node))
}

async fn list_delegates(State(state): State<AppState>, Query(q): Query<RidQuery>) -> ApiResult<Vec<Delegate>> {
    Ok(Json(state.coordinator.trust().list_delegates(&q.rid).await?))
}

async fn add_delegate(State(state): State<AppState>, Json(req): Json<DelegateRequest>) -> ApiResult<ChangedResponse> {
    let peer = parse_peer(&req.peer)?;
    state.coordinator.trust().add_delegate(&req.rid, &peer, req.weight).await?;
    Ok(Json(ChangedResponse { changed: true }))
}

async fn set_scope(State(state): State<AppState>, Json(req): Json<ScopeRequest>) -> ApiResult<ChangedResponse> {
    let scope: VisibilityScope = req
        .scope
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("unknown scope: {}", req.scope)))?;
    state.coordinator.trust().set_visibility_scope(&req.rid, scope).await?;
    Ok(Json(ChangedResponse { changed: true }))
}

async fn collaborators(State(state): State<AppState>, Query(q): Query<RidQuery>) -> ApiResult<Vec<PeerId>> {
    Ok(Json(state.coordinator.trust().collaborators(&q.rid).await?))
}

async fn preview(State(state): State<AppState>, Json(q): Json<RidQuery>) -> ApiResult<SyncPreview> {
    let preview = state.coordinator.sync().preview(&q.rid).await?;
    state.coordinator.record_run(&preview)?;
    Ok(Json(preview))
}

async fn accept_change(State(state): State<AppState>, Json(req): Json<DecisionRequest>) -> ApiResult<DecisionOutcome> {
    let (peer, hash) = (parse_peer(&req.peer)?, parse_hash(&req.hash)?);
    Ok(Json(state.coordinator.sync().accept_change(&req.rid, &peer, &hash).await?))
}

async fn reject_change(State(state): State<AppState>, Json(req): Json<DecisionRequest>) -> ApiResult<DecisionOutcome> {
    let (peer, hash) = (parse_peer(&req.peer)?, parse_hash(&req.hash)?);
    Ok(Json(state.coordinator.sync().reject_change(&req.rid, &peer, &hash).await?))
}

async fn sync_runs(State(state): State<AppState>, Query(q): Query<RunsQuery>) -> ApiResult<Vec<SyncRun>> {
    let limit = q.limit.unwrap_or(20).min(200);
    Ok(Json(state.coordinator.recent_runs(&q.rid, limit)?))
}

async fn analyze_dependencies(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<DependencyAnalysis> {
    Ok(Json(state.coordinator.composer().analyze_dependencies(&req.content_path).await?))
}

async fn sync_dependencies(
    State(state): State<AppState>,
    Json(req): Json<ComposeRequest>,
) -> ApiResult<CompositionReport> {
    Ok(Json(state.coordinator.composer().sync_dependencies(&req.rid, &req.analysis).await?))
}

async fn relationships(
    State(state): State<AppState>,
    Query(q): Query<PeerRequest>,
) -> ApiResult<RelationshipRecord> {
    let peer = parse_peer(&q.peer)?;
    Ok(Json(state.coordinator.contacts().relationships(&peer).await?))
}

async fn link(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> ApiResult<ChangedResponse> {
    let peer = parse_peer(&req.peer)?;
    let changed = state.coordinator.contacts().link(&peer, &req.rid).await?;
    Ok(Json(ChangedResponse { changed }))
}

async fn unlink(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> ApiResult<ChangedResponse> {
    let peer = parse_peer(&req.peer)?;
    let changed = state.coordinator.contacts().unlink(&peer, &req.rid).await?;
    Ok(Json(ChangedResponse { changed }))
}

async fn ledger_entries(State(state): State<AppState>, Query(q): Query<LedgerQuery>) -> ApiResult<Vec<LedgerEntry>> {
    let peer = parse_peer(&q.peer)?;
    Ok(Json(state.coordinator.memory().entries(&peer, &q.rid).await?))
}

async fn quarantine(State(state): State<AppState>, Json(req): Json<PeerRequest>) -> ApiResult<QuarantineResponse> {
    let peer = parse_peer(&req.peer)?;
    let moved_to = state.coordinator.memory().quarantine(&peer).await?;
    Ok(Json(QuarantineResponse { moved_to }))
}

async fn create_share_link(State(state): State<AppState>, Json(req): Json<ShareRequest>) -> ApiResult<ShareResponse> {
    if req.rids.is_empty() {
        return Err(ServerError::BadRequest("nothing to share".into()));
    }
    let link = state.coordinator.share_link(&state.identity, req.alias, req.rids).await?;
    Ok(Json(ShareResponse { link }))
}

async fn receive_share_link(
    State(state): State<AppState>,
    Json(req): Json<ReceiveRequest>,
) -> ApiResult<ReceivedShare> {
    Ok(Json(state.coordinator.receive_share_link(&req.link).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use interbrain_core::SyncConfig;
    use interbrain_store::Database;
    use interbrain_vcs::SimHub;
    use tower::ServiceExt;

    use super::*;

    fn state(dir: &tempfile::TempDir, token: Option<&str>) -> AppState {
        let hub = SimHub::new();
        let identity = Identity::generate();
        let root = dir.path().join("vault");
        std::fs::create_dir_all(&root).unwrap();
        let coordinator = Coordinator::new(
            root,
            Database::open_at(&dir.path().join("registry.db")).unwrap(),
            Arc::new(hub.engine()),
            Arc::new(hub.network_for(identity.peer_id())),
            SyncConfig::default(),
        );
        AppState {
            coordinator,
            identity: Arc::new(identity),
            config: Arc::new(ServerConfig {
                api_token: token.map(str::to_string),
                ..ServerConfig::default()
            }),
        }
    }

    fn post(uri: &str, body: serde_json::Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_token_guards_everything_but_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(&dir, Some("secret")));

        let health = Request::get("/health").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(health).await.unwrap().status(), StatusCode::OK);

        let anonymous = Request::get("/trust/followed").body(Body::empty()).unwrap();
        assert_eq!(
            app.clone().oneshot(anonymous).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let wrong = Request::get("/trust/followed")
            .header("authorization", "Bearer secreT")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);

        let ok = Request::get("/trust/followed")
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(ok).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_create_node_and_share_it() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(&dir, None));

        let response = app
            .clone()
            .oneshot(post("/nodes", serde_json::json!({ "title": "Garden" }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let node = json(response).await;
        assert_eq!(node["title"], "Garden");
        let rid = node["rid"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post("/share/create", serde_json::json!({ "rids": [rid] }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let link = json(response).await["link"].as_str().unwrap().to_string();
        assert!(link.starts_with("interbrain://share/"));

        // the daemon's own link is refused
        let response = app
            .oneshot(post("/share/receive", serde_json::json!({ "link": link }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_errors_map_to_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(&dir, None));

        let bad_hash = post(
            "/sync/accept",
            serde_json::json!({ "rid": "rad:zmissing", "peer": Identity::generate().peer_id(), "hash": "xyz" }),
            None,
        );
        assert_eq!(app.clone().oneshot(bad_hash).await.unwrap().status(), StatusCode::BAD_REQUEST);

        let unknown = post("/sync/preview", serde_json::json!({ "rid": "rad:zmissing" }), None);
        let response = app.oneshot(unknown).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(json(response).await["error"].as_str().unwrap().contains("rad:zmissing"));
    }
}
