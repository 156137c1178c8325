//! HTTP API surface.
//!
//! JSON in and out, with every response carrying `"success"`. The
//! tenant endpoints carry no auth of their own: the CTFd-facing
//! frontend validates player tokens through `/api/validate-token`
//! before acting on anyone's behalf. The admin endpoints require the
//! shared `X-API-Secret` header.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::WebshellError;
use crate::identity::CtfdClient;
use crate::manager::WebshellManager;
use crate::naming::{is_valid_username, sanitize_team_name};

pub struct AppState {
    pub manager: Arc<WebshellManager>,
    pub identity: Arc<CtfdClient>,
    pub api_secret: String,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

fn bad_request(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers
        .get("x-api-secret")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if provided == state.api_secret {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/validate-token", post(validate_token))
        .route("/api/status", post(container_status))
        .route("/api/create", post(create_container))
        .route("/api/delete", post(delete_container))
        .route("/api/restart", post(restart_container))
        .route("/api/admin/list", get(admin_list))
        .route("/api/admin/cleanup", post(admin_cleanup))
        .with_state(state)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TokenRequest {
    token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TeamRequest {
    team_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CreateRequest {
    team_name: Option<String>,
    username: Option<String>,
}

/// Pull the raw team name out of a request body, trim it, reject empty,
/// and sanitize it into the tenant key everything else is derived from.
fn required_team(team_name: Option<String>) -> Result<String, ApiError> {
    let raw = team_name.unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(bad_request("Team name is required"));
    }
    Ok(sanitize_team_name(raw))
}

// ── GET /health ─────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "webshell-api" }))
}

// ── POST /api/validate-token ────────────────────────────────────────────

async fn validate_token(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TokenRequest>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let token = body.token.unwrap_or_default();
    let token = token.trim();
    if token.is_empty() {
        return Err(bad_request("Token is required"));
    }

    let identity = state
        .identity
        .validate_token(token)
        .await
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

    Ok(Json(json!({
        "success": true,
        "user_id": identity.user_id,
        "username": identity.username,
        "team_id": identity.team_id,
        "team_name": identity.team_name,
    })))
}

// ── POST /api/status ────────────────────────────────────────────────────

async fn container_status(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TeamRequest>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let team = required_team(body.team_name)?;

    match state.manager.status(&team).await {
        Ok(Some(info)) => Ok(Json(json!({
            "success": true,
            "has_container": true,
            "container_id": info.container_id,
            "status": info.status,
            "team_name": info.team_name,
            "username": info.username,
            "webshell_url": info.webshell_url,
            "created_at": info.created_at,
            "expires_at": info.expires_at,
        }))),
        Ok(None) => Ok(Json(json!({ "success": true, "has_container": false }))),
        Err(err) => {
            error!(team = %team, error = %err, "status lookup failed");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ))
        }
    }
}

// ── POST /api/create ────────────────────────────────────────────────────

async fn create_container(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateRequest>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let team = required_team(body.team_name)?;
    let username = body.username.unwrap_or_default();
    let username = username.trim();
    if username.is_empty() {
        return Err(bad_request("Username is required"));
    }
    if !is_valid_username(username) {
        return Err(bad_request("Invalid username format"));
    }

    let outcome = state
        .manager
        .create(&team, username)
        .await
        .map_err(create_failure)?;

    let message = if outcome.already_exists {
        "Container already exists"
    } else {
        "Container created successfully"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "webshell_url": outcome.webshell_url,
        "container_id": outcome.container_id,
    })))
}

fn create_failure(err: WebshellError) -> ApiError {
    error!(error = %err, "container creation failed");
    match err {
        WebshellError::ImageMissing(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webshell image not found. Please contact admin.",
        ),
        WebshellError::Runtime(detail) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to create container: {detail}"),
        ),
        _ => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error creating container",
        ),
    }
}

// ── POST /api/delete ────────────────────────────────────────────────────

async fn delete_container(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TeamRequest>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let team = required_team(body.team_name)?;

    state.manager.delete(&team).await.map_err(|err| {
        error!(team = %team, error = %err, "container deletion failed");
        match err {
            WebshellError::Runtime(detail) => api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to delete container: {detail}"),
            ),
            _ => api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error deleting container",
            ),
        }
    })?;

    // A team without a container deletes to the same place; the surface
    // reports one success shape either way.
    Ok(Json(json!({
        "success": true,
        "message": "Container stopped successfully",
    })))
}

// ── POST /api/restart ───────────────────────────────────────────────────

async fn restart_container(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TeamRequest>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let team = required_team(body.team_name)?;

    match state.manager.restart(&team).await {
        Ok(()) => Ok(Json(json!({
            "success": true,
            "message": "Container restarted",
        }))),
        Err(WebshellError::NotFound(_)) => {
            Err(api_error(StatusCode::NOT_FOUND, "Container does not exist"))
        }
        Err(err) => {
            error!(team = %team, error = %err, "container restart failed");
            Err(match err {
                WebshellError::Runtime(detail) => api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to restart container: {detail}"),
                ),
                _ => api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error restarting container",
                ),
            })
        }
    }
}

// ── GET /api/admin/list ─────────────────────────────────────────────────

async fn admin_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;

    let containers = state.manager.list_all().await.map_err(|err| {
        error!(error = %err, "container listing failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })?;

    Ok(Json(json!({
        "success": true,
        "count": containers.len(),
        "containers": containers,
    })))
}

// ── POST /api/admin/cleanup ─────────────────────────────────────────────

async fn admin_cleanup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;

    let report = state.manager.cleanup_expired().await.map_err(|err| {
        error!(error = %err, "expiry sweep failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })?;

    Ok(Json(json!({
        "success": true,
        "cleaned": report.cleaned,
        "errors": report.errors,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::naming::{LABEL_CREATED, LABEL_EXPIRES, LABEL_TEAM, LABEL_USERNAME};
    use crate::runtime::testing::{FailKind, RecordingRuntime};
    use std::collections::HashMap;

    fn test_state() -> (Arc<AppState>, RecordingRuntime) {
        let runtime = RecordingRuntime::default();
        let config = ServiceConfig {
            // Nothing listens on port 1, so token validation always fails
            // fast without leaving the host.
            ctfd_url: "http://127.0.0.1:1".to_string(),
            webshell_base_url: "https://shell.example.org".to_string(),
            api_secret: "s3cret".to_string(),
            ..Default::default()
        };
        let manager = WebshellManager::new(Arc::new(runtime.clone()), &config).unwrap();
        let identity = CtfdClient::new(&config.ctfd_url).unwrap();
        let state = Arc::new(AppState {
            manager: Arc::new(manager),
            identity: Arc::new(identity),
            api_secret: config.api_secret,
        });
        (state, runtime)
    }

    fn team_labels(team: &str, username: &str) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_TEAM.to_string(), team.to_string());
        labels.insert(LABEL_USERNAME.to_string(), username.to_string());
        labels.insert(LABEL_CREATED.to_string(), "2024-01-01T00:00:00Z".to_string());
        labels.insert(LABEL_EXPIRES.to_string(), "2030-01-01T00:00:00Z".to_string());
        labels
    }

    fn admin_headers(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-secret", secret.parse().unwrap());
        headers
    }

    fn error_message(err: &ApiError) -> String {
        err.1["error"].as_str().unwrap_or_default().to_string()
    }

    // ==================== Health Tests ====================

    #[tokio::test]
    async fn test_health_payload() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "webshell-api");
    }

    // ==================== Token Validation Tests ====================

    #[tokio::test]
    async fn test_validate_token_requires_token() {
        let (state, _runtime) = test_state();

        let err = validate_token(State(state.clone()), None).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&err), "Token is required");

        let err = validate_token(
            State(state.clone()),
            Some(Json(TokenRequest {
                token: Some(String::new()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        // Whitespace trims away to nothing.
        let err = validate_token(
            State(state),
            Some(Json(TokenRequest {
                token: Some("   ".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&err), "Token is required");
    }

    #[tokio::test]
    async fn test_validate_token_unreachable_ctfd_is_unauthorized() {
        let (state, _runtime) = test_state();
        let err = validate_token(
            State(state),
            Some(Json(TokenRequest {
                token: Some("ctfd_deadbeef".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&err), "Invalid or expired token");
    }

    // ==================== Status Tests ====================

    #[tokio::test]
    async fn test_status_requires_team_name() {
        let (state, _runtime) = test_state();
        let err = container_status(State(state), None).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&err), "Team name is required");
    }

    #[tokio::test]
    async fn test_status_whitespace_team_name_rejected() {
        // Must not slip through and land on the `team` fallback tenant.
        let (state, _runtime) = test_state();
        let err = container_status(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("   ".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&err), "Team name is required");
    }

    #[tokio::test]
    async fn test_status_without_container() {
        let (state, _runtime) = test_state();
        let Json(body) = container_status(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("alpha".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["has_container"], false);
    }

    #[tokio::test]
    async fn test_status_sanitizes_team_name() {
        let (state, runtime) = test_state();
        runtime.with_container(
            "webshell-team-alpha",
            "running",
            team_labels("team-alpha", "player1"),
        );

        let Json(body) = container_status(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("Team Alpha!!".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(body["has_container"], true);
        assert_eq!(body["status"], "running");
        assert_eq!(body["username"], "player1");
        assert_eq!(
            body["webshell_url"],
            "https://shell.example.org/team-alpha"
        );
        assert_eq!(body["expires_at"], "2030-01-01T00:00:00Z");
    }

    // ==================== Create Tests ====================

    #[tokio::test]
    async fn test_create_validates_input() {
        let (state, _runtime) = test_state();

        let err = create_container(State(state.clone()), None).await.unwrap_err();
        assert_eq!(error_message(&err), "Team name is required");

        let err = create_container(
            State(state.clone()),
            Some(Json(CreateRequest {
                team_name: Some("alpha".to_string()),
                username: None,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(error_message(&err), "Username is required");

        let err = create_container(
            State(state.clone()),
            Some(Json(CreateRequest {
                team_name: Some("alpha".to_string()),
                username: Some("   ".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(error_message(&err), "Username is required");

        for bad in ["ab", "UPPER", "has space", "way_too_long_for_a_username"] {
            let err = create_container(
                State(state.clone()),
                Some(Json(CreateRequest {
                    team_name: Some("alpha".to_string()),
                    username: Some(bad.to_string()),
                })),
            )
            .await
            .unwrap_err();
            assert_eq!(err.0, StatusCode::BAD_REQUEST);
            assert_eq!(error_message(&err), "Invalid username format", "username: {bad}");
        }
    }

    #[tokio::test]
    async fn test_create_provisions_container() {
        let (state, runtime) = test_state();
        let Json(body) = create_container(
            State(state),
            Some(Json(CreateRequest {
                team_name: Some("Team Alpha!!".to_string()),
                username: Some("player1".to_string()),
            })),
        )
        .await
        .unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Container created successfully");
        assert_eq!(body["webshell_url"], "https://shell.example.org/team-alpha");
        assert_eq!(body["container_id"].as_str().unwrap().len(), 12);
        assert!(runtime.contains("webshell-team-alpha"));
    }

    #[tokio::test]
    async fn test_create_trims_padded_input() {
        let (state, runtime) = test_state();
        let Json(body) = create_container(
            State(state),
            Some(Json(CreateRequest {
                team_name: Some("  alpha  ".to_string()),
                username: Some(" bob ".to_string()),
            })),
        )
        .await
        .unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["webshell_url"], "https://shell.example.org/alpha");
        let spec = &runtime.created()[0];
        assert!(spec.env.contains(&"USERNAME=bob".to_string()));
        assert_eq!(spec.labels[LABEL_USERNAME], "bob");
    }

    #[tokio::test]
    async fn test_create_reports_already_exists() {
        let (state, runtime) = test_state();
        runtime.with_container(
            "webshell-alpha",
            "running",
            team_labels("alpha", "player1"),
        );

        let Json(body) = create_container(
            State(state),
            Some(Json(CreateRequest {
                team_name: Some("alpha".to_string()),
                username: Some("player1".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(body["message"], "Container already exists");
    }

    #[tokio::test]
    async fn test_create_missing_image_names_the_admin() {
        let (state, runtime) = test_state();
        runtime.fail_next_create(FailKind::ImageMissing);

        let err = create_container(
            State(state),
            Some(Json(CreateRequest {
                team_name: Some("alpha".to_string()),
                username: Some("player1".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            error_message(&err),
            "Webshell image not found. Please contact admin."
        );
    }

    #[tokio::test]
    async fn test_create_runtime_failure_carries_detail() {
        let (state, runtime) = test_state();
        runtime.fail_next_create(FailKind::Runtime("daemon busy".to_string()));

        let err = create_container(
            State(state),
            Some(Json(CreateRequest {
                team_name: Some("alpha".to_string()),
                username: Some("player1".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert!(error_message(&err).starts_with("Failed to create container:"));
    }

    // ==================== Delete Tests ====================

    #[tokio::test]
    async fn test_delete_absent_container() {
        let (state, runtime) = test_state();
        let Json(body) = delete_container(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("alpha".to_string()),
            })),
        )
        .await
        .unwrap();
        // Same success shape as a real removal.
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Container stopped successfully");
        assert!(runtime.stopped().is_empty());
        assert!(runtime.removed().is_empty());
    }

    #[tokio::test]
    async fn test_delete_existing_container() {
        let (state, runtime) = test_state();
        runtime.with_container("webshell-alpha", "running", team_labels("alpha", "p1"));

        let Json(body) = delete_container(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("alpha".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(body["message"], "Container stopped successfully");
        assert!(!runtime.contains("webshell-alpha"));
    }

    // ==================== Restart Tests ====================

    #[tokio::test]
    async fn test_restart_absent_container() {
        let (state, _runtime) = test_state();
        let err = restart_container(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("alpha".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(error_message(&err), "Container does not exist");
    }

    #[tokio::test]
    async fn test_restart_existing_container() {
        let (state, runtime) = test_state();
        runtime.with_container("webshell-alpha", "running", team_labels("alpha", "p1"));

        let Json(body) = restart_container(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("alpha".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(body["message"], "Container restarted");
        assert_eq!(runtime.restarted().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_failure_carries_detail() {
        let (state, runtime) = test_state();
        runtime.with_container("webshell-alpha", "running", team_labels("alpha", "p1"));
        runtime.fail_restart("webshell-alpha", FailKind::Runtime("daemon busy".to_string()));

        let err = restart_container(
            State(state),
            Some(Json(TeamRequest {
                team_name: Some("alpha".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        // Only the runtime detail, not the error type's own prefix.
        assert_eq!(
            error_message(&err),
            "Failed to restart container: daemon busy"
        );
    }

    // ==================== Admin Tests ====================

    #[tokio::test]
    async fn test_admin_list_requires_secret() {
        let (state, _runtime) = test_state();

        let err = admin_list(State(state.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&err), "Unauthorized");

        let err = admin_list(State(state), admin_headers("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_list_reports_containers() {
        let (state, runtime) = test_state();
        runtime.with_container("webshell-alpha", "running", team_labels("alpha", "p1"));
        runtime.with_container("webshell-beta", "exited", team_labels("beta", "p2"));

        let Json(body) = admin_list(State(state), admin_headers("s3cret"))
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert_eq!(body["containers"][0]["team"], "alpha");
        assert_eq!(body["containers"][1]["status"], "exited");
    }

    #[tokio::test]
    async fn test_admin_cleanup_reclaims_expired() {
        let (state, runtime) = test_state();
        let mut labels = team_labels("old", "p1");
        labels.insert(LABEL_EXPIRES.to_string(), "2020-01-01T00:00:00Z".to_string());
        runtime.with_container("webshell-old", "running", labels);

        let err = admin_cleanup(State(state.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert!(runtime.contains("webshell-old"));

        let Json(body) = admin_cleanup(State(state), admin_headers("s3cret"))
            .await
            .unwrap();
        assert_eq!(body["cleaned"][0], "old");
        assert!(!runtime.contains("webshell-old"));
    }

    // ==================== End To End Tests ====================

    #[tokio::test]
    async fn test_tenant_lifecycle_round_trip() {
        let (state, _runtime) = test_state();
        let team = Some(Json(TeamRequest {
            team_name: Some("Team Alpha!!".to_string()),
        }));

        let Json(created) = create_container(
            State(state.clone()),
            Some(Json(CreateRequest {
                team_name: Some("Team Alpha!!".to_string()),
                username: Some("player1".to_string()),
            })),
        )
        .await
        .unwrap();
        assert_eq!(created["message"], "Container created successfully");

        let Json(status) = container_status(State(state.clone()), team.clone())
            .await
            .unwrap();
        assert_eq!(status["has_container"], true);
        assert_eq!(status["status"], "running");

        let Json(deleted) = delete_container(State(state.clone()), team.clone())
            .await
            .unwrap();
        assert_eq!(deleted["message"], "Container stopped successfully");

        let Json(status) = container_status(State(state), team).await.unwrap();
        assert_eq!(status["has_container"], false);
    }
}
