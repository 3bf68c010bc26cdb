//! HTTP API of the daemon

use crate::orchestrator::{HostingDetail, HostingOrchestrator, StatusReport};
use crate::users::{LoginRequest, LoginResponse, RegisterRequest, UpdateUserRequest, UserService};
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use webhost_common::{Error, Hosting, HostingStatus, Role, User};
use webhost_proxy::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserService>,
    pub orchestrator: Arc<HostingOrchestrator>,
}

#[derive(Debug, Serialize)]
pub struct HostingResponse {
    pub vm_name: String,
    pub ip_address: Ipv4Addr,
    pub ssh_port: u16,
    pub proxy_path: String,
    pub status: HostingStatus,
}

impl From<Hosting> for HostingResponse {
    fn from(h: Hosting) -> Self {
        Self {
            vm_name: h.vm_name,
            ip_address: h.ip_address,
            ssh_port: h.ssh_port,
            proxy_path: h.proxy_path,
            status: h.status,
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/users", get(list_users))
        .route("/hostings", get(list_hostings))
        .route(
            "/users/:email",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route(
            "/hosting/:email",
            post(create_hosting).delete(delete_hosting),
        )
        .route("/hosting/:email/status", get(hosting_status))
        .route("/hosting/:email/detail", get(hosting_detail))
        .route("/hosting/:email/history", get(hosting_history))
        .route("/hosting/:email/start", post(start_hosting))
        .route("/hosting/:email/stop", post(stop_hosting))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/login", post(login))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Validate the bearer token and attach the caller's stored account to the
/// request.
async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return ApiError(Error::Unauthorized(
            "missing or invalid authorization header".to_string(),
        ))
        .into_response();
    };

    match state.users.authenticate(token) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// Callers may act on their own account; admins on any.
fn authorize_owner(caller: &User, email: &str) -> Result<(), Error> {
    if caller.role == Role::Admin || caller.email.eq_ignore_ascii_case(email) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "{} may not act on {}",
            caller.email, email
        )))
    }
}

/// Readers may look but not change anything.
fn authorize_write(caller: &User, email: &str) -> Result<(), Error> {
    authorize_owner(caller, email)?;
    if caller.role == Role::Reader {
        return Err(Error::Forbidden("read-only account".to_string()));
    }
    Ok(())
}

fn normalized(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": webhost_common::VERSION,
    }))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(req) = payload?;
    let user = state.users.register(req)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(req) = payload?;
    Ok(Json(state.users.login(req)?))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
) -> ApiResult<Json<Vec<User>>> {
    if caller.role != Role::Admin {
        return Err(Error::Forbidden("admin role required".to_string()).into());
    }
    Ok(Json(state.users.list()?))
}

async fn list_hostings(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
) -> ApiResult<Json<Vec<Hosting>>> {
    if caller.role != Role::Admin {
        return Err(Error::Forbidden("admin role required".to_string()).into());
    }
    Ok(Json(state.orchestrator.list_all()?))
}

async fn get_user(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<User>> {
    let email = normalized(&email);
    authorize_owner(&caller, &email)?;
    Ok(Json(state.users.get(&email)?))
}

async fn update_user(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<User>> {
    let email = normalized(&email);
    authorize_write(&caller, &email)?;
    let Json(req) = payload?;
    Ok(Json(state.users.update(&email, req, caller.role)?))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<StatusCode> {
    let email = normalized(&email);
    authorize_write(&caller, &email)?;
    state.users.delete(&email)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_hosting(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<(StatusCode, Json<HostingResponse>)> {
    let email = normalized(&email);
    authorize_write(&caller, &email)?;
    let owner = state.users.get(&email)?;
    let hosting = state.orchestrator.create(&owner).await?;
    Ok((StatusCode::CREATED, Json(hosting.into())))
}

async fn delete_hosting(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<HostingResponse>> {
    let email = normalized(&email);
    authorize_write(&caller, &email)?;
    let owner = state.users.get(&email)?;
    let hosting = state.orchestrator.delete(&owner).await?;
    Ok(Json(hosting.into()))
}

async fn start_hosting(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<HostingResponse>> {
    let email = normalized(&email);
    authorize_write(&caller, &email)?;
    let owner = state.users.get(&email)?;
    Ok(Json(state.orchestrator.start(&owner).await?.into()))
}

async fn stop_hosting(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<HostingResponse>> {
    let email = normalized(&email);
    authorize_write(&caller, &email)?;
    let owner = state.users.get(&email)?;
    Ok(Json(state.orchestrator.stop(&owner).await?.into()))
}

async fn hosting_status(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    let email = normalized(&email);
    authorize_owner(&caller, &email)?;
    let owner = state.users.get(&email)?;
    Ok(Json(state.orchestrator.status(&owner).await?))
}

async fn hosting_detail(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<HostingDetail>> {
    let email = normalized(&email);
    authorize_owner(&caller, &email)?;
    let owner = state.users.get(&email)?;
    Ok(Json(state.orchestrator.detail(&owner).await?))
}

async fn hosting_history(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(email): Path<String>,
) -> ApiResult<Json<Vec<Hosting>>> {
    let email = normalized(&email);
    authorize_owner(&caller, &email)?;
    let owner = state.users.get(&email)?;
    Ok(Json(state.orchestrator.history(&owner)?))
}
