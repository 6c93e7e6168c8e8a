//! HTTP control surface.
//!
//! JSON endpoints for announcing, heartbeating, deleting and inspecting
//! services. Mutations are authenticated against the shared secret, built
//! into commands with submitter-computed expiry, and pushed through the
//! command bus; a NotLeader outcome turns into a 301 redirect at the
//! current leader when its address is known.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::CommandBus;
use crate::command::Command;
use crate::config::HttpConfig;
use crate::error::Error;
use crate::metrics::{self, ApiOperation};
use crate::registry::Registry;
use crate::service::{now_unix, Callback, Service};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    /// Local replica state, for reads.
    pub registry: Registry,
    /// Write path for every mutation.
    pub bus: Arc<dyn CommandBus>,
    /// Shared secret; `None` disables authentication.
    pub secret: Option<String>,
    /// Deadline on command submission.
    pub write_timeout: Duration,
}

/// Build the control surface router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/skydns/services/", get(list_services))
        .route(
            "/skydns/services/:id",
            put(add_service)
                .get(get_service)
                .delete(remove_service)
                .patch(update_ttl),
        )
        .route("/skydns/environments/", get(environments))
        .route("/skydns/regions/", get(regions))
        .route("/skydns/callbacks/:id", put(add_callback))
        .with_state(state)
}

/// Serve the router until `cancel` fires. With TLS material configured the
/// `tls` build serves HTTPS instead.
pub async fn serve(
    config: HttpConfig,
    state: ApiState,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let app = router(state);

    if let Some(tls) = &config.tls {
        #[cfg(feature = "tls")]
        {
            let rustls =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.pem, &tls.key).await?;
            info!(addr = %config.listen_addr, "HTTPS control surface listening");

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });

            axum_server::bind_rustls(config.listen_addr, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
            return Ok(());
        }
        #[cfg(not(feature = "tls"))]
        {
            let _ = tls;
            return Err(Error::Config(
                "TLS configured but skydns was built without the `tls` feature".to_string(),
            ));
        }
    }

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP control surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<(), Error> {
    let Some(secret) = &state.secret else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if presented == Some(secret.as_str()) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

async fn submit(state: &ApiState, cmd: Command) -> Result<(), Error> {
    match tokio::time::timeout(state.write_timeout, state.bus.submit(cmd)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transport("command submission timed out".to_string())),
    }
}

/// Map an error onto the wire: 409, 404, 400, 401, 301-to-leader, 500.
fn error_response(err: Error, request_path: &str) -> Response {
    match err {
        Error::AlreadyExists => (StatusCode::CONFLICT, err.to_string()).into_response(),
        Error::NotFound => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
        Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Error::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
        Error::NotLeader {
            leader: Some(leader),
        } => {
            debug!(%leader, "redirecting mutation to leader");
            (
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, format!("http://{leader}{request_path}"))],
            )
                .into_response()
        }
        Error::NotLeader { leader: None } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "leader unknown").into_response()
        }
        other => {
            warn!(error = %other, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response()
        }
    }
}

fn finish(op: ApiOperation, response: Response) -> Response {
    metrics::record_api_request(op, response.status().as_u16());
    response
}

async fn add_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut service): Json<Service>,
) -> Response {
    let op = ApiOperation::AddService;
    let path = format!("/skydns/services/{id}");

    if let Err(e) = authenticate(&state, &headers) {
        return finish(op, error_response(e, &path));
    }
    if service.host.is_empty() {
        return finish(
            op,
            error_response(Error::InvalidInput("host is required".to_string()), &path),
        );
    }
    if service.ttl == 0 && !service.no_expire {
        return finish(
            op,
            error_response(Error::InvalidInput("ttl is required".to_string()), &path),
        );
    }

    service.id = id;
    service.expires = now_unix() + i64::from(service.ttl);
    service.callbacks.clear();

    match submit(&state, Command::AddService { service }).await {
        Ok(()) => finish(op, StatusCode::CREATED.into_response()),
        Err(e) => finish(op, error_response(e, &path)),
    }
}

async fn get_service(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let op = ApiOperation::GetService;
    match state.registry.get_by_id(&id) {
        Ok(service) => finish(op, Json(service).into_response()),
        Err(e) => finish(op, error_response(e, &format!("/skydns/services/{id}"))),
    }
}

async fn remove_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let op = ApiOperation::RemoveService;
    let path = format!("/skydns/services/{id}");

    if let Err(e) = authenticate(&state, &headers) {
        return finish(op, error_response(e, &path));
    }

    match submit(&state, Command::RemoveService { id }).await {
        Ok(()) => finish(op, StatusCode::OK.into_response()),
        Err(e) => finish(op, error_response(e, &path)),
    }
}

async fn update_ttl(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Service>,
) -> Response {
    let op = ApiOperation::UpdateTtl;
    let path = format!("/skydns/services/{id}");

    if let Err(e) = authenticate(&state, &headers) {
        return finish(op, error_response(e, &path));
    }

    let expires = now_unix() + i64::from(body.ttl);
    let cmd = Command::UpdateTtl {
        id,
        ttl: body.ttl,
        expires,
    };
    match submit(&state, cmd).await {
        Ok(()) => finish(op, StatusCode::OK.into_response()),
        Err(e) => finish(op, error_response(e, &path)),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    query: Option<String>,
}

async fn list_services(
    State(state): State<ApiState>,
    Query(params): Query<ListQuery>,
) -> Response {
    let op = ApiOperation::ListServices;
    let query = params.query.unwrap_or_else(|| "any".to_string());

    match state.registry.get(&query) {
        Ok(services) => finish(op, Json(services).into_response()),
        Err(Error::NotFound) => finish(op, Json(Vec::<Service>::new()).into_response()),
        Err(e) => finish(op, error_response(e, "/skydns/services/")),
    }
}

async fn environments(State(state): State<ApiState>) -> Json<BTreeMap<String, usize>> {
    Json(state.registry.environments())
}

async fn regions(State(state): State<ApiState>) -> Json<BTreeMap<String, usize>> {
    Json(state.registry.regions())
}

async fn add_callback(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut callback): Json<Callback>,
) -> Response {
    let op = ApiOperation::AddCallback;
    let path = format!("/skydns/callbacks/{id}");

    if let Err(e) = authenticate(&state, &headers) {
        return finish(op, error_response(e, &path));
    }
    if callback.reply.is_empty() {
        return finish(
            op,
            error_response(Error::InvalidInput("reply is required".to_string()), &path),
        );
    }
    callback.id = id;

    let matches = match state.registry.get(&callback.selector()) {
        Ok(services) => services,
        Err(Error::NotFound) => Vec::new(),
        Err(e) => return finish(op, error_response(e, &path)),
    };
    if matches.is_empty() {
        return finish(op, error_response(Error::NotFound, &path));
    }

    let mut attached = 0usize;
    for service in matches {
        let cmd = Command::AddCallback {
            id: service.id.clone(),
            callback: callback.clone(),
        };
        match submit(&state, cmd).await {
            Ok(()) => attached += 1,
            // The service expired between the lookup and the submit.
            Err(Error::NotFound) => {}
            Err(e) => return finish(op, error_response(e, &path)),
        }
    }

    if attached == 0 {
        finish(op, error_response(Error::NotFound, &path))
    } else {
        finish(op, StatusCode::CREATED.into_response())
    }
}
