//! Dual-write gateway: an Elasticsearch-shaped HTTP front that forwards
//! reads to the master cluster, mirrors mutations to both, and rewrites
//! payloads across version skew.

#![forbid(unsafe_code)]

mod classify;
mod rewrite;

pub use classify::{classify, ClassifiedRequest, RequestAction};
pub use rewrite::{rewrite_mappings_body, rewrite_search_total};

use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use esbridge_cluster::Cluster;
use metrics::counter;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Request bodies larger than this are rejected; bulk streams dominate.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address, e.g. "0.0.0.0:8080".
    pub address: String,
    pub user: String,
    pub password: String,
    /// When set, reads go to the target cluster; otherwise to the source.
    pub master_is_target: bool,
}

pub struct Gateway {
    config: GatewayConfig,
    source: Arc<dyn Cluster>,
    target: Arc<dyn Cluster>,
    client: reqwest::Client,
}

impl Gateway {
    pub fn new(
        source: Arc<dyn Cluster>,
        target: Arc<dyn Cluster>,
        config: GatewayConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { config, source, target, client })
    }

    fn master(&self) -> &Arc<dyn Cluster> {
        if self.config.master_is_target {
            &self.target
        } else {
            &self.source
        }
    }

    fn slave(&self) -> &Arc<dyn Cluster> {
        if self.config.master_is_target {
            &self.source
        } else {
            &self.target
        }
    }

    /// Serve until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let address = self.config.address.clone();
        let state = Arc::new(self);
        let app = Router::new()
            .fallback(handle)
            .layer(middleware::from_fn_with_state(Arc::clone(&state), require_auth))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!(address = %address, "gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.config.user.is_empty() {
            return true;
        }
        let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
            return false;
        };
        let Some(encoded) = value.to_str().ok().and_then(|v| v.strip_prefix("Basic ")) else {
            return false;
        };
        let Some(decoded) = BASE64.decode(encoded).ok().and_then(|b| String::from_utf8(b).ok())
        else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, pass)) => user == self.config.user && pass == self.config.password,
            None => false,
        }
    }

    async fn dispatch(&self, req: Request) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await?;
        let method = parts.method;
        let path = parts.uri.path().to_string();
        let query = parts.uri.query().map(str::to_string);

        self.mirror_to_slave(&method, &path, query.as_deref(), &body);

        let master = self.master();
        let classified = classify(&method, &path, master.family()).map_err(|e| anyhow!(e))?;
        let upstream_path = with_query(&classified.uri, query.as_deref());
        let (status, headers, bytes) =
            proxy_raw(&self.client, master.as_ref(), method, &upstream_path, body).await?;

        // Non-JSON payloads (the _cat family) pass through untouched.
        let Ok(mut payload) = serde_json::from_slice::<Value>(&bytes) else {
            return Ok((status, strip_hop_headers(headers), bytes).into_response());
        };

        // The client speaks the source cluster's dialect; when reads come
        // from the other side, reshape the search total accordingly.
        let is_search =
            matches!(classified.action, RequestAction::Search | RequestAction::SearchLimit);
        if self.config.master_is_target && status == StatusCode::OK && is_search {
            rewrite_search_total(&mut payload, master.family(), self.source.family());
        }

        Ok((status, strip_hop_headers(headers), Json(payload)).into_response())
    }

    /// Best-effort mirror of a mutating request to the slave cluster, with
    /// the mappings body reshaped when the families differ.
    fn mirror_to_slave(&self, method: &Method, path: &str, query: Option<&str>, body: &Bytes) {
        let slave = self.slave();
        let Ok(classified) = classify(method, path, slave.family()) else {
            return;
        };
        if !classified.action.is_mutation() {
            return;
        }

        let mut body = body.clone();
        let families_differ = self.master().family() != slave.family();
        let carries_mappings = matches!(
            classified.action,
            RequestAction::CreateIndex | RequestAction::UpdateIndexMapping
        );
        if families_differ && carries_mappings {
            match serde_json::from_slice::<Value>(&body) {
                Ok(mut payload) => {
                    if let Err(e) = rewrite_mappings_body(&mut payload, slave.family()) {
                        warn!(path = %path, error = %e, "mapping rewrite failed; mirror skipped");
                        return;
                    }
                    body = Bytes::from(payload.to_string());
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "mirror body is not JSON; mirror skipped");
                    return;
                }
            }
        }

        let client = self.client.clone();
        let slave = Arc::clone(slave);
        let method = method.clone();
        let upstream_path = with_query(&classified.uri, query);
        tokio::spawn(async move {
            match proxy_raw(&client, slave.as_ref(), method, &upstream_path, body).await {
                Ok((status, _, _)) if !status.is_success() => {
                    warn!(path = %upstream_path, status = %status, "slave mirror rejected");
                }
                Ok(_) => counter!("gateway_mirrored_total", 1u64),
                Err(e) => warn!(path = %upstream_path, error = %e, "slave mirror failed"),
            }
        });
    }
}

async fn handle(State(gateway): State<Arc<Gateway>>, req: Request) -> Response {
    counter!("gateway_requests_total", 1u64);
    match gateway.dispatch(req).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "gateway dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": e.to_string()})))
                .into_response()
        }
    }
}

async fn require_auth(
    State(gateway): State<Arc<Gateway>>,
    req: Request,
    next: Next,
) -> Response {
    if gateway.authorized(req.headers()) {
        return next.run(req).await;
    }
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"Restricted\""));
    response
}

async fn proxy_raw(
    client: &reqwest::Client,
    cluster: &dyn Cluster,
    method: Method,
    path_and_query: &str,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap, Bytes)> {
    let addresses = cluster.addresses();
    let pick = rand::thread_rng().gen_range(0..addresses.len());
    let url = format!(
        "{}/{}",
        addresses[pick].trim_end_matches('/'),
        path_and_query.trim_start_matches('/')
    );

    let mut req = client
        .request(method, &url)
        .header(CONTENT_TYPE, "application/json")
        .body(body.to_vec());
    if !cluster.user().is_empty() {
        req = req.basic_auth(cluster.user(), Some(cluster.password()));
    }

    let resp = req.send().await?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.bytes().await?;
    Ok((status, headers, bytes))
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

/// Length and framing headers no longer hold once the body is re-serialized.
fn strip_hop_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
    headers
}
