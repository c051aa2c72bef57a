//! HTTP API for the config store and rollouts
//!
//! All routes live under `/fleetconf/v1/config`:
//! - `GET  get-state`            committed config, rollout status, this node's identity
//! - `POST set`                  immediate compare-and-swap update
//! - `POST set-rolling`          start a rollout
//! - `GET  rollback-rolling`     cancel the rollout, keep the committed config
//! - `GET  force-commit-rolling` cancel the rollout, commit the candidate now
//! - `GET|POST applied`          fingerprint of the config this node runs
//!
//! Config documents are flat JSON objects keyed by camelCase field names.
//! The two extras fields are nested objects, codec-encoded on the way in.

use crate::common::{Error, Extras, Result};
use crate::coordinator::cache::StampedCache;
use crate::coordinator::fleet::AppliedReport;
use crate::coordinator::rollout::{CancelMode, RolloutCoordinator, RolloutOutcome};
use crate::coordinator::store::{ConfigStore, VersionStamp};
use crate::model::{ConfigKey, ConfigSnapshot, ExtraField, ServerList};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub const API_PREFIX: &str = "/fleetconf/v1/config";

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Body of every write endpoint's reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub message: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<VersionStamp>,
}

impl OpResult {
    fn ok() -> Self {
        Self {
            message: "OK".to_string(),
            succeeded: true,
            stamp: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let message = match &self {
            Error::Conflict { .. } => "Another process has updated the config.".to_string(),
            other => other.to_string(),
        };
        let body = OpResult {
            message,
            succeeded: false,
            stamp: None,
        };
        (self.to_http_status(), Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct ConfigApiState {
    pub rollout: RolloutCoordinator,
    pub hostname: Arc<String>,
    applied: Arc<RwLock<Option<String>>>,
    servers: Arc<StampedCache<ServerList>>,
}

impl ConfigApiState {
    pub fn new(rollout: RolloutCoordinator, hostname: impl Into<String>) -> Self {
        Self {
            rollout,
            hostname: Arc::new(hostname.into()),
            applied: Arc::new(RwLock::new(None)),
            servers: Arc::new(StampedCache::new(ConfigSnapshot::servers)),
        }
    }

    fn store(&self) -> &ConfigStore {
        self.rollout.store()
    }
}

pub fn create_router(state: ConfigApiState) -> Router {
    let api = Router::new()
        .route("/get-state", get(get_state))
        .route("/set", post(set_config))
        .route("/set-rolling", post(set_rolling))
        .route(
            "/rollback-rolling",
            get(rollback_rolling).post(rollback_rolling),
        )
        .route(
            "/force-commit-rolling",
            get(force_commit_rolling).post(force_commit_rolling),
        )
        .route("/applied", get(get_applied).post(put_applied));

    Router::new()
        .nest(API_PREFIX, api)
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_state(State(state): State<ConfigApiState>) -> Json<Value> {
    let committed = state.store().committed();
    let servers = state.servers.get(state.store());
    let server_id = servers
        .find_host(&state.hostname)
        .map(|s| s.server_id)
        .unwrap_or(-1);

    let mut config = render_config(&committed.snapshot);
    config.insert("rollInProgress".into(), json!(state.rollout.is_rolling()));
    config.insert("rollStatus".into(), json!(state.rollout.get_rolling_status()));
    config.insert("hostname".into(), json!(state.hostname.as_str()));
    config.insert("serverId".into(), json!(server_id));
    config.insert("stamp".into(), json!(committed.stamp));

    let mut doc = Map::new();
    doc.insert("version".into(), json!(crate::VERSION));
    doc.insert("config".into(), Value::Object(config));
    if let Some(candidate) = state.rollout.rolling_config() {
        let mut rolling = render_config(&candidate);
        rolling.insert("fingerprint".into(), json!(candidate.fingerprint()));
        doc.insert("rollingConfig".into(), Value::Object(rolling));
    }
    if let Some(progress) = state.rollout.progress() {
        doc.insert("rollProgress".into(), json!(progress));
    }
    Json(Value::Object(doc))
}

/// Compare-and-swap against the body's `stamp`.
///
/// A body without `stamp` is checked against this node's current stamp, so
/// two writers that both omit it can overwrite each other. Only writers that
/// send the stamp they read get the no-blind-overwrite guarantee.
async fn set_config(
    State(state): State<ConfigApiState>,
    Json(body): Json<Value>,
) -> Result<Json<OpResult>> {
    let (candidate, stamp) = parse_document(&body)?;
    let expected = stamp.unwrap_or_else(|| state.store().stamp());
    let stamp = state.store().update_config(candidate, expected)?;
    Ok(Json(OpResult {
        stamp: Some(stamp),
        ..OpResult::ok()
    }))
}

async fn set_rolling(
    State(state): State<ConfigApiState>,
    Json(body): Json<Value>,
) -> Result<Json<OpResult>> {
    let (candidate, _) = parse_document(&body)?;
    let rollout_id = state.rollout.begin_rolling(candidate)?;
    tracing::debug!(%rollout_id, "rollout requested over HTTP");
    Ok(Json(OpResult::ok()))
}

async fn rollback_rolling(State(state): State<ConfigApiState>) -> Result<Json<OpResult>> {
    state.rollout.cancel_rolling(CancelMode::Rollback)?;
    Ok(Json(OpResult::ok()))
}

async fn force_commit_rolling(State(state): State<ConfigApiState>) -> Result<Json<OpResult>> {
    let outcome = state.rollout.cancel_rolling(CancelMode::ForceCommit)?;
    let stamp = match outcome {
        RolloutOutcome::Committed { stamp, .. } => Some(stamp),
        _ => None,
    };
    Ok(Json(OpResult {
        stamp,
        ..OpResult::ok()
    }))
}

/// Explicit acknowledgement if one was posted, else the committed config
async fn get_applied(State(state): State<ConfigApiState>) -> Json<AppliedReport> {
    let fingerprint = state
        .applied
        .read()
        .clone()
        .unwrap_or_else(|| state.store().committed().snapshot.fingerprint());
    Json(AppliedReport {
        fingerprint: Some(fingerprint),
    })
}

async fn put_applied(
    State(state): State<ConfigApiState>,
    Json(report): Json<AppliedReport>,
) -> Json<OpResult> {
    tracing::info!(fingerprint = ?report.fingerprint, "applied config acknowledged");
    *state.applied.write() = report.fingerprint;
    Json(OpResult::ok())
}

async fn health(State(state): State<ConfigApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": crate::VERSION,
            "backend": state.store().backend_name(),
            "stamp": state.store().stamp(),
            "rolling": state.rollout.is_rolling(),
        })),
    )
}

/// Render a snapshot as a config document: strings as text, ints as numbers,
/// extras as nested objects.
pub fn render_config(snapshot: &ConfigSnapshot) -> Map<String, Value> {
    let mut doc = Map::new();
    for key in ConfigKey::all() {
        match key {
            ConfigKey::String(k) if k.is_extra() => {}
            ConfigKey::String(k) => {
                doc.insert(key.wire_name(), json!(snapshot.get_string(k)));
            }
            ConfigKey::Int(k) => {
                doc.insert(key.wire_name(), json!(snapshot.get_int(k)));
            }
        }
    }
    for field in [ExtraField::ServiceCfg, ExtraField::Backup] {
        let extras = snapshot.extras(field).unwrap_or_else(|e| {
            tracing::warn!(field = %ConfigKey::String(field.key()), "unreadable extras: {}", e);
            Extras::new()
        });
        doc.insert(ConfigKey::String(field.key()).wire_name(), json!(extras));
    }
    doc
}

/// Parse a config document into a full candidate snapshot plus the optional
/// `stamp` the writer based it on. Missing fields take their defaults.
pub fn parse_document(body: &Value) -> Result<(ConfigSnapshot, Option<VersionStamp>)> {
    let doc = body
        .as_object()
        .ok_or_else(|| Error::InvalidConfig("config document must be a JSON object".into()))?;

    let mut values = Vec::new();
    for key in ConfigKey::all() {
        if matches!(key, ConfigKey::String(k) if k.is_extra()) {
            continue;
        }
        if let Some(field) = doc.get(&key.wire_name()) {
            values.push((key, scalar_text(field)));
        }
    }

    let mut snapshot = ConfigSnapshot::from_values(values);
    for field in [ExtraField::ServiceCfg, ExtraField::Backup] {
        let name = ConfigKey::String(field.key()).wire_name();
        let extras = match doc.get(&name) {
            None | Some(Value::Null) => Extras::new(),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| (k.clone(), scalar_text(v)))
                .collect(),
            Some(_) => {
                return Err(Error::InvalidConfig(format!("{} must be an object", name)));
            }
        };
        snapshot = snapshot.with_extras(field, &extras);
    }

    let stamp = doc.get("stamp").and_then(Value::as_u64).map(VersionStamp::new);
    Ok((snapshot, stamp))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
