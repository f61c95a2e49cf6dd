//! HTTP surface: one route per store operation plus a liveness ping.
//!
//! Handlers only translate between HTTP and [`StoreHandle`] calls. They
//! validate that a key (and, for writes, a body) is present, submit the
//! operation to the dispatcher and encode whatever comes back.

use std::{convert::Infallible, time::Duration};

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::dispatcher::StoreHandle;
use crate::error::ApiError;
use crate::store::Entries;

pub const SERVICE_NAME: &str = "kvstore";

/// Shared router state. Built once at startup and cloned into each handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub store: StoreHandle,
}

impl AppState {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }
}

/// The `key` query parameter.
///
/// Extraction never rejects. A repeated `key` resolves to its first
/// occurrence and malformed percent escapes are kept verbatim.
#[derive(Debug, Default)]
pub struct KeyParam {
    key: Option<String>,
}

impl KeyParam {
    pub fn from_query(query: Option<&str>) -> Self {
        let key = query.and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(name, _)| name == "key")
                .map(|(_, value)| value.into_owned())
        });
        Self { key }
    }

    fn require(self) -> Result<String, ApiError> {
        self.key
            .filter(|key| !key.is_empty())
            .ok_or(ApiError::MissingKey)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for KeyParam {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_query(parts.uri.query()))
    }
}

fn require_payload(body: &Bytes) -> Result<Vec<u8>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::MissingPayload);
    }
    Ok(body.to_vec())
}

/// Builds the application router, mounted under `base_path` (empty for root).
pub fn router(state: AppState, base_path: &str, request_timeout: Duration) -> Router {
    let routes = Router::new()
        .route("/ping", get(ping))
        .route("/get", get(get_value))
        .route("/add", post(add_value))
        .route("/get_all", get(get_all))
        .route("/exists", get(exists))
        .route("/count", get(count))
        .route("/clear", post(clear))
        .route("/delete", delete(delete_value))
        .route("/update", put(update_value))
        .route("/upsert", put(upsert_value))
        .with_state(state);

    let app = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(base_path, routes)
    };

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout)),
    )
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingResponse {
    pub service_name: String,
    pub version: String,
    pub hostname: String,
    pub datetime: String,
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        service_name: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: sysinfo::System::host_name().unwrap_or_default(),
        datetime: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

async fn get_value(
    State(state): State<AppState>,
    params: KeyParam,
) -> Result<Json<Value>, ApiError> {
    let key = params.require()?;
    let value = state.store.get(key.as_str()).await?;
    info!(%key, "fetched value");
    Ok(Json(value))
}

async fn add_value(
    State(state): State<AppState>,
    params: KeyParam,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = require_payload(&body)?;
    let key = params.require()?;
    let value = state.store.add(key.as_str(), payload).await?;
    info!(%key, "added value");
    Ok(Json(value))
}

async fn get_all(State(state): State<AppState>) -> Result<Json<Entries>, ApiError> {
    let entries = state.store.get_all().await?;
    info!(entries = entries.len(), "fetched all entries");
    Ok(Json(entries))
}

async fn exists(
    State(state): State<AppState>,
    params: KeyParam,
) -> Result<Json<bool>, ApiError> {
    let key = params.require()?;
    let present = state.store.exists(key.as_str()).await?;
    info!(%key, present, "checked membership");
    Ok(Json(present))
}

async fn count(State(state): State<AppState>) -> Result<Json<usize>, ApiError> {
    let count = state.store.count().await?;
    info!(count, "counted entries");
    Ok(Json(count))
}

async fn clear(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.store.clear().await?;
    info!("cleared store");
    Ok("Store Cleared\n")
}

async fn delete_value(
    State(state): State<AppState>,
    params: KeyParam,
) -> Result<&'static str, ApiError> {
    let key = params.require()?;
    state.store.delete(key.as_str()).await?;
    info!(%key, "deleted key");
    Ok("Key Deleted\n")
}

async fn update_value(
    State(state): State<AppState>,
    params: KeyParam,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = require_payload(&body)?;
    let key = params.require()?;
    let value = state.store.update(key.as_str(), payload).await?;
    info!(%key, "updated value");
    Ok(Json(value))
}

async fn upsert_value(
    State(state): State<AppState>,
    params: KeyParam,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = require_payload(&body)?;
    let key = params.require()?;
    let value = state.store.upsert(key.as_str(), payload).await?;
    info!(%key, "upserted value");
    Ok(Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_counts_as_missing() {
        let missing = KeyParam::default().require();
        assert!(matches!(missing, Err(ApiError::MissingKey)));

        let empty = KeyParam {
            key: Some(String::new()),
        };
        assert!(matches!(empty.require(), Err(ApiError::MissingKey)));

        let spaced = KeyParam {
            key: Some(" k ".into()),
        };
        assert_eq!(spaced.require().unwrap(), " k ");
    }

    #[test]
    fn first_key_wins_and_values_are_decoded() {
        let repeated = KeyParam::from_query(Some("key=a&key=b"));
        assert_eq!(repeated.require().unwrap(), "a");

        let encoded = KeyParam::from_query(Some("other=1&key=user%20one+x"));
        assert_eq!(encoded.require().unwrap(), "user one x");

        let bad_escape = KeyParam::from_query(Some("key=%zz"));
        assert_eq!(bad_escape.require().unwrap(), "%zz");

        assert!(KeyParam::from_query(None).key.is_none());
        assert!(KeyParam::from_query(Some("keys=a")).key.is_none());
    }

    #[test]
    fn empty_body_is_missing_payload() {
        assert!(matches!(
            require_payload(&Bytes::new()),
            Err(ApiError::MissingPayload)
        ));
        assert_eq!(require_payload(&Bytes::from_static(b"1")).unwrap(), b"1");
    }
}
