// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! REST surface served on the mutual-TLS endpoint.
//!
//! The accept loop resolves the caller's identity once per connection and
//! layers it into the router as an extension; handlers never re-resolve.
//! Every call returns success or exactly one error kind from the taxonomy.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::application::broker::EdgeBroker;
use crate::domain::error::BrokerError;
use crate::domain::identity::ResolvedIdentity;
use crate::domain::namespace::{valid_name, NamespaceDescriptor};

#[derive(Clone)]
pub struct ApiState {
    pub broker: Arc<EdgeBroker>,
}

/// Router for one authenticated API connection.
pub fn api_router(broker: Arc<EdgeBroker>, identity: ResolvedIdentity) -> Router {
    Router::new()
        .route("/v1/namespaces", get(list_namespaces))
        .route(
            "/v1/namespaces/:namespace",
            post(register_namespace).delete(unregister_namespace),
        )
        .route(
            "/v1/namespaces/:namespace/topics/:topic/notifications",
            post(publish_notification),
        )
        .layer(Extension(identity))
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { broker })
}

/// Router for a connection whose identity could not be resolved: every
/// request is answered 401, nothing is dispatched.
pub fn unauthorized_router(reason: String) -> Router {
    let handler = move || {
        let reason = reason.clone();
        async move { ApiError::from(BrokerError::IdentityUnresolved(reason)).into_response() }
    };
    Router::new().fallback(handler)
}

async fn register_namespace(
    State(state): State<ApiState>,
    Extension(identity): Extension<ResolvedIdentity>,
    Path(namespace): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_valid_name(&namespace)?;
    state
        .broker
        .register_namespace(identity.app_id(), &namespace)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn unregister_namespace(
    State(state): State<ApiState>,
    Extension(identity): Extension<ResolvedIdentity>,
    Path(namespace): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_valid_name(&namespace)?;
    state
        .broker
        .unregister_namespace(identity.app_id(), &namespace)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_namespaces(
    State(state): State<ApiState>,
) -> Json<Vec<NamespaceDescriptor>> {
    Json(state.broker.list_namespaces().await)
}

async fn publish_notification(
    State(state): State<ApiState>,
    Extension(identity): Extension<ResolvedIdentity>,
    Path((namespace, topic)): Path<(String, String)>,
    payload: Bytes,
) -> Result<StatusCode, ApiError> {
    require_valid_name(&namespace)?;
    require_valid_name(&topic)?;
    state
        .broker
        .publish(identity.app_id(), &namespace, &topic, payload)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

fn require_valid_name(name: &str) -> Result<(), ApiError> {
    if valid_name(name) {
        Ok(())
    } else {
        Err(ApiError::InvalidName(name.to_string()))
    }
}

/// HTTP projection of the error taxonomy.
pub enum ApiError {
    Broker(BrokerError),
    InvalidName(String),
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidName(name) => (
                StatusCode::BAD_REQUEST,
                format!("invalid namespace or topic name: {name}"),
            ),
            Self::Broker(e) => {
                let status = match &e {
                    BrokerError::IdentityUnresolved(_) => StatusCode::UNAUTHORIZED,
                    BrokerError::NamespaceConflict { .. } => StatusCode::CONFLICT,
                    BrokerError::NamespaceNotFound { .. } => StatusCode::NOT_FOUND,
                    BrokerError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
                    BrokerError::PublishFailed { .. } => StatusCode::BAD_GATEWAY,
                    BrokerError::BackendUnavailable(_) | BrokerError::ShuttingDown => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    BrokerError::ConnectionTimeout { .. } | BrokerError::Config(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
