//! `POST <prefix>/<service>/<method>`

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use rally_dispatch::{Encoding, ServiceError, UnaryError};
use tracing::{debug, error, warn};

use super::http::TransportState;

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn service_status(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(super) async fn invoke(
    State(state): State<Arc<TransportState>>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let encoding = match Encoding::from_content_type(content_type(&headers)) {
        Ok(encoding) => encoding,
        Err(e) => return (StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()).into_response(),
    };

    let _timer = state
        .collectors
        .as_ref()
        .map(|collectors| collectors.unary_duration.start_timer());

    let Some(entry) = state.router.registry().service(&service) else {
        debug!("Unary call to unknown service {}", service);
        return (
            StatusCode::NOT_FOUND,
            format!("unknown service {service}"),
        )
            .into_response();
    };

    match entry.call(&method, encoding, &body).await {
        Ok(response) => ([(CONTENT_TYPE, encoding.content_type())], response).into_response(),
        Err(e @ UnaryError::UnknownMethod { .. }) => {
            debug!("Unary call to {}", e);
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(UnaryError::Decode(e)) => {
            warn!("⚠️ Malformed {} request for {}/{}: {}", encoding, service, method, e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(UnaryError::Service(e)) => (service_status(&e), e.to_string()).into_response(),
        Err(e @ UnaryError::Encode(_)) => {
            error!("❌ {}/{} failed: {}", service, method, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
