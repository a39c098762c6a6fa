//! Review endpoints
//!
//! - `GET /api/reviews/{id}`: 200 with ETag, 304 on a matching If-None-Match, 404
//! - `GET /api/reviews`: 200, or 204 when there are no reviews
//! - `POST /api/reviews`: 202, optional `Idempotency-Key: <uuid>`
//! - `PUT /api/reviews/{id}`, `DELETE /api/reviews/{id}`: 202
//!
//! Writes are accepted, not applied: a 202 means the command is queued.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{error_response, header_value, json_response};
use crate::cache::store::compute_etag;
use crate::gateway::{Accepted, ReviewList};
use crate::server::AppState;
use crate::types::{GatewayError, Result, ReviewInput};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Header carrying a client-chosen create id
pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

pub async fn get_review(
    state: Arc<AppState>,
    id: &str,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    let review = match state.gateway.get(id).await {
        Ok(review) => review,
        Err(e) => return error_response(e),
    };

    let body = match to_json(&review) {
        Ok(body) => body,
        Err(e) => return error_response(e),
    };

    let etag = compute_etag(&body);
    let not_modified = headers
        .get("If-None-Match")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));

    let mut response = if not_modified {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        response
    } else {
        json_response(StatusCode::OK, body)
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert("ETag", value);
    }
    headers.insert("Cache-Control", header_value("no-cache"));
    response
}

pub async fn list_reviews(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.gateway.list().await {
        Ok(ReviewList::Reviews(reviews)) => match to_json(&reviews) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => error_response(e),
        },
        Ok(ReviewList::Empty) => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NO_CONTENT;
            response
        }
        Err(e) => error_response(e),
    }
}

pub async fn create_review(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let command_id = match idempotency_key(req.headers()) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    let input: ReviewInput = match read_json(req).await {
        Ok(input) => input,
        Err(e) => return error_response(e),
    };

    accepted(state.gateway.create(input, command_id).await)
}

pub async fn update_review(
    state: Arc<AppState>,
    id: String,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let input: ReviewInput = match read_json(req).await {
        Ok(input) => input,
        Err(e) => return error_response(e),
    };

    accepted(state.gateway.update(&id, input).await)
}

pub async fn delete_review(state: Arc<AppState>, id: &str) -> Response<Full<Bytes>> {
    accepted(state.gateway.delete(id).await)
}

fn accepted(result: Result<Accepted>) -> Response<Full<Bytes>> {
    match result.and_then(|accepted| to_json(&accepted)) {
        Ok(body) => json_response(StatusCode::ACCEPTED, body),
        Err(e) => error_response(e),
    }
}

/// Parse the optional `Idempotency-Key` header
fn idempotency_key(headers: &HeaderMap) -> Result<Option<Uuid>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map(Some)
        .ok_or_else(|| GatewayError::BadRequest(format!("{} must be a UUID", IDEMPOTENCY_KEY)))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Failed to read body: {}", e)))?
        .to_bytes();

    if body.is_empty() {
        return Err(GatewayError::BadRequest("Request body is empty".into()));
    }

    Ok(serde_json::from_slice(&body)?)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Internal(format!("Failed to serialize response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_absent() {
        assert_eq!(idempotency_key(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_idempotency_key_parsed() {
        let key = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY, HeaderValue::from_str(&key.to_string()).unwrap());
        assert_eq!(idempotency_key(&headers).unwrap(), Some(key));
    }

    #[test]
    fn test_idempotency_key_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY, HeaderValue::from_static("abc"));
        let err = idempotency_key(&headers).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
