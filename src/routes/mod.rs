//! HTTP routes for the review gateway

pub mod health;
pub mod reviews;

pub use health::{health_check, readiness_check};
pub use reviews::{create_review, delete_review, get_review, list_reviews, update_review};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderValue;
use hyper::{Response, StatusCode};

use crate::types::GatewayError;

/// Header value from a static string
pub(crate) fn header_value(value: &'static str) -> HeaderValue {
    HeaderValue::from_static(value)
}

/// JSON response with CORS header
pub(crate) fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert("Content-Type", header_value("application/json"));
    headers.insert("Access-Control-Allow-Origin", header_value("*"));
    response
}

/// JSON error body `{error, code}` with the error's status
pub(crate) fn error_response(err: GatewayError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    json_response(status, body)
}
