//! Request conversion at the HTTP edge.
//!
//! # Responsibilities
//! - Buffer the inbound body up to the configured limit
//! - Carry the request id set by the request-id layer into the gateway request
//! - Extract host, path, query and client address
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing (outermost layer)
//! - Oversized bodies are rejected here, before any API lookup

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::execution::{GatewayRequest, GatewayResponse};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Convert an axum request. Errors are ready-to-send responses.
pub async fn into_gateway_request(request: Request<Body>, max_body_bytes: usize) -> Result<GatewayRequest, Response> {
    let (parts, body) = request.into_parts();

    let body = axum::body::to_bytes(body, max_body_bytes).await.map_err(|error| {
        tracing::debug!(error = %error, "Request body rejected");
        GatewayResponse::json(
            StatusCode::PAYLOAD_TOO_LARGE,
            &serde_json::json!({ "message": "Request body too large" }),
        )
        .into_response()
    })?;

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()));

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let mut gateway = GatewayRequest::new(parts.method, parts.uri.path());
    if let Some(id) = parts.headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        if !id.is_empty() {
            gateway.id = id.to_string();
        }
    }
    gateway.host = host;
    gateway.query = parts.uri.query().map(str::to_string);
    gateway.headers = parts.headers;
    gateway.body = body;
    gateway.remote_addr = remote_addr;
    Ok(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[tokio::test]
    async fn test_conversion_keeps_coordinates() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/users?page=2")
            .header("host", "api.test")
            .header(X_REQUEST_ID, "req-1")
            .body(Body::from("hello"))
            .unwrap();

        let gateway = into_gateway_request(request, 1024).await.unwrap();
        assert_eq!(gateway.id, "req-1");
        assert_eq!(gateway.method, Method::POST);
        assert_eq!(gateway.host.as_deref(), Some("api.test"));
        assert_eq!(gateway.path, "/v1/users");
        assert_eq!(gateway.query.as_deref(), Some("page=2"));
        assert_eq!(&gateway.body[..], b"hello");
        assert!(gateway.remote_addr.is_none());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let request = Request::builder()
            .uri("/")
            .body(Body::from(vec![0u8; 64]))
            .unwrap();
        let response = into_gateway_request(request, 16).await.unwrap_err();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
