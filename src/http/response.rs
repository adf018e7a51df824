//! Response conversion at the HTTP edge.

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};

use crate::execution::GatewayResponse;

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_status_headers_and_body_survive() {
        let gateway = GatewayResponse::json(StatusCode::TOO_MANY_REQUESTS, &serde_json::json!({ "message": "slow" }));
        let response = gateway.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["content-type"], "application/json");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"message":"slow"}"#);
    }
}
