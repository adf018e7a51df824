//! HTTP backend connector.
//!
//! # Responsibilities
//! - Pick an endpoint of the matched API (round-robin, healthy first)
//! - Forward method, headers, body and `path_info` + query to the target
//! - Propagate `x-request-id` and forwarding headers
//! - Buffer the response up to a size limit
//! - Feed call outcomes into passive endpoint health

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri};
use dashmap::DashMap;
use hyper_util::{
    client::legacy::{connect::HttpConnector as TcpConnector, Client},
    rt::TokioExecutor,
};

use crate::backend::endpoint::EndpointGroup;
use crate::backend::{BackendConnector, BackendError};
use crate::config::BackendConfig;
use crate::definition::ApiConfiguration;
use crate::execution::{ExecutionContext, GatewayResponse};

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

pub struct HttpConnector {
    client: Client<TcpConnector, Body>,
    config: BackendConfig,
    groups: DashMap<String, Arc<EndpointGroup>>,
}

impl HttpConnector {
    pub fn new(config: BackendConfig) -> Self {
        let mut connector = TcpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            config,
            groups: DashMap::new(),
        }
    }

    /// Endpoint group for the deployed version of `api`, rebuilt on redeploy.
    fn group_for(&self, api: &ApiConfiguration) -> Result<Arc<EndpointGroup>, BackendError> {
        if let Some(group) = self.groups.get(&api.id) {
            if group.deployed_at() == api.deployed_at {
                return Ok(Arc::clone(group.value()));
            }
        }
        let group = Arc::new(EndpointGroup::new(api.deployed_at, &api.endpoints)?);
        self.groups.insert(api.id.clone(), Arc::clone(&group));
        Ok(group)
    }

    fn build_request(&self, ctx: &ExecutionContext, uri: Uri) -> Result<Request<Body>, BackendError> {
        let request = ctx.request();
        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        if let Ok(value) = HeaderValue::from_str(&request.id) {
            headers.insert(HeaderName::from_static("x-request-id"), value);
        }
        if let Some(addr) = request.remote_addr {
            let forwarded = match request.header("x-forwarded-for") {
                Some(existing) => format!("{existing}, {}", addr.ip()),
                None => addr.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(HeaderName::from_static("x-forwarded-for"), value);
            }
        }
        if let Some(host) = request.host.as_deref().and_then(|h| HeaderValue::from_str(h).ok()) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), host);
        }

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if let Some(target) = builder.headers_mut() {
            *target = headers;
        }
        builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| BackendError::Connect(e.to_string()))
    }
}

#[async_trait]
impl BackendConnector for HttpConnector {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<GatewayResponse, BackendError> {
        let api = ctx.api().ok_or_else(|| BackendError::NoEndpoint {
            api_id: String::new(),
        })?;
        let group = self.group_for(api)?;
        let endpoint = group.next().ok_or_else(|| BackendError::NoEndpoint {
            api_id: api.id.clone(),
        })?;

        let url = endpoint.upstream_url(ctx.path_info(), ctx.request().query.as_deref());
        let uri: Uri = url.parse().map_err(|e: axum::http::uri::InvalidUri| BackendError::InvalidTarget {
            target: url.clone(),
            reason: e.to_string(),
        })?;
        let request = self.build_request(ctx, uri)?;

        let unhealthy = self.config.unhealthy_threshold as usize;
        let healthy = self.config.healthy_threshold as usize;
        let started = Instant::now();

        let exchange = async {
            let response: hyper::Response<hyper::body::Incoming> = self
                .client
                .request(request)
                .await
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(body), self.config.max_response_bytes)
                .await
                .map_err(|e| BackendError::Body(e.to_string()))?;
            Ok::<_, BackendError>((parts, body))
        };

        let outcome = match tokio::time::timeout(Duration::from_millis(self.config.read_timeout_ms), exchange).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        };

        match outcome {
            Ok((parts, body)) => {
                match parts.status {
                    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                        endpoint.mark_failure(unhealthy)
                    }
                    _ => endpoint.mark_success(healthy),
                }
                tracing::debug!(
                    request_id = %ctx.request().id,
                    endpoint = %endpoint.name,
                    status = parts.status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backend responded"
                );
                let mut headers = parts.headers;
                strip_hop_by_hop(&mut headers);
                Ok(GatewayResponse {
                    status: parts.status,
                    headers,
                    body,
                })
            }
            Err(error) => {
                endpoint.mark_failure(unhealthy);
                tracing::warn!(
                    request_id = %ctx.request().id,
                    endpoint = %endpoint.name,
                    url = %url,
                    error = %error,
                    "Backend call failed"
                );
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-keep", HeaderValue::from_static("1"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-keep"));
    }
}
