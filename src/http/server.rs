//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: one fallback handler for all gateway traffic
//! - Wire up middleware (request ID, tracing)
//! - Run each request on its own task, cancelled when the client goes away
//! - Serve until the shutdown signal, then stop accepting

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::execution::GatewayResponse;
use crate::http::request::{into_gateway_request, X_REQUEST_ID};
use crate::lifecycle::shutdown;
use crate::reactor::Dispatcher;

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub max_body_bytes: usize,
}

/// HTTP server for gateway traffic.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ListenerConfig) -> Self {
        let state = AppState {
            dispatcher,
            max_body_bytes: config.max_body_bytes,
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Accept connections until `shutdown` fires, then drain open connections.
    pub async fn run(self, listener: TcpListener, shutdown_rx: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Gateway entry point.
///
/// The dispatch runs on a spawned task. If this handler is dropped because
/// the client disconnected, the cancel sender goes with it and the
/// dispatcher interrupts the request phase, then runs response cleanup.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request = match into_gateway_request(request, state.max_body_bytes).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let request_id = request.id.clone();

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let dispatcher = Arc::clone(&state.dispatcher);
    let task = tokio::spawn(async move {
        let cancelled = async move {
            let _ = cancel_rx.await;
        };
        dispatcher.handle_with_cancel(request, cancelled).await
    });

    let _cancel = cancel_tx;
    match task.await {
        Ok(response) => response.into_response(),
        Err(error) => {
            tracing::error!(request_id = %request_id, error = %error, "Dispatch task failed");
            GatewayResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "message": "Internal Server Error" }),
            )
            .into_response()
        }
    }
}
