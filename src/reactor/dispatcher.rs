//! Request dispatcher.
//!
//! # Data Flow
//! ```text
//! GatewayRequest
//!     → ApiRegistry::resolve_match ──none──► 404 (debug log, metric)
//!     → ExecutionContext::for_api, in-flight guard
//!     → request phase, raced against cancellation and the deadline:
//!           PLATFORM → plan selection → PLAN → API → backend (exactly once)
//!     → response phase: PLAN → API → PLATFORM
//!       (bounded by cleanup_ms when the request phase was cut short)
//!     → RequestRecord → TelemetrySink
//!     → GatewayResponse
//! ```
//!
//! # Design Decisions
//! - Per-request failures never touch registry state
//! - The context is owned by one request; nothing here is shared mutably
//! - Headers set on the response during the request phase survive the
//!   backend response unless the backend sets the same header

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::BackendConnector;
use crate::config::TimeoutConfig;
use crate::definition::{Phase, Stage};
use crate::error::GatewayError;
use crate::execution::{ExecutionContext, GatewayRequest, GatewayResponse, Interruption};
use crate::flow::{CompositeEvaluator, ExpressionEngine, FlowResolvers};
use crate::observability::{metrics, RequestRecord, TelemetrySink};
use crate::policy::{ChainExecutor, ChainOutcome, PolicyChain, PolicyFactory};
use crate::registry::Registries;
use crate::security::PlanSelector;

pub struct Dispatcher {
    registries: Arc<Registries>,
    resolvers: FlowResolvers,
    executor: ChainExecutor,
    plans: PlanSelector,
    connector: Arc<dyn BackendConnector>,
    telemetry: Arc<dyn TelemetrySink>,
    timeouts: TimeoutConfig,
}

impl Dispatcher {
    pub fn new(
        registries: Arc<Registries>,
        factory: Arc<dyn PolicyFactory>,
        expressions: Arc<dyn ExpressionEngine>,
        connector: Arc<dyn BackendConnector>,
        telemetry: Arc<dyn TelemetrySink>,
        timeouts: TimeoutConfig,
    ) -> Self {
        let evaluator = Arc::new(CompositeEvaluator::standard(Arc::clone(&expressions)));
        Self {
            resolvers: FlowResolvers::new(Arc::clone(&registries), evaluator),
            executor: ChainExecutor::new(factory, expressions),
            plans: PlanSelector::new(Arc::clone(&registries)),
            registries,
            connector,
            telemetry,
            timeouts,
        }
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        self.handle_with_cancel(request, std::future::pending()).await
    }

    /// Serve one request. `cancel` resolves when the client goes away.
    pub async fn handle_with_cancel<C>(&self, request: GatewayRequest, cancel: C) -> GatewayResponse
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let Some(resolved) = self
            .registries
            .apis
            .resolve_match(request.host.as_deref(), &request.path)
        else {
            let error = GatewayError::NotFound {
                host: request.host.clone(),
                path: request.path.clone(),
            };
            tracing::debug!(request_id = %request.id, error = %error, "No api matched");
            metrics::record_not_found();
            metrics::record_request("none", error.status().as_u16(), started.elapsed());
            return error.to_response();
        };

        let _in_flight = self.registries.in_flight().track();
        let mut ctx = ExecutionContext::for_api(request, &resolved);

        let cut_short = {
            let request_phase = self.request_phase(&mut ctx);
            tokio::pin!(cancel);
            tokio::select! {
                _ = request_phase => None,
                _ = &mut cancel => Some(Interruption::cancelled()),
                _ = deadline(self.request_timeout()) => Some(Interruption::timeout()),
            }
        };

        match cut_short {
            Some(interruption) => {
                tracing::warn!(
                    request_id = %ctx.request().id,
                    api_id = %resolved.api.id,
                    key = %interruption.key,
                    "Request phase cut short"
                );
                ctx.interrupt(interruption);
                let cleanup = Duration::from_millis(self.timeouts.cleanup_ms);
                if tokio::time::timeout(cleanup, self.response_phase(&mut ctx)).await.is_err() {
                    tracing::warn!(request_id = %ctx.request().id, "Response phase cleanup timed out");
                }
            }
            None => self.response_phase(&mut ctx).await,
        }

        let status = ctx.response().status.as_u16();
        ctx.metrics_mut().status = status;
        metrics::record_request(&resolved.api.id, status, started.elapsed());
        self.telemetry.record(RequestRecord::from_context(&ctx));
        ctx.into_response()
    }

    fn request_timeout(&self) -> Option<Duration> {
        (self.timeouts.request_ms > 0).then(|| Duration::from_millis(self.timeouts.request_ms))
    }

    async fn request_phase(&self, ctx: &mut ExecutionContext) {
        self.run_stage(Stage::Platform, Phase::Request, ctx).await;
        if ctx.is_interrupted() {
            return;
        }

        if let Err(interruption) = self.plans.select(ctx) {
            tracing::debug!(
                request_id = %ctx.request().id,
                key = %interruption.key,
                "No plan selected"
            );
            metrics::record_policy_interruption(&interruption.key);
            ctx.interrupt(interruption);
            return;
        }

        for stage in [Stage::Plan, Stage::Api] {
            self.run_stage(stage, Phase::Request, ctx).await;
            if ctx.is_interrupted() {
                return;
            }
        }

        self.invoke_backend(ctx).await;
    }

    async fn response_phase(&self, ctx: &mut ExecutionContext) {
        for stage in [Stage::Plan, Stage::Api, Stage::Platform] {
            self.run_stage(stage, Phase::Response, ctx).await;
        }
    }

    async fn run_stage(&self, stage: Stage, phase: Phase, ctx: &mut ExecutionContext) -> ChainOutcome {
        let flows = self.resolvers.resolve(ctx, stage);
        let chain = PolicyChain::build(phase, stage, &flows, |group_id| {
            self.resolvers.resolve_shared_group(ctx, group_id)
        });
        self.executor.execute(&chain, ctx).await
    }

    async fn invoke_backend(&self, ctx: &mut ExecutionContext) {
        let started = Instant::now();
        let result = self.connector.invoke(ctx).await;
        ctx.metrics_mut().backend_ms = Some(started.elapsed().as_millis() as u64);

        match result {
            Ok(mut response) => {
                let carried = std::mem::take(&mut ctx.response_mut().headers);
                for name in carried.keys() {
                    if !response.headers.contains_key(name) {
                        for value in carried.get_all(name) {
                            response.headers.append(name.clone(), value.clone());
                        }
                    }
                }
                ctx.set_response(response);
            }
            Err(error) => {
                ctx.metrics_mut().backend_error = Some(error.to_string());
                ctx.set_response(error.to_response());
            }
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
