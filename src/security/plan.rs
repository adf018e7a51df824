//! Plan selection.
//!
//! Decides which plan of the matched API a request runs under, before plan
//! flows are resolved.
//!
//! ```text
//! API has no plan          → no plan, request proceeds
//! api key presented        → key → subscription → API_KEY plan
//! no key                   → first usable KEYLESS plan
//! nothing fits             → 401
//! ```

use std::sync::Arc;

use axum::http::StatusCode;

use crate::definition::PlanSecurity;
use crate::execution::{attributes, epoch_millis, ExecutionContext, Interruption, InterruptionCause};
use crate::registry::Registries;

pub const API_KEY_HEADER: &str = "x-gravitee-api-key";
pub const API_KEY_QUERY_PARAM: &str = "api-key";

pub struct PlanSelector {
    registries: Arc<Registries>,
}

impl PlanSelector {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self { registries }
    }

    /// Select a plan and record plan, subscription and application attributes.
    pub fn select(&self, ctx: &mut ExecutionContext) -> Result<(), Interruption> {
        let Some(api) = ctx.api().cloned() else {
            return Ok(());
        };
        if api.plans.is_empty() {
            return Ok(());
        }

        let presented_key = ctx
            .request()
            .header(API_KEY_HEADER)
            .or_else(|| ctx.request().query_param(API_KEY_QUERY_PARAM))
            .map(str::to_string);

        match presented_key {
            Some(key) => self.select_by_key(ctx, &key),
            None => {
                let keyless = api
                    .plans
                    .iter()
                    .find(|p| p.security == PlanSecurity::Keyless && p.is_usable());
                match keyless {
                    Some(plan) => {
                        ctx.set_attribute(attributes::PLAN, plan.id.clone());
                        ctx.metrics_mut().plan_id = Some(plan.id.clone());
                        Ok(())
                    }
                    None => Err(unauthorized("API_KEY_MISSING")),
                }
            }
        }
    }

    fn select_by_key(&self, ctx: &mut ExecutionContext, key: &str) -> Result<(), Interruption> {
        let now = epoch_millis();
        let Some(api) = ctx.api().cloned() else {
            return Ok(());
        };

        let api_key = self
            .registries
            .api_keys
            .get(key)
            .filter(|k| k.api_id == api.id && k.is_valid_at(now))
            .ok_or_else(|| unauthorized("API_KEY_INVALID"))?;

        let subscription = self
            .registries
            .subscriptions
            .get(&api_key.subscription_id)
            .filter(|s| s.api_id == api.id && s.is_active_at(now))
            .ok_or_else(|| unauthorized("API_KEY_INVALID"))?;

        let plan = api
            .plan(&subscription.plan_id)
            .filter(|p| p.security == PlanSecurity::ApiKey && p.is_usable())
            .ok_or_else(|| unauthorized("API_KEY_INVALID"))?;

        ctx.set_attribute(attributes::PLAN, plan.id.clone());
        ctx.set_attribute(attributes::SUBSCRIPTION, subscription.id.clone());
        let application = subscription
            .application_id
            .clone()
            .or_else(|| api_key.application_id.clone());
        if let Some(application) = &application {
            ctx.set_attribute(attributes::APPLICATION, application.clone());
        }

        let metrics = ctx.metrics_mut();
        metrics.plan_id = Some(plan.id.clone());
        metrics.application_id = application;
        Ok(())
    }
}

fn unauthorized(key: &str) -> Interruption {
    Interruption::new(StatusCode::UNAUTHORIZED, key, "Unauthorized")
        .with_cause(InterruptionCause::Security)
}
