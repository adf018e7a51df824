//! Policy id → constructor table.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::policy::builtin;
use crate::policy::{Policy, PolicyError};
use crate::resilience::CircuitBreakers;
use crate::security::CounterStore;

/// Creates a policy instance for one step.
pub trait PolicyFactory: Send + Sync {
    fn create(&self, policy_id: &str, configuration: &Value) -> Result<Arc<dyn Policy>, PolicyError>;
}

type Constructor = Arc<dyn Fn(&Value) -> Result<Arc<dyn Policy>, PolicyError> + Send + Sync>;

/// Explicit registration table. Unknown ids are an error, never a panic.
#[derive(Default, Clone)]
pub struct PolicyRegistry {
    constructors: HashMap<String, Constructor>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in policy registered.
    pub fn with_builtins(
        counters: Arc<dyn CounterStore>,
        breakers: Arc<CircuitBreakers>,
        store_attempts: u32,
    ) -> Self {
        let mut registry = Self::new();

        registry.register(builtin::rate_limit::POLICY_ID, move |config| {
            let policy = builtin::RateLimitPolicy::from_config(config, Arc::clone(&counters), store_attempts)?;
            Ok(Arc::new(policy) as Arc<dyn Policy>)
        });
        registry.register(builtin::circuit_breaker::POLICY_ID, move |config| {
            let policy = builtin::CircuitBreakerPolicy::from_config(config, Arc::clone(&breakers))?;
            Ok(Arc::new(policy) as Arc<dyn Policy>)
        });
        registry.register(builtin::transform_headers::POLICY_ID, |config| {
            Ok(Arc::new(builtin::TransformHeadersPolicy::from_config(config)?) as Arc<dyn Policy>)
        });
        registry.register(builtin::ip_filtering::POLICY_ID, |config| {
            Ok(Arc::new(builtin::IpFilteringPolicy::from_config(config)?) as Arc<dyn Policy>)
        });
        registry.register(builtin::mock::POLICY_ID, |config| {
            Ok(Arc::new(builtin::MockPolicy::from_config(config)?) as Arc<dyn Policy>)
        });
        registry.register(crate::policy::SHARED_POLICY_GROUP_POLICY, |_| {
            Ok(Arc::new(builtin::SharedPolicyGroupMarker) as Arc<dyn Policy>)
        });

        registry
    }

    /// Register or replace the constructor for a policy id.
    pub fn register<F>(&mut self, policy_id: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Policy>, PolicyError> + Send + Sync + 'static,
    {
        self.constructors.insert(policy_id.into(), Arc::new(constructor));
    }

    pub fn contains(&self, policy_id: &str) -> bool {
        self.constructors.contains_key(policy_id)
    }

    pub fn policy_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl PolicyFactory for PolicyRegistry {
    fn create(&self, policy_id: &str, configuration: &Value) -> Result<Arc<dyn Policy>, PolicyError> {
        let constructor = self
            .constructors
            .get(policy_id)
            .ok_or_else(|| PolicyError::UnknownPolicy(policy_id.to_string()))?;
        constructor(configuration)
    }
}
