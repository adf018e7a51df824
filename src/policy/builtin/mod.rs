//! Policies registered by default.
//!
//! | Policy id                    | Phases              | Interrupts with            |
//! |------------------------------|---------------------|----------------------------|
//! | `rate-limit`                 | request             | 429 RATE_LIMIT_TOO_MANY_REQUESTS |
//! | `circuit-breaker`            | request, response   | 503 CIRCUIT_BREAKER_OPEN   |
//! | `transform-headers`          | request, response   | never                      |
//! | `ip-filtering`               | request             | 403 CLIENT_IP_NOT_ALLOWED  |
//! | `mock`                       | request             | configured mock response   |
//! | `shared-policy-group-policy` | any                 | never (expansion marker)   |

pub mod circuit_breaker;
pub mod ip_filtering;
pub mod mock;
pub mod rate_limit;
pub mod transform_headers;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::policy::{Policy, PolicyError, SHARED_POLICY_GROUP_POLICY};

pub use circuit_breaker::CircuitBreakerPolicy;
pub use ip_filtering::IpFilteringPolicy;
pub use mock::MockPolicy;
pub use rate_limit::RateLimitPolicy;
pub use transform_headers::TransformHeadersPolicy;

/// Stands in for a shared policy group the chain builder could not expand.
pub struct SharedPolicyGroupMarker;

#[async_trait]
impl Policy for SharedPolicyGroupMarker {
    fn id(&self) -> &str {
        SHARED_POLICY_GROUP_POLICY
    }
}

/// Deserialize a step configuration; `null` means every default.
pub(crate) fn parse_config<T>(policy: &str, configuration: &Value) -> Result<T, PolicyError>
where
    T: DeserializeOwned + Default,
{
    if configuration.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(configuration.clone()).map_err(|e| PolicyError::invalid(policy, e))
}
