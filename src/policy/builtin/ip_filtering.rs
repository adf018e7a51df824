//! `ip-filtering` policy.
//!
//! Allows or denies a request by client address. Entries are single
//! addresses or CIDR blocks. The deny list wins over the allow list; an empty
//! allow list allows everyone not denied.

use std::net::IpAddr;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::execution::{ExecutionContext, Interruption};
use crate::policy::builtin::parse_config;
use crate::policy::{Policy, PolicyError, StepOutcome};

pub const POLICY_ID: &str = "ip-filtering";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IpFilteringConfig {
    pub whitelist_ips: Vec<String>,
    pub blacklist_ips: Vec<String>,
    /// Take the client address from the first `X-Forwarded-For` entry.
    pub use_x_forwarded_for: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpBlock {
    network: IpAddr,
    prefix: u8,
}

impl IpBlock {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (address, prefix) = match raw.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (raw, None),
        };
        let network: IpAddr = address.parse().map_err(|_| format!("invalid address '{raw}'"))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| format!("invalid prefix in '{raw}'"))?,
            None => max,
        };
        if prefix > max {
            return Err(format!("prefix too long in '{raw}'"));
        }
        Ok(Self { network, prefix })
    }

    fn contains(&self, address: IpAddr) -> bool {
        match (self.network, address) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

pub struct IpFilteringPolicy {
    allow: Vec<IpBlock>,
    deny: Vec<IpBlock>,
    use_x_forwarded_for: bool,
}

impl IpFilteringPolicy {
    pub fn from_config(configuration: &Value) -> Result<Self, PolicyError> {
        let config: IpFilteringConfig = parse_config(POLICY_ID, configuration)?;
        let parse = |entries: &[String]| {
            entries
                .iter()
                .map(|raw| IpBlock::parse(raw).map_err(|e| PolicyError::invalid(POLICY_ID, e)))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            allow: parse(&config.whitelist_ips)?,
            deny: parse(&config.blacklist_ips)?,
            use_x_forwarded_for: config.use_x_forwarded_for,
        })
    }

    fn client_address(&self, ctx: &ExecutionContext) -> Option<IpAddr> {
        if self.use_x_forwarded_for {
            let forwarded = ctx
                .request()
                .header("x-forwarded-for")
                .and_then(|value| value.split(',').next())
                .and_then(|first| first.trim().parse().ok());
            if forwarded.is_some() {
                return forwarded;
            }
        }
        ctx.request().remote_addr.map(|addr| addr.ip())
    }

    fn is_allowed(&self, address: Option<IpAddr>) -> bool {
        let Some(address) = address else {
            return self.allow.is_empty();
        };
        if self.deny.iter().any(|block| block.contains(address)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|block| block.contains(address))
    }
}

#[async_trait]
impl Policy for IpFilteringPolicy {
    fn id(&self) -> &str {
        POLICY_ID
    }

    async fn on_request(&self, ctx: &mut ExecutionContext) -> StepOutcome {
        let address = self.client_address(ctx);
        if self.is_allowed(address) {
            return StepOutcome::Continue;
        }
        let shown = address.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into());
        StepOutcome::Interrupt(Interruption::new(
            StatusCode::FORBIDDEN,
            "CLIENT_IP_NOT_ALLOWED",
            format!("Your IP ({shown}) or some proxies whereby your request pass through are not allowed to reach this resource."),
        ))
    }
}
