//! Host-level router settings: IP forwarding and NAT masquerade status
//!
//! A gateway is only a gateway with forwarding enabled and source NAT on the
//! egress interface. Desired values live in
//! [`crate::core::model::SystemSettings`] and are applied through the normal
//! plan pipeline; this module covers the read side.

use crate::core::executor::Executor;
use crate::core::model::IdentityTag;
use crate::core::parser::LiveState;

/// Current kernel forwarding state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingStatus {
    pub ipv4: bool,
    pub ipv6: bool,
}

/// Current NAT state as observed in the live ruleset
#[derive(Debug, Clone, Default)]
pub struct NatStatus {
    pub enabled: bool,
    /// Raw text of the masquerade artifact(s), for display
    pub rules: Vec<String>,
}

/// Interprets a sysctl value dump as a boolean. Tolerates both the bare `-n`
/// form (`1`) and the `key = value` form.
pub(crate) fn parse_sysctl_bool(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed == "1" || trimmed.ends_with("= 1")
}

/// Reads the kernel's current forwarding switches. Unreadable values are
/// reported as disabled rather than failing the page - the status view must
/// render even on a degraded host.
pub async fn forwarding_status(executor: &Executor) -> ForwardingStatus {
    let read = |key: &'static str| async move {
        match executor.read_sysctl(key).await {
            Ok(value) => parse_sysctl_bool(&value),
            Err(e) => {
                tracing::warn!("could not read {key}: {e}");
                false
            }
        }
    };

    ForwardingStatus {
        ipv4: read("net.ipv4.ip_forward").await,
        ipv6: read("net.ipv6.conf.all.forwarding").await,
    }
}

/// Checks the live ruleset for the managed masquerade artifact.
pub async fn nat_status(executor: &Executor) -> NatStatus {
    match executor.live_state().await {
        LiveState::Available(snapshot) => {
            let rules: Vec<String> = snapshot
                .nat_rules
                .iter()
                .filter(|r| r.masquerade && r.tag == Some(IdentityTag::Masquerade))
                .map(|r| r.raw.clone())
                .collect();
            NatStatus {
                enabled: !rules.is_empty(),
                rules,
            }
        }
        LiveState::Unavailable { .. } => NatStatus::default(),
    }
}
