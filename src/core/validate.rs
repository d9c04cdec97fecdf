//! Candidate record validation
//!
//! Pure checks run before a record is accepted into the policy store or
//! planned against the facility. Nothing here performs I/O or touches the
//! host: uniqueness constraints are evaluated against the store snapshot the
//! caller passes in, never against the live ruleset. Rejections are
//! deterministic and carry a specific [`RejectReason`] for display.

use crate::core::model::{
    FirewallRule, ForwardProtocol, PolicyState, PortForwardRule, StaticRoute,
};
use crate::validators;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use thiserror::Error;

/// Why a candidate record was rejected.
///
/// Conflict variants (uniqueness/occupancy against the current desired state)
/// are distinguished from plain validation failures so callers can surface
/// them differently; see [`RejectReason::is_conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("name is empty or contains only invalid characters")]
    EmptyName,

    #[error("invalid address or network: {0}")]
    InvalidCidr(String),

    #[error("port filtering requires TCP or UDP")]
    ProtocolPortMismatch,

    #[error("TCP/UDP rules require a destination port or range")]
    MissingPort,

    #[error("invalid port range (ports are 1-65535, start <= end)")]
    InvalidPortRange,

    #[error("an enabled rule already forwards external port {external_port}/{protocol}")]
    PortConflict {
        external_port: u16,
        protocol: ForwardProtocol,
    },

    #[error("an enabled route already occupies destination {destination}")]
    RouteConflict { destination: IpNetwork },

    #[error("route needs a gateway or an interface")]
    MissingNextHop,

    #[error("invalid interface name: {0}")]
    InvalidInterface(String),

    #[error("metric {0} exceeds maximum (65535)")]
    InvalidMetric(u32),

    #[error("port forward targets must be IPv4 (NAT table is IPv4-only)")]
    UnsupportedAddressFamily,
}

impl RejectReason {
    /// `true` for uniqueness/occupancy violations against the desired state,
    /// `false` for plain well-formedness failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RejectReason::PortConflict { .. } | RejectReason::RouteConflict { .. }
        )
    }
}

/// Parses an address or CIDR, mapping failure to a displayable rejection.
/// Bare addresses are accepted and treated as host networks (/32 or /128).
pub fn parse_cidr(input: &str) -> Result<IpNetwork, RejectReason> {
    input
        .trim()
        .parse()
        .map_err(|_| RejectReason::InvalidCidr(input.to_string()))
}

/// Parses a plain IP address (no prefix length).
pub fn parse_ip(input: &str) -> Result<IpAddr, RejectReason> {
    input
        .trim()
        .parse()
        .map_err(|_| RejectReason::InvalidCidr(input.to_string()))
}

/// Validates a firewall rule candidate.
///
/// Checks name, protocol/port consistency, and port bounds. Firewall rules
/// carry no uniqueness constraint - overlapping rules are legal and resolved
/// by priority order.
pub fn validate_firewall_rule(rule: &FirewallRule) -> Result<(), RejectReason> {
    if validators::sanitize_name(&rule.name).is_empty() {
        return Err(RejectReason::EmptyName);
    }

    match (&rule.ports, rule.protocol.supports_ports()) {
        (Some(_), false) => return Err(RejectReason::ProtocolPortMismatch),
        (None, true) => return Err(RejectReason::MissingPort),
        (Some(ports), true) => {
            if validators::validate_port_range(ports.start, ports.end).is_err() {
                return Err(RejectReason::InvalidPortRange);
            }
        }
        (None, false) => {}
    }

    Ok(())
}

/// Validates a port-forward candidate against the current desired state.
///
/// `(external_port, protocol)` must be unique among *enabled* rules; a second
/// enabled rule with the same pair is a conflict, not a silent overwrite.
/// Disabled rules do not occupy the pair. The candidate's own id is excluded
/// so edits don't self-conflict.
pub fn validate_port_forward(
    rule: &PortForwardRule,
    state: &PolicyState,
) -> Result<(), RejectReason> {
    if validators::sanitize_name(&rule.name).is_empty() {
        return Err(RejectReason::EmptyName);
    }

    if validators::validate_port(rule.external_port).is_err()
        || validators::validate_port(rule.internal_port).is_err()
    {
        return Err(RejectReason::InvalidPortRange);
    }

    // The NAT rewrite lands in an IPv4 NAT table
    if rule.internal_host.is_ipv6() {
        return Err(RejectReason::UnsupportedAddressFamily);
    }

    if rule.enabled {
        let taken = state.port_forwards.iter().any(|existing| {
            existing.id != rule.id
                && existing.enabled
                && existing.external_port == rule.external_port
                && existing.protocol == rule.protocol
        });
        if taken {
            return Err(RejectReason::PortConflict {
                external_port: rule.external_port,
                protocol: rule.protocol,
            });
        }
    }

    Ok(())
}

/// Validates a static-route candidate against the current desired state.
///
/// A route needs at least one of gateway/interface, a kernel-valid interface
/// name when one is given, and a free destination: no two enabled routes may
/// occupy the same destination network.
pub fn validate_static_route(
    route: &StaticRoute,
    state: &PolicyState,
) -> Result<(), RejectReason> {
    if validators::sanitize_name(&route.name).is_empty() {
        return Err(RejectReason::EmptyName);
    }

    if route.gateway.is_none() && route.interface.is_empty() {
        return Err(RejectReason::MissingNextHop);
    }

    if validators::validate_interface(&route.interface).is_err() {
        return Err(RejectReason::InvalidInterface(route.interface.clone()));
    }

    if validators::validate_metric(route.metric).is_err() {
        return Err(RejectReason::InvalidMetric(route.metric));
    }

    if route.enabled {
        let occupied = state.static_routes.iter().any(|existing| {
            existing.id != route.id
                && existing.enabled
                && existing.destination == route.destination
        });
        if occupied {
            return Err(RejectReason::RouteConflict {
                destination: route.destination,
            });
        }
    }

    Ok(())
}
