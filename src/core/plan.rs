//! Plan generation: desired state to ordered command lists
//!
//! The translator maps validated records into facility-neutral
//! [`CommandOp`]s. It never sees the facility's command grammar - the
//! executor renders ops to `nft`/`ip`/`sysctl` argv - so the facility could
//! be swapped without touching anything here.
//!
//! Ordering rules encoded in this module:
//!
//! - Firewall rules are emitted in ascending priority, creation order for
//!   ties, because the facility evaluates top-to-bottom and first-match-wins
//!   for terminating actions.
//! - Every port forward expands into exactly two artifacts - the DNAT rewrite
//!   and the matching forward-accept - emitted adjacently, NAT first. A NAT
//!   rewrite without its accept is silently dropped by a default-deny forward
//!   policy, so the pair is planned (and rolled back) as a unit.
//! - Removal plans mirror apply plans in reverse order: the forward-accept
//!   goes before its DNAT rule, the persist artifact before its route.

use crate::core::model::{
    Chain, FirewallRule, ForwardProtocol, IdentityTag, PolicyState, PortForwardRule, PortRange,
    Protocol, StaticRoute, SystemSettings,
};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::IpAddr;

/// Match/verdict fields of a packet-filter artifact, detached from the
/// record's bookkeeping fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRuleSpec {
    pub protocol: Protocol,
    pub source: Option<IpNetwork>,
    pub ports: Option<PortRange>,
    pub action: crate::core::model::Action,
}

impl From<&FirewallRule> for FilterRuleSpec {
    fn from(rule: &FirewallRule) -> Self {
        Self {
            protocol: rule.protocol,
            source: rule.source,
            ports: rule.ports,
            action: rule.action,
        }
    }
}

impl FilterRuleSpec {
    /// Match + verdict tokens in the facility's rule syntax, without the
    /// comment. Shared by the executor (argv) and the preview renderer
    /// (joined text), so the two can never drift apart.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();

        if let Some(src) = self.source {
            tokens.push(if src.is_ipv6() { "ip6" } else { "ip" }.to_string());
            tokens.push("saddr".to_string());
            tokens.push(src.to_string());
        }

        match self.protocol {
            Protocol::All => {}
            Protocol::Tcp | Protocol::Udp => {
                tokens.push(self.protocol.as_str().to_string());
                if let Some(ports) = self.ports {
                    tokens.push("dport".to_string());
                    tokens.push(ports.to_string());
                }
            }
            Protocol::Icmp => {
                tokens.push("meta".to_string());
                tokens.push("l4proto".to_string());
                tokens.push("icmp".to_string());
            }
        }

        tokens.push(self.action.as_str().to_string());
        tokens
    }
}

/// One facility-neutral operation. Everything the manager can do to the host
/// is one of these; the executor owns the translation to actual commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOp {
    AddFilterRule {
        chain: Chain,
        spec: FilterRuleSpec,
    },
    /// Tag-addressed delete; the executor resolves the tag to live handles
    DeleteFilterRule {
        chain: Chain,
    },
    AddDnatRule {
        protocol: ForwardProtocol,
        external_port: u16,
        internal_host: IpAddr,
        internal_port: u16,
    },
    DeleteDnatRule,
    AddForwardAccept {
        protocol: ForwardProtocol,
        internal_host: IpAddr,
        internal_port: u16,
    },
    DeleteForwardAccept,
    AddRoute {
        destination: IpNetwork,
        gateway: Option<IpAddr>,
        interface: String,
        metric: u32,
    },
    DeleteRoute {
        destination: IpNetwork,
        gateway: Option<IpAddr>,
        interface: String,
    },
    /// Write the reboot-persist artifact for a route into the well-known
    /// directory
    WriteRoutePersist {
        destination: IpNetwork,
        gateway: Option<IpAddr>,
        interface: String,
        metric: u32,
    },
    RemoveRoutePersist,
    AddMasquerade {
        interface: String,
    },
    DeleteMasquerade,
    SetSysctl {
        key: String,
        value: String,
    },
}

impl CommandOp {
    /// The op that undoes this op, used for rollback of partially applied
    /// plans. Deletes and sysctl writes have no inverse: rollback only ever
    /// removes artifacts this invocation created, it never resurrects deleted
    /// ones or guesses previous sysctl values.
    pub fn inverse(&self) -> Option<CommandOp> {
        match self {
            CommandOp::AddFilterRule { chain, .. } => {
                Some(CommandOp::DeleteFilterRule { chain: *chain })
            }
            CommandOp::AddDnatRule { .. } => Some(CommandOp::DeleteDnatRule),
            CommandOp::AddForwardAccept { .. } => Some(CommandOp::DeleteForwardAccept),
            CommandOp::AddRoute {
                destination,
                gateway,
                interface,
                ..
            } => Some(CommandOp::DeleteRoute {
                destination: *destination,
                gateway: *gateway,
                interface: interface.clone(),
            }),
            CommandOp::WriteRoutePersist { .. } => Some(CommandOp::RemoveRoutePersist),
            CommandOp::AddMasquerade { .. } => Some(CommandOp::DeleteMasquerade),
            CommandOp::DeleteFilterRule { .. }
            | CommandOp::DeleteDnatRule
            | CommandOp::DeleteForwardAccept
            | CommandOp::DeleteRoute { .. }
            | CommandOp::RemoveRoutePersist
            | CommandOp::DeleteMasquerade
            | CommandOp::SetSysctl { .. } => None,
        }
    }
}

/// Whether a planned command installs or removes policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Apply,
    Remove,
}

/// One command in a plan, tagged with the record identity it serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCommand {
    pub tag: IdentityTag,
    pub action: PlanAction,
    pub op: CommandOp,
}

/// An ordered command list for one apply/remove cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub commands: Vec<PlannedCommand>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Plan to install one firewall rule
pub fn apply_firewall_rule(rule: &FirewallRule) -> Plan {
    Plan {
        commands: vec![PlannedCommand {
            tag: rule.tag(),
            action: PlanAction::Apply,
            op: CommandOp::AddFilterRule {
                chain: rule.chain,
                spec: FilterRuleSpec::from(rule),
            },
        }],
    }
}

/// Plan to remove one firewall rule's artifact
pub fn remove_firewall_rule(rule: &FirewallRule) -> Plan {
    Plan {
        commands: vec![PlannedCommand {
            tag: rule.tag(),
            action: PlanAction::Remove,
            op: CommandOp::DeleteFilterRule { chain: rule.chain },
        }],
    }
}

/// Plan to install one port forward: always the DNAT/forward-accept pair,
/// NAT first. Never emits one without the other.
pub fn apply_port_forward(rule: &PortForwardRule) -> Plan {
    let tag = rule.tag();
    Plan {
        commands: vec![
            PlannedCommand {
                tag,
                action: PlanAction::Apply,
                op: CommandOp::AddDnatRule {
                    protocol: rule.protocol,
                    external_port: rule.external_port,
                    internal_host: rule.internal_host,
                    internal_port: rule.internal_port,
                },
            },
            PlannedCommand {
                tag,
                action: PlanAction::Apply,
                op: CommandOp::AddForwardAccept {
                    protocol: rule.protocol,
                    internal_host: rule.internal_host,
                    internal_port: rule.internal_port,
                },
            },
        ],
    }
}

/// Plan to remove one port forward's pair, in reverse apply order: the
/// forward-accept goes first so no window exists where traffic is still
/// DNAT-rewritten toward a chain that accepts it.
pub fn remove_port_forward(rule: &PortForwardRule) -> Plan {
    let tag = rule.tag();
    Plan {
        commands: vec![
            PlannedCommand {
                tag,
                action: PlanAction::Remove,
                op: CommandOp::DeleteForwardAccept,
            },
            PlannedCommand {
                tag,
                action: PlanAction::Remove,
                op: CommandOp::DeleteDnatRule,
            },
        ],
    }
}

/// Plan to install one static route, plus its persist artifact when requested
pub fn apply_static_route(route: &StaticRoute) -> Plan {
    let tag = route.tag();
    let mut commands = vec![PlannedCommand {
        tag,
        action: PlanAction::Apply,
        op: CommandOp::AddRoute {
            destination: route.destination,
            gateway: route.gateway,
            interface: route.interface.clone(),
            metric: route.metric,
        },
    }];

    if route.persistent {
        commands.push(PlannedCommand {
            tag,
            action: PlanAction::Apply,
            op: CommandOp::WriteRoutePersist {
                destination: route.destination,
                gateway: route.gateway,
                interface: route.interface.clone(),
                metric: route.metric,
            },
        });
    }

    Plan { commands }
}

/// Plan to remove one static route and (always) its persist artifact, in
/// reverse apply order. Removing the persist file for a never-persisted
/// route is a harmless no-op.
pub fn remove_static_route(route: &StaticRoute) -> Plan {
    let tag = route.tag();
    Plan {
        commands: vec![
            PlannedCommand {
                tag,
                action: PlanAction::Remove,
                op: CommandOp::RemoveRoutePersist,
            },
            PlannedCommand {
                tag,
                action: PlanAction::Remove,
                op: CommandOp::DeleteRoute {
                    destination: route.destination,
                    gateway: route.gateway,
                    interface: route.interface.clone(),
                },
            },
        ],
    }
}

/// Plan for the kernel forwarding switches alone
pub fn forwarding_plan(system: &SystemSettings) -> Plan {
    Plan {
        commands: vec![
            PlannedCommand {
                tag: IdentityTag::Forwarding,
                action: PlanAction::Apply,
                op: CommandOp::SetSysctl {
                    key: "net.ipv4.ip_forward".to_string(),
                    value: if system.ipv4_forwarding { "1" } else { "0" }.to_string(),
                },
            },
            PlannedCommand {
                tag: IdentityTag::Forwarding,
                action: PlanAction::Apply,
                op: CommandOp::SetSysctl {
                    key: "net.ipv6.conf.all.forwarding".to_string(),
                    value: if system.ipv6_forwarding { "1" } else { "0" }.to_string(),
                },
            },
        ],
    }
}

/// Plan to install the egress masquerade artifact
pub fn masquerade_apply(interface: &str) -> Plan {
    Plan {
        commands: vec![PlannedCommand {
            tag: IdentityTag::Masquerade,
            action: PlanAction::Apply,
            op: CommandOp::AddMasquerade {
                interface: interface.to_string(),
            },
        }],
    }
}

/// Plan to remove the egress masquerade artifact (no-op when absent)
pub fn masquerade_remove() -> Plan {
    Plan {
        commands: vec![PlannedCommand {
            tag: IdentityTag::Masquerade,
            action: PlanAction::Remove,
            op: CommandOp::DeleteMasquerade,
        }],
    }
}

/// Plan for the system-settings artifacts (forwarding sysctls, masquerade)
pub fn apply_system(system: &SystemSettings) -> Plan {
    let mut full = forwarding_plan(system);
    if system.nat_enabled && !system.nat_interface.is_empty() {
        full.commands
            .extend(masquerade_apply(&system.nat_interface).commands);
    }
    full
}

/// Removal plan for every managed artifact, disabled records included, in
/// reverse apply order. Tag-addressed deletes are no-ops where nothing is
/// live, so prefixing this to [`full_apply_plan`] makes a full reconcile
/// idempotent instead of duplicating artifacts.
pub fn full_removal_plan(state: &PolicyState) -> Plan {
    let mut commands = Vec::new();

    commands.extend(masquerade_remove().commands);

    let mut routes: Vec<&StaticRoute> = state.static_routes.iter().collect();
    routes.sort_by_key(|r| (r.metric, r.destination));
    for route in routes.iter().rev() {
        commands.extend(remove_static_route(route).commands);
    }

    let mut forwards: Vec<&PortForwardRule> = state.port_forwards.iter().collect();
    forwards.sort_by_key(|r| r.external_port);
    for rule in forwards.iter().rev() {
        commands.extend(remove_port_forward(rule).commands);
    }

    let mut rules: Vec<&FirewallRule> = state.firewall_rules.iter().collect();
    rules.sort_by_key(|r| (r.priority, r.created_at));
    for rule in rules.iter().rev() {
        commands.extend(remove_firewall_rule(rule).commands);
    }

    Plan { commands }
}

/// Full reconcile plan for the entire desired state.
///
/// Firewall rules first (priority order), then port-forward pairs (ascending
/// external port), then routes (ascending metric, then destination), then
/// system settings.
pub fn full_apply_plan(state: &PolicyState) -> Plan {
    let mut commands = Vec::new();

    for rule in state.ordered_firewall_rules() {
        commands.extend(apply_firewall_rule(rule).commands);
    }

    let mut forwards: Vec<&PortForwardRule> =
        state.port_forwards.iter().filter(|r| r.enabled).collect();
    forwards.sort_by_key(|r| r.external_port);
    for rule in forwards {
        commands.extend(apply_port_forward(rule).commands);
    }

    let mut routes: Vec<&StaticRoute> = state.static_routes.iter().filter(|r| r.enabled).collect();
    routes.sort_by_key(|r| (r.metric, r.destination));
    for route in routes {
        commands.extend(apply_static_route(route).commands);
    }

    commands.extend(apply_system(&state.system).commands);

    Plan { commands }
}

// ═══════════════════════════════════════════════════════════════════════════
// Preview rendering
// ═══════════════════════════════════════════════════════════════════════════

/// Renders the desired state as the facility would print it back
/// (`nft list ruleset` format). Used by the CLI dry-run and, with
/// [`render_routes_preview`], by the round-trip tests against the state
/// parser.
pub fn render_ruleset_preview(state: &PolicyState) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "table inet routemgr {{");
    let _ = writeln!(out, "\tchain input {{");
    let _ = writeln!(
        out,
        "\t\ttype filter hook input priority filter; policy accept;"
    );
    let _ = writeln!(out, "\t\tiif \"lo\" accept");
    let _ = writeln!(out, "\t\tct state established,related accept");
    for rule in state.ordered_firewall_rules() {
        if rule.chain == Chain::Input {
            let _ = writeln!(
                out,
                "\t\t{} comment \"{}\"",
                FilterRuleSpec::from(rule).tokens().join(" "),
                rule.tag()
            );
        }
    }
    let _ = writeln!(out, "\t}}");

    let _ = writeln!(out, "\tchain forward {{");
    let _ = writeln!(
        out,
        "\t\ttype filter hook forward priority filter; policy accept;"
    );
    let _ = writeln!(out, "\t\tct state established,related accept");
    for rule in state.ordered_firewall_rules() {
        if rule.chain == Chain::Forward {
            let _ = writeln!(
                out,
                "\t\t{} comment \"{}\"",
                FilterRuleSpec::from(rule).tokens().join(" "),
                rule.tag()
            );
        }
    }
    let mut forwards: Vec<&PortForwardRule> =
        state.port_forwards.iter().filter(|r| r.enabled).collect();
    forwards.sort_by_key(|r| r.external_port);
    for rule in &forwards {
        let _ = writeln!(
            out,
            "\t\tip daddr {} {} dport {} accept comment \"{}\"",
            rule.internal_host,
            rule.protocol,
            rule.internal_port,
            rule.tag()
        );
    }
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "}}");

    let _ = writeln!(out, "table ip routemgr-nat {{");
    let _ = writeln!(out, "\tchain prerouting {{");
    let _ = writeln!(
        out,
        "\t\ttype nat hook prerouting priority dstnat; policy accept;"
    );
    for rule in &forwards {
        let _ = writeln!(
            out,
            "\t\t{} dport {} dnat to {}:{} comment \"{}\"",
            rule.protocol,
            rule.external_port,
            rule.internal_host,
            rule.internal_port,
            rule.tag()
        );
    }
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "\tchain postrouting {{");
    let _ = writeln!(
        out,
        "\t\ttype nat hook postrouting priority srcnat; policy accept;"
    );
    if state.system.nat_enabled && !state.system.nat_interface.is_empty() {
        let _ = writeln!(
            out,
            "\t\toifname \"{}\" masquerade comment \"{}\"",
            state.system.nat_interface,
            IdentityTag::Masquerade
        );
    }
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "}}");

    out
}

/// Renders the desired routes as the facility would print them back
/// (`ip route show` format).
pub fn render_routes_preview(state: &PolicyState) -> String {
    let mut out = String::new();
    let mut routes: Vec<&StaticRoute> = state.static_routes.iter().filter(|r| r.enabled).collect();
    routes.sort_by_key(|r| (r.metric, r.destination));

    for route in routes {
        let _ = write!(out, "{}", route.destination);
        if let Some(gateway) = route.gateway {
            let _ = write!(out, " via {gateway}");
        }
        if !route.interface.is_empty() {
            let _ = write!(out, " dev {}", route.interface);
        }
        let _ = writeln!(out, " metric {}", route.metric);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Action;

    fn tcp_rule(name: &str, port: u16, priority: u32) -> FirewallRule {
        let mut rule = FirewallRule::new(name, Protocol::Tcp, "admin");
        rule.ports = Some(PortRange::single(port));
        rule.priority = priority;
        rule
    }

    fn forward(port: u16) -> PortForwardRule {
        PortForwardRule::new(
            "fwd",
            port,
            ForwardProtocol::Tcp,
            "10.0.0.5".parse().unwrap(),
            80,
            "admin",
        )
    }

    #[test]
    fn test_firewall_plan_priority_order() {
        let mut state = PolicyState::new();
        state.firewall_rules.push(tcp_rule("late", 80, 200));
        state.firewall_rules.push(tcp_rule("early", 22, 10));

        let plan = full_apply_plan(&state);
        let tags: Vec<String> = plan.commands.iter().map(|c| c.tag.to_string()).collect();

        let early_tag = state.firewall_rules[1].tag().to_string();
        let late_tag = state.firewall_rules[0].tag().to_string();
        assert_eq!(tags[0], early_tag);
        assert_eq!(tags[1], late_tag);
    }

    #[test]
    fn test_port_forward_expands_to_pair() {
        let rule = forward(8080);
        let plan = apply_port_forward(&rule);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.commands[0].tag, rule.tag());
        assert_eq!(plan.commands[1].tag, rule.tag());
        assert!(matches!(
            plan.commands[0].op,
            CommandOp::AddDnatRule { external_port: 8080, .. }
        ));
        assert!(matches!(
            plan.commands[1].op,
            CommandOp::AddForwardAccept { internal_port: 80, .. }
        ));
    }

    #[test]
    fn test_port_forward_removal_is_reverse_of_apply() {
        let rule = forward(8080);
        let plan = remove_port_forward(&rule);

        assert_eq!(plan.len(), 2);
        assert!(matches!(plan.commands[0].op, CommandOp::DeleteForwardAccept));
        assert!(matches!(plan.commands[1].op, CommandOp::DeleteDnatRule));
    }

    #[test]
    fn test_route_plan_persist_artifact_only_when_requested() {
        let mut route = StaticRoute::new(
            "lab",
            "10.1.0.0/24".parse().unwrap(),
            Some("192.168.1.1".parse().unwrap()),
            "eth0",
            "admin",
        );

        assert_eq!(apply_static_route(&route).len(), 1);

        route.persistent = true;
        let plan = apply_static_route(&route);
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan.commands[0].op, CommandOp::AddRoute { .. }));
        assert!(matches!(
            plan.commands[1].op,
            CommandOp::WriteRoutePersist { .. }
        ));
    }

    #[test]
    fn test_route_removal_reverse_order() {
        let route = StaticRoute::new(
            "lab",
            "10.1.0.0/24".parse().unwrap(),
            Some("192.168.1.1".parse().unwrap()),
            "eth0",
            "admin",
        );
        let plan = remove_static_route(&route);
        assert!(matches!(plan.commands[0].op, CommandOp::RemoveRoutePersist));
        assert!(matches!(plan.commands[1].op, CommandOp::DeleteRoute { .. }));
    }

    #[test]
    fn test_full_plan_skips_disabled_records() {
        let mut state = PolicyState::new();
        let mut rule = tcp_rule("off", 80, 100);
        rule.enabled = false;
        state.firewall_rules.push(rule);
        let mut fwd = forward(8080);
        fwd.enabled = false;
        state.port_forwards.push(fwd);

        let plan = full_apply_plan(&state);
        // Only the two forwarding sysctls remain
        assert_eq!(plan.len(), 2);
        assert!(plan
            .commands
            .iter()
            .all(|c| matches!(c.op, CommandOp::SetSysctl { .. })));
    }

    #[test]
    fn test_full_plan_keeps_pairs_adjacent() {
        let mut state = PolicyState::new();
        state.port_forwards.push(forward(9090));
        state.port_forwards.push(forward(8080));

        let plan = full_apply_plan(&state);
        let ops: Vec<&CommandOp> = plan
            .commands
            .iter()
            .filter(|c| {
                matches!(
                    c.op,
                    CommandOp::AddDnatRule { .. } | CommandOp::AddForwardAccept { .. }
                )
            })
            .map(|c| &c.op)
            .collect();

        // Ordered by external port, each DNAT immediately followed by its accept
        assert!(matches!(
            ops[0],
            CommandOp::AddDnatRule { external_port: 8080, .. }
        ));
        assert!(matches!(ops[1], CommandOp::AddForwardAccept { .. }));
        assert!(matches!(
            ops[2],
            CommandOp::AddDnatRule { external_port: 9090, .. }
        ));
        assert!(matches!(ops[3], CommandOp::AddForwardAccept { .. }));
    }

    #[test]
    fn test_masquerade_planned_only_when_enabled() {
        let mut state = PolicyState::new();
        state.system.nat_enabled = true;
        state.system.nat_interface = "eth0".to_string();

        let plan = full_apply_plan(&state);
        assert!(plan
            .commands
            .iter()
            .any(|c| matches!(c.op, CommandOp::AddMasquerade { .. })));

        state.system.nat_enabled = false;
        let plan = full_apply_plan(&state);
        assert!(!plan
            .commands
            .iter()
            .any(|c| matches!(c.op, CommandOp::AddMasquerade { .. })));
    }

    #[test]
    fn test_inverse_ops() {
        let add = CommandOp::AddFilterRule {
            chain: Chain::Input,
            spec: FilterRuleSpec::from(&tcp_rule("ssh", 22, 10)),
        };
        assert_eq!(
            add.inverse(),
            Some(CommandOp::DeleteFilterRule { chain: Chain::Input })
        );

        let dnat = CommandOp::AddDnatRule {
            protocol: ForwardProtocol::Tcp,
            external_port: 8080,
            internal_host: "10.0.0.5".parse().unwrap(),
            internal_port: 80,
        };
        assert_eq!(dnat.inverse(), Some(CommandOp::DeleteDnatRule));

        // Deletes and sysctl writes have no inverse
        assert_eq!(CommandOp::DeleteDnatRule.inverse(), None);
        assert_eq!(
            CommandOp::SetSysctl {
                key: "net.ipv4.ip_forward".into(),
                value: "1".into()
            }
            .inverse(),
            None
        );
    }

    #[test]
    fn test_filter_rule_tokens() {
        let mut rule = tcp_rule("ssh", 22, 10);
        rule.source = Some("192.168.1.0/24".parse().unwrap());
        let tokens = FilterRuleSpec::from(&rule).tokens();
        assert_eq!(
            tokens,
            vec!["ip", "saddr", "192.168.1.0/24", "tcp", "dport", "22", "accept"]
        );

        let mut icmp = FirewallRule::new("ping", Protocol::Icmp, "admin");
        icmp.action = Action::Drop;
        assert_eq!(
            FilterRuleSpec::from(&icmp).tokens(),
            vec!["meta", "l4proto", "icmp", "drop"]
        );

        let all = FirewallRule::new("everything", Protocol::All, "admin");
        assert_eq!(FilterRuleSpec::from(&all).tokens(), vec!["accept"]);
    }

    #[test]
    fn test_preview_contains_tags_and_order() {
        let mut state = PolicyState::new();
        state.firewall_rules.push(tcp_rule("ssh", 22, 10));
        state.port_forwards.push(forward(8080));

        let text = render_ruleset_preview(&state);
        let fw_tag = state.firewall_rules[0].tag().to_string();
        let pf_tag = state.port_forwards[0].tag().to_string();

        assert!(text.contains(&format!("tcp dport 22 accept comment \"{fw_tag}\"")));
        assert!(text.contains(&format!(
            "tcp dport 8080 dnat to 10.0.0.5:80 comment \"{pf_tag}\""
        )));
        assert!(text.contains(&format!(
            "ip daddr 10.0.0.5 tcp dport 80 accept comment \"{pf_tag}\""
        )));
    }

    #[test]
    fn test_routes_preview_format() {
        let mut state = PolicyState::new();
        state.static_routes.push(StaticRoute::new(
            "lab",
            "10.1.0.0/24".parse().unwrap(),
            Some("192.168.1.1".parse().unwrap()),
            "eth0",
            "admin",
        ));

        let text = render_routes_preview(&state);
        assert_eq!(text, "10.1.0.0/24 via 192.168.1.1 dev eth0 metric 100\n");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Emitted firewall command order is non-decreasing in priority with
        /// creation-order tiebreak, whatever order records were inserted in.
        #[test]
        fn test_plan_order_nondecreasing(priorities in proptest::collection::vec(0u32..500, 1..40)) {
            let mut state = PolicyState::new();
            let base = chrono::Utc::now();
            for (i, priority) in priorities.iter().enumerate() {
                let mut rule = FirewallRule::new(format!("r{i}"), Protocol::Icmp, "admin");
                rule.priority = *priority;
                // Strictly increasing creation times in insertion order
                rule.created_at = base + chrono::Duration::seconds(i64::try_from(i).unwrap());
                state.firewall_rules.push(rule);
            }

            let ordered = state.ordered_firewall_rules();
            for pair in ordered.windows(2) {
                prop_assert!(pair[0].priority <= pair[1].priority);
                if pair[0].priority == pair[1].priority {
                    prop_assert!(pair[0].created_at <= pair[1].created_at);
                }
            }
        }

        /// Port forwards always plan as a complete pair.
        #[test]
        fn test_pair_invariant(port in 1u16..=65535) {
            let rule = PortForwardRule::new(
                "fwd", port, ForwardProtocol::Udp,
                "192.168.0.9".parse().unwrap(), 9000, "admin",
            );
            let apply = apply_port_forward(&rule);
            let remove = remove_port_forward(&rule);
            prop_assert_eq!(apply.len(), 2);
            prop_assert_eq!(remove.len(), 2);
            prop_assert!(apply.commands.iter().all(|c| c.tag == rule.tag()));
            prop_assert!(remove.commands.iter().all(|c| c.tag == rule.tag()));
        }
    }
}
