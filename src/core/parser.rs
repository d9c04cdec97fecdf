//! Live state parsing: facility text dumps to structured snapshots
//!
//! The facility is only observable through its textual dumps (`nft list
//! ruleset`, `ip route show`). This module turns those dumps into the same
//! structured shape the policy store uses, so the UI can diff desired vs live
//! without re-deriving rule semantics twice.
//!
//! The parsing strategy is deliberately narrow and line-oriented (token
//! scanning, no regex engine) and is the only code in the crate that knows
//! the dump format; swapping it for the facility's structured-output mode
//! would not touch the translator or executor.
//!
//! Artifacts with no recognizable identity tag - created by other actors, or
//! by the facility's own defaults - are surfaced as unmanaged rather than
//! silently dropped or misattributed. A malformed or empty ruleset dump
//! yields an explicit [`LiveState::Unavailable`] instead of an error.

use crate::core::model::{Action, IdentityTag, PolicyState, PortRange};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Family + name of the managed filter table as it appears in dumps
const FILTER_TABLE: &str = "inet routemgr";
/// Family + name of the managed NAT table as it appears in dumps
const NAT_TABLE: &str = "ip routemgr-nat";

/// One rule artifact as it exists inside the facility
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRule {
    /// Owning table as `<family> <name>`
    pub table: String,
    pub chain: String,
    /// Facility rule handle, present when the dump was taken with `-a`
    pub handle: Option<u64>,
    /// Identity tag recovered from the comment; `None` means unmanaged
    pub tag: Option<IdentityTag>,
    /// Rule text with handle annotation stripped
    pub raw: String,
    pub action: Option<Action>,
    pub protocol: Option<String>,
    pub dport: Option<PortRange>,
    pub source: Option<IpNetwork>,
    pub daddr: Option<IpAddr>,
    /// DNAT target, for NAT prerouting artifacts
    pub dnat_to: Option<(IpAddr, u16)>,
    pub masquerade: bool,
}

impl LiveRule {
    pub fn is_managed(&self) -> bool {
        self.tag.is_some()
    }
}

/// One routing-table entry as it exists in the kernel
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRoute {
    /// `None` when the destination token did not parse; `default` maps to
    /// 0.0.0.0/0
    pub destination: Option<IpNetwork>,
    pub gateway: Option<IpAddr>,
    pub interface: Option<String>,
    pub metric: Option<u32>,
    pub raw: String,
}

/// Structured view of the facility's current state
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    /// Artifacts in the managed filter table
    pub filter_rules: Vec<LiveRule>,
    /// Artifacts in the managed NAT table
    pub nat_rules: Vec<LiveRule>,
    pub routes: Vec<LiveRoute>,
}

impl LiveSnapshot {
    /// All managed rule artifacts across both tables
    pub fn managed_rules(&self) -> impl Iterator<Item = &LiveRule> {
        self.filter_rules
            .iter()
            .chain(self.nat_rules.iter())
            .filter(|r| r.is_managed())
    }

    /// All unmanaged rule artifacts across both tables
    pub fn unmanaged_rules(&self) -> impl Iterator<Item = &LiveRule> {
        self.filter_rules
            .iter()
            .chain(self.nat_rules.iter())
            .filter(|r| !r.is_managed())
    }
}

/// Result of reading the live state. `Unavailable` is a valid answer, not an
/// error: the facility may not be running, or the managed tables may not
/// exist yet.
#[derive(Debug, Clone)]
pub enum LiveState {
    Available(LiveSnapshot),
    Unavailable { reason: String },
}

impl LiveState {
    #[allow(dead_code)]
    pub fn snapshot(&self) -> Option<&LiveSnapshot> {
        match self {
            LiveState::Available(snap) => Some(snap),
            LiveState::Unavailable { .. } => None,
        }
    }
}

/// Parses the facility's ruleset dump plus the kernel routing table dump
/// into a structured snapshot.
///
/// An empty/whitespace ruleset dump or one without the managed filter table
/// yields `Unavailable`. A dump taken mid-apply is a valid-but-stale
/// snapshot, not corruption: the facility applies commands one at a time.
pub fn parse_live_state(ruleset_dump: &str, routes_dump: &str) -> LiveState {
    if ruleset_dump.trim().is_empty() {
        return LiveState::Unavailable {
            reason: "empty ruleset dump (facility not running?)".to_string(),
        };
    }

    let rules = walk_rules(ruleset_dump);

    let has_managed_table = ruleset_dump.contains(&format!("table {FILTER_TABLE}"))
        || ruleset_dump.contains(&format!("table {NAT_TABLE}"));
    if !has_managed_table {
        return LiveState::Unavailable {
            reason: "managed tables not present in ruleset".to_string(),
        };
    }

    let mut snapshot = LiveSnapshot {
        routes: parse_routes(routes_dump),
        ..LiveSnapshot::default()
    };
    for rule in rules {
        if rule.table == FILTER_TABLE {
            snapshot.filter_rules.push(rule);
        } else if rule.table == NAT_TABLE {
            snapshot.nat_rules.push(rule);
        }
        // Rules in foreign tables belong to other actors; out of scope
    }

    LiveState::Available(snapshot)
}

/// Walks a ruleset dump, yielding every rule line with its owning
/// table/chain. Tolerates unknown tables, extra whitespace, and nft's
/// trailing `# handle N` annotations.
fn walk_rules(dump: &str) -> Vec<LiveRule> {
    let mut rules = Vec::new();
    let mut current_table = String::new();
    let mut current_chain: Option<String> = None;

    for line in dump.lines() {
        let line = line.trim();
        if line.is_empty() || line == "}" {
            if line == "}" && current_chain.take().is_none() {
                current_table.clear();
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("table ") {
            // `table inet routemgr {`
            let mut parts = rest.split_whitespace();
            let family = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or_default();
            current_table = format!("{family} {name}");
            current_chain = None;
            continue;
        }

        if let Some(rest) = line.strip_prefix("chain ") {
            let name = rest.split_whitespace().next().unwrap_or_default();
            current_chain = Some(name.to_string());
            continue;
        }

        // Chain header properties and comments are not rules
        if line.starts_with("type ") || line.starts_with('#') || line.starts_with('{') {
            continue;
        }

        if let Some(chain) = &current_chain {
            rules.push(parse_rule_line(&current_table, chain, line));
        }
    }

    rules
}

/// Parses a single rule line into a [`LiveRule`], extracting whatever fields
/// are recognizable and keeping the raw text for everything else.
fn parse_rule_line(table: &str, chain: &str, line: &str) -> LiveRule {
    // Split off nft's trailing handle annotation
    let (body, handle) = match line.rsplit_once("# handle ") {
        Some((body, handle)) => (body.trim(), handle.trim().parse::<u64>().ok()),
        None => (line, None),
    };

    let tag = extract_comment(body).and_then(|c| c.parse::<IdentityTag>().ok());

    let mut rule = LiveRule {
        table: table.to_string(),
        chain: chain.to_string(),
        handle,
        tag,
        raw: body.to_string(),
        action: None,
        protocol: None,
        dport: None,
        source: None,
        daddr: None,
        dnat_to: None,
        masquerade: false,
    };

    let tokens: Vec<&str> = body.split_whitespace().collect();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "saddr" if i + 1 < tokens.len() => {
                rule.source = tokens[i + 1].parse().ok();
                i += 1;
            }
            "daddr" if i + 1 < tokens.len() => {
                rule.daddr = tokens[i + 1].parse().ok();
                i += 1;
            }
            "dport" if i + 1 < tokens.len() => {
                if i > 0 {
                    rule.protocol = Some(tokens[i - 1].to_string());
                }
                rule.dport = tokens[i + 1].parse().ok();
                i += 1;
            }
            "l4proto" if i + 1 < tokens.len() => {
                rule.protocol = Some(tokens[i + 1].to_string());
                i += 1;
            }
            "dnat" if i + 2 < tokens.len() && tokens[i + 1] == "to" => {
                rule.dnat_to = parse_host_port(tokens[i + 2]);
                i += 2;
            }
            "masquerade" => rule.masquerade = true,
            "accept" => rule.action = Some(Action::Accept),
            "drop" => rule.action = Some(Action::Drop),
            "reject" => rule.action = Some(Action::Reject),
            // `comment` terminates the match portion
            "comment" => break,
            _ => {}
        }
        i += 1;
    }

    rule
}

/// Pulls the quoted comment string out of a rule line, if any
fn extract_comment(line: &str) -> Option<&str> {
    let idx = line.find("comment \"")?;
    let rest = &line[idx + "comment \"".len()..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// `10.0.0.5:80` -> (addr, port)
fn parse_host_port(token: &str) -> Option<(IpAddr, u16)> {
    let (host, port) = token.rsplit_once(':')?;
    Some((host.parse().ok()?, port.parse().ok()?))
}

/// Parses an `ip route show` dump. Unparseable lines are kept with their raw
/// text and `None` fields rather than dropped.
pub fn parse_routes(dump: &str) -> Vec<LiveRoute> {
    dump.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_route_line)
        .collect()
}

/// Parses a single route line into structured data
fn parse_route_line(line: &str) -> LiveRoute {
    let parts: Vec<&str> = line.split_whitespace().collect();

    let destination = parts.first().and_then(|dest| {
        if dest.eq_ignore_ascii_case("default") {
            Some("0.0.0.0/0".parse().ok()?)
        } else {
            dest.parse().ok()
        }
    });

    let mut route = LiveRoute {
        destination,
        gateway: None,
        interface: None,
        metric: None,
        raw: line.to_string(),
    };

    let mut i = 0;
    while i + 1 < parts.len() {
        match parts[i] {
            "via" => route.gateway = parts[i + 1].parse().ok(),
            "dev" => route.interface = Some(parts[i + 1].to_string()),
            "metric" => route.metric = parts[i + 1].parse().ok(),
            _ => {}
        }
        i += 1;
    }

    route
}

// ═══════════════════════════════════════════════════════════════════════════
// Drift detection
// ═══════════════════════════════════════════════════════════════════════════

/// Differences between desired and live state. Informational, never fatal:
/// the live facility is the source of truth for *current effect* only, never
/// for intent, so drift is reported rather than auto-repaired.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    /// Enabled desired records with no matching live artifact
    pub missing: Vec<IdentityTag>,
    /// Tagged live artifacts whose record no longer exists in the store
    pub orphaned: Vec<IdentityTag>,
    /// Port forwards where only one half of the NAT/forward pair survives
    pub broken_pairs: Vec<IdentityTag>,
    /// Raw text of live artifacts carrying no recognizable tag
    pub unmanaged: Vec<String>,
}

impl DriftReport {
    /// `true` when desired and live state agree (unmanaged artifacts alone
    /// don't count as drift of the managed policy)
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty() && self.broken_pairs.is_empty()
    }
}

/// Compares desired records against a live snapshot.
pub fn diff_desired_live(state: &PolicyState, snapshot: &LiveSnapshot) -> DriftReport {
    let mut report = DriftReport::default();

    for rule in &state.firewall_rules {
        if !rule.enabled {
            continue;
        }
        let tag = rule.tag();
        if !snapshot.filter_rules.iter().any(|r| r.tag == Some(tag)) {
            report.missing.push(tag);
        }
    }

    for forward in &state.port_forwards {
        if !forward.enabled {
            continue;
        }
        let tag = forward.tag();
        let has_nat = snapshot.nat_rules.iter().any(|r| r.tag == Some(tag));
        let has_accept = snapshot.filter_rules.iter().any(|r| r.tag == Some(tag));
        match (has_nat, has_accept) {
            (true, true) => {}
            (false, false) => report.missing.push(tag),
            _ => report.broken_pairs.push(tag),
        }
    }

    for route in &state.static_routes {
        if !route.enabled {
            continue;
        }
        let present = snapshot
            .routes
            .iter()
            .any(|r| r.destination == Some(route.destination));
        if !present {
            report.missing.push(route.tag());
        }
    }

    for rule in snapshot.managed_rules() {
        if let Some(tag) = rule.tag {
            if !state.find_tag(tag) && !report.orphaned.contains(&tag) {
                report.orphaned.push(tag);
            }
        }
    }

    report.unmanaged = snapshot
        .unmanaged_rules()
        .map(|r| format!("{} {}: {}", r.table, r.chain, r.raw))
        .collect();

    report
}

/// Scans a `-a` listing for the live handles of every rule in
/// `<family> <name>`/`chain` carrying `tag` as its comment. Used by the
/// executor to resolve tag-addressed deletes; multiple handles mean
/// duplicate artifacts and all are returned.
pub(crate) fn scan_handles(dump: &str, table: &str, chain: &str, tag: &str) -> Vec<u64> {
    walk_rules(dump)
        .into_iter()
        .filter(|r| {
            r.table == table
                && r.chain == chain
                && r.handle.is_some()
                && extract_comment(&r.raw) == Some(tag)
        })
        .filter_map(|r| r.handle)
        .collect()
}
