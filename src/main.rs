//! routemgr - declarative router policy for a Linux gateway
//!
//! Command-line front end for the policy engine. The UI surface is thin on
//! purpose: records in, plans previewed, plans applied, live state and the
//! deployment log read back out.
//!
//! # Usage
//!
//! ```bash
//! routemgr status                          # Desired vs kernel summary
//! routemgr plan                            # Print what would be installed (dry run)
//! routemgr apply                           # Reconcile the full desired state
//! routemgr add-rule "Allow SSH" tcp --port 22 --source 192.168.1.0/24
//! routemgr add-forward "Web" 8080 10.0.0.5 80
//! routemgr add-route "Lab" 10.1.0.0/24 --via 192.168.1.1 --dev eth0 --persist
//! routemgr remove firewallrule:<id>        # Remove a record and its artifacts
//! routemgr live                            # Parsed live state + drift
//! routemgr log --limit 20                  # Deployment log feed
//! ```

mod audit;
mod config;
mod core;
mod elevation;
mod utils;
mod validators;

use clap::{Parser, Subcommand};
use shadow_rs::shadow;
use std::process::ExitCode;

use crate::audit::DeploymentLog;
use crate::config::FacilityConfig;
use crate::core::engine::PolicyEngine;
use crate::core::executor::Executor;
use crate::core::model::{
    Action, Chain, FirewallRule, ForwardProtocol, IdentityTag, PortForwardRule, PortRange,
    Protocol, StaticRoute,
};
use crate::core::parser::LiveState;
use crate::core::store::PolicyStore;
use crate::core::{plan, system, validate};

shadow!(build);

#[derive(Parser)]
#[command(name = "routemgr")]
#[command(version = build::PKG_VERSION)]
#[command(about = "Declarative router policy for a Linux gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show desired-state summary and kernel forwarding/NAT status
    Status,
    /// Print the rendered ruleset and routes without applying (dry run)
    Plan,
    /// Reconcile the full desired state against the host
    Apply,
    /// Show the parsed live state and drift against the store
    Live,
    /// Read the deployment log, newest first
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Add and apply a firewall rule
    AddRule {
        /// Display name
        name: String,
        /// Protocol: tcp, udp, icmp, or all
        protocol: String,
        /// Destination port or range (e.g. 22 or 8000-9000); required for tcp/udp
        #[arg(long)]
        port: Option<String>,
        /// Source address or CIDR
        #[arg(long)]
        source: Option<String>,
        /// accept, drop, or reject
        #[arg(long, default_value = "accept")]
        action: String,
        /// input or forward
        #[arg(long, default_value = "input")]
        chain: String,
        /// Lower applies first
        #[arg(long, default_value_t = crate::core::model::DEFAULT_PRIORITY)]
        priority: u32,
        /// Store without applying
        #[arg(long)]
        disabled: bool,
    },
    /// Add and apply a port forward (DNAT + forward-accept pair)
    AddForward {
        name: String,
        external_port: u16,
        internal_host: String,
        internal_port: u16,
        /// tcp or udp
        #[arg(long, default_value = "tcp")]
        protocol: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Add and apply a static route
    AddRoute {
        name: String,
        /// Destination network in CIDR notation
        destination: String,
        /// Gateway address (omit for interface-direct routes)
        #[arg(long)]
        via: Option<String>,
        /// Interface name
        #[arg(long, default_value = "")]
        dev: String,
        #[arg(long, default_value_t = crate::core::model::DEFAULT_METRIC)]
        metric: u32,
        /// Also write the reboot-persist artifact
        #[arg(long)]
        persist: bool,
    },
    /// Remove a record and its live artifacts by identity tag
    Remove {
        /// e.g. firewallrule:<id>, portforward:<id>, staticroute:<id>
        tag: String,
    },
    /// Set the kernel forwarding switches (absent flag means off)
    Forwarding {
        #[arg(long)]
        ipv4: bool,
        #[arg(long)]
        ipv6: bool,
    },
    /// Enable or disable source-NAT masquerade on an egress interface
    Masquerade {
        /// Egress interface (required unless --off)
        #[arg(long)]
        interface: Option<String>,
        #[arg(long)]
        off: bool,
    },
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    init_logging();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    if let Some(mut log_path) = utils::get_state_dir() {
        log_path.push("routemgr.log");
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            tracing_subscriber::fmt()
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt::init();
}

fn actor() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

async fn load_engine() -> Result<PolicyEngine, Box<dyn std::error::Error>> {
    let app_config = config::load_config().await;
    let facility = FacilityConfig::resolve(&app_config);

    let data_dir = utils::get_data_dir().ok_or("data directory not available")?;
    let store = PolicyStore::load(data_dir.join("policy.json")).await?;
    let log = DeploymentLog::new()?;

    Ok(PolicyEngine::new(store, Executor::new(facility, log)))
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Status => {
            let engine = load_engine().await?;
            let state = engine.store().state();

            println!("Desired state:");
            println!("  Firewall rules: {}", state.firewall_rules.len());
            for rule in state.ordered_firewall_rules() {
                println!(
                    "    [{}] {} ({} {}) {}",
                    rule.priority,
                    rule.name,
                    rule.protocol,
                    rule.ports.map_or_else(|| "-".to_string(), |p| p.to_string()),
                    rule.state
                );
            }
            println!("  Port forwards: {}", state.port_forwards.len());
            for rule in &state.port_forwards {
                println!(
                    "    {}/{} -> {}:{} ({}) {}",
                    rule.external_port,
                    rule.protocol,
                    rule.internal_host,
                    rule.internal_port,
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.state
                );
            }
            println!("  Static routes: {}", state.static_routes.len());
            for route in &state.static_routes {
                println!(
                    "    {} via {} dev {} metric {} {}",
                    route.destination,
                    route
                        .gateway
                        .map_or_else(|| "-".to_string(), |g| g.to_string()),
                    route.interface,
                    route.metric,
                    route.state
                );
            }

            let forwarding = system::forwarding_status(engine.executor()).await;
            let nat = system::nat_status(engine.executor()).await;
            println!("Kernel:");
            println!("  IPv4 forwarding: {}", on_off(forwarding.ipv4));
            println!("  IPv6 forwarding: {}", on_off(forwarding.ipv6));
            println!("  NAT masquerade:  {}", on_off(nat.enabled));

            let interfaces = utils::list_interfaces();
            if !interfaces.is_empty() {
                println!("  Interfaces:      {}", interfaces.join(", "));
            }
            println!("Store: {}", engine.store().path().display());
        }
        Commands::Plan => {
            let engine = load_engine().await?;
            print!("{}", plan::render_ruleset_preview(engine.store().state()));
            let routes = plan::render_routes_preview(engine.store().state());
            if !routes.is_empty() {
                println!("# routes");
                print!("{routes}");
            }
        }
        Commands::Apply => {
            let mut engine = load_engine().await?;
            let report = engine.reconcile(&actor()).await?;
            println!(
                "✓ Reconciled: {} command(s), {} record(s)",
                report.commands_run,
                report.applied.len()
            );
        }
        Commands::Live => {
            let engine = load_engine().await?;
            match engine.live_state().await {
                LiveState::Unavailable { reason } => {
                    println!("✗ Facility unavailable: {reason}");
                }
                LiveState::Available(snapshot) => {
                    println!("Managed artifacts:");
                    for rule in snapshot.managed_rules() {
                        println!("  {} {}: {}", rule.chain, tag_of(rule), rule.raw);
                    }
                    println!("Unmanaged artifacts:");
                    for rule in snapshot.unmanaged_rules() {
                        println!("  {} {}", rule.chain, rule.raw);
                    }
                    println!("Routes:");
                    for route in &snapshot.routes {
                        println!("  {}", route.raw);
                    }
                    if let Some(drift) = engine.drift().await {
                        if drift.is_clean() {
                            println!("✓ No drift");
                        } else {
                            for tag in &drift.missing {
                                println!("✗ Missing live artifact: {tag}");
                            }
                            for tag in &drift.orphaned {
                                println!("✗ Orphaned live artifact: {tag}");
                            }
                            for tag in &drift.broken_pairs {
                                println!("✗ Broken NAT/forward pair: {tag}");
                            }
                        }
                    }
                }
            }
        }
        Commands::Log { limit, offset } => {
            let log = DeploymentLog::new()?;
            let entries = log.read_page(offset, limit).await?;
            if entries.is_empty() {
                println!("No deployment log entries.");
            }
            for entry in entries {
                println!(
                    "{} {} {:?} {} [{}]",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.tag,
                    entry.action,
                    if entry.success { "✓" } else { "✗" },
                    entry.command
                );
            }
        }
        Commands::AddRule {
            name,
            protocol,
            port,
            source,
            action,
            chain,
            priority,
            disabled,
        } => {
            let mut engine = load_engine().await?;

            let mut rule = FirewallRule::new(name, protocol.parse::<Protocol>()?, actor());
            rule.ports = port.as_deref().map(str::parse::<PortRange>).transpose()?;
            rule.source = source
                .as_deref()
                .map(validate::parse_cidr)
                .transpose()
                .map_err(|e| e.to_string())?;
            rule.action = action.parse::<Action>()?;
            rule.chain = chain.parse::<Chain>()?;
            rule.priority = priority;
            rule.enabled = !disabled;

            let tag = rule.tag();
            engine.add_firewall_rule(rule, &actor()).await?;
            println!("✓ {tag}");
        }
        Commands::AddForward {
            name,
            external_port,
            internal_host,
            internal_port,
            protocol,
            disabled,
        } => {
            let mut engine = load_engine().await?;

            let mut rule = PortForwardRule::new(
                name,
                external_port,
                protocol.parse::<ForwardProtocol>()?,
                internal_host.parse()?,
                internal_port,
                actor(),
            );
            rule.enabled = !disabled;

            let tag = rule.tag();
            engine.add_port_forward(rule, &actor()).await?;
            println!("✓ {tag}");
        }
        Commands::AddRoute {
            name,
            destination,
            via,
            dev,
            metric,
            persist,
        } => {
            let mut engine = load_engine().await?;

            let destination = validate::parse_cidr(&destination).map_err(|e| e.to_string())?;
            let gateway = via
                .as_deref()
                .map(validate::parse_ip)
                .transpose()
                .map_err(|e| e.to_string())?;

            let mut route = StaticRoute::new(name, destination, gateway, dev, actor());
            route.metric = metric;
            route.persistent = persist;

            let tag = route.tag();
            engine.add_static_route(route, &actor()).await?;
            println!("✓ {tag}");
        }
        Commands::Remove { tag } => {
            let mut engine = load_engine().await?;
            let tag: IdentityTag = tag.parse().map_err(|e: String| e)?;
            engine.remove(tag, &actor()).await?;
            println!("✓ {tag} removed");
        }
        Commands::Forwarding { ipv4, ipv6 } => {
            let mut engine = load_engine().await?;
            engine.set_forwarding(ipv4, ipv6, &actor()).await?;
            println!(
                "✓ Forwarding set: IPv4 {}, IPv6 {}",
                on_off(ipv4),
                on_off(ipv6)
            );
        }
        Commands::Masquerade { interface, off } => {
            let mut engine = load_engine().await?;
            if off {
                let interface = interface.unwrap_or_default();
                engine.set_masquerade(false, &interface, &actor()).await?;
                println!("✓ Masquerade disabled");
            } else {
                let interface = interface.ok_or("--interface is required to enable masquerade")?;
                engine.set_masquerade(true, &interface, &actor()).await?;
                println!("✓ Masquerade enabled on {interface}");
            }
        }
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn tag_of(rule: &crate::core::parser::LiveRule) -> String {
    rule.tag.map_or_else(|| "-".to_string(), |t| t.to_string())
}
