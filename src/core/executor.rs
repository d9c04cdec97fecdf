//! Plan execution against the host facilities
//!
//! The executor is the only code in the crate that knows the facility
//! command grammar. It renders facility-neutral [`CommandOp`]s into
//! `nft`/`ip`/`sysctl` argv, runs them elevated with a bounded timeout, and
//! writes exactly one deployment-log entry per command attempted.
//!
//! Apply semantics:
//!
//! - Availability is probed *before* the policy lock is taken, so "facility
//!   down" short-circuits cleanly and is never conflated with "rule
//!   rejected".
//! - All mutating operations for all record types serialize through one
//!   process-wide lock: the facility's evaluation order is a total order over
//!   all rules, so interleaved command sequences from concurrent sessions
//!   would corrupt intent even though each single command is atomic.
//! - On the first failure the executor stops, rolls back only the artifacts
//!   it applied in this invocation (inverse ops, reverse order), and returns
//!   the failing tag with captured stderr. It never retries: duplicate
//!   accept rules are harmless but a duplicated NAT rule double-translates
//!   traffic, so retry is a user decision made after reading the log.
//! - Reads ([`Executor::live_state`]) do not take the lock and may observe a
//!   ruleset mid-transition; that is a valid stale snapshot, not corruption.

use crate::audit::{DeploymentLog, DeploymentLogEntry, LogAction};
use crate::config::FacilityConfig;
use crate::core::error::{Error, Result};
use crate::core::model::IdentityTag;
use crate::core::parser::{self, LiveState};
use crate::core::plan::{CommandOp, Plan, PlanAction, PlannedCommand};
use crate::elevation;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// The one lock guarding the host's packet-filter/routing facility. Held for
/// the duration of a single plan execution, never across user think-time.
static POLICY_LOCK: Mutex<()> = Mutex::const_new(());

/// Outcome of a successful plan execution
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Tags whose artifacts were applied/removed, in execution order
    /// (deduplicated)
    pub applied: Vec<IdentityTag>,
    pub commands_run: usize,
}

/// Captured output of one facility invocation
#[derive(Debug, Clone)]
struct CommandOutput {
    command: String,
    output: String,
}

/// Why one operation failed, before it is attributed to a tag
#[derive(Debug)]
enum OpFailure {
    Failed {
        command: String,
        output: String,
        exit_code: Option<i32>,
    },
    Timeout {
        command: String,
    },
}

impl OpFailure {
    fn command(&self) -> &str {
        match self {
            OpFailure::Failed { command, .. } | OpFailure::Timeout { command } => command,
        }
    }

    fn output(&self) -> String {
        match self {
            OpFailure::Failed { output, .. } => output.clone(),
            OpFailure::Timeout { .. } => "timed out".to_string(),
        }
    }
}

/// Which resolved facility binary an invocation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FacilityProgram {
    Nft,
    Ip,
    Sysctl,
}

/// A rendered operation, ready to run
#[derive(Debug, Clone, PartialEq)]
enum Invocation {
    Run {
        program: FacilityProgram,
        args: Vec<String>,
    },
    /// Delete every rule in the chain carrying the tag as its comment;
    /// handles are resolved from a live listing at execution time
    TaggedDelete {
        family: &'static str,
        table: &'static str,
        chain: &'static str,
    },
    /// Route deletes tolerate an already-gone route (idempotent removal)
    RouteDelete {
        args: Vec<String>,
    },
    WritePersist {
        destination: IpNetwork,
        gateway: Option<IpAddr>,
        interface: String,
        metric: u32,
    },
    RemovePersist,
}

/// Renders a facility-neutral op into a concrete invocation. Pure, so the
/// grammar is unit-testable without touching a host.
fn render_invocation(tag: IdentityTag, op: &CommandOp) -> Invocation {
    match op {
        CommandOp::AddFilterRule { chain, spec } => {
            let mut args: Vec<String> = ["add", "rule", "inet", "routemgr", chain.as_str()]
                .iter()
                .map(ToString::to_string)
                .collect();
            args.extend(spec.tokens());
            args.push("comment".to_string());
            args.push(tag.to_string());
            Invocation::Run {
                program: FacilityProgram::Nft,
                args,
            }
        }
        CommandOp::DeleteFilterRule { chain } => Invocation::TaggedDelete {
            family: "inet",
            table: "routemgr",
            chain: chain.as_str(),
        },
        CommandOp::AddDnatRule {
            protocol,
            external_port,
            internal_host,
            internal_port,
        } => Invocation::Run {
            program: FacilityProgram::Nft,
            args: vec![
                "add".into(),
                "rule".into(),
                "ip".into(),
                "routemgr-nat".into(),
                "prerouting".into(),
                protocol.as_str().into(),
                "dport".into(),
                external_port.to_string(),
                "dnat".into(),
                "to".into(),
                format!("{internal_host}:{internal_port}"),
                "comment".into(),
                tag.to_string(),
            ],
        },
        CommandOp::DeleteDnatRule => Invocation::TaggedDelete {
            family: "ip",
            table: "routemgr-nat",
            chain: "prerouting",
        },
        CommandOp::AddForwardAccept {
            protocol,
            internal_host,
            internal_port,
        } => Invocation::Run {
            program: FacilityProgram::Nft,
            args: vec![
                "add".into(),
                "rule".into(),
                "inet".into(),
                "routemgr".into(),
                "forward".into(),
                "ip".into(),
                "daddr".into(),
                internal_host.to_string(),
                protocol.as_str().into(),
                "dport".into(),
                internal_port.to_string(),
                "accept".into(),
                "comment".into(),
                tag.to_string(),
            ],
        },
        CommandOp::DeleteForwardAccept => Invocation::TaggedDelete {
            family: "inet",
            table: "routemgr",
            chain: "forward",
        },
        CommandOp::AddRoute {
            destination,
            gateway,
            interface,
            metric,
        } => {
            let mut args = vec!["route".to_string(), "add".to_string(), destination.to_string()];
            if let Some(gateway) = gateway {
                args.push("via".to_string());
                args.push(gateway.to_string());
            }
            if !interface.is_empty() {
                args.push("dev".to_string());
                args.push(interface.clone());
            }
            args.push("metric".to_string());
            args.push(metric.to_string());
            Invocation::Run {
                program: FacilityProgram::Ip,
                args,
            }
        }
        CommandOp::DeleteRoute {
            destination,
            gateway,
            interface,
        } => {
            let mut args = vec!["route".to_string(), "del".to_string(), destination.to_string()];
            if let Some(gateway) = gateway {
                args.push("via".to_string());
                args.push(gateway.to_string());
            }
            if !interface.is_empty() {
                args.push("dev".to_string());
                args.push(interface.clone());
            }
            Invocation::RouteDelete { args }
        }
        CommandOp::WriteRoutePersist {
            destination,
            gateway,
            interface,
            metric,
        } => Invocation::WritePersist {
            destination: *destination,
            gateway: *gateway,
            interface: interface.clone(),
            metric: *metric,
        },
        CommandOp::RemoveRoutePersist => Invocation::RemovePersist,
        CommandOp::AddMasquerade { interface } => Invocation::Run {
            program: FacilityProgram::Nft,
            args: vec![
                "add".into(),
                "rule".into(),
                "ip".into(),
                "routemgr-nat".into(),
                "postrouting".into(),
                "oifname".into(),
                interface.clone(),
                "masquerade".into(),
                "comment".into(),
                tag.to_string(),
            ],
        },
        CommandOp::DeleteMasquerade => Invocation::TaggedDelete {
            family: "ip",
            table: "routemgr-nat",
            chain: "postrouting",
        },
        CommandOp::SetSysctl { key, value } => Invocation::Run {
            program: FacilityProgram::Sysctl,
            args: vec!["-w".to_string(), format!("{key}={value}")],
        },
    }
}

/// File name for a route's reboot-persist artifact. Keyed by the identity
/// tag; colons are avoided in file names.
fn persist_file_name(tag: IdentityTag) -> Option<String> {
    match tag {
        IdentityTag::StaticRoute(id) => Some(format!("staticroute-{id}.route")),
        _ => None,
    }
}

/// Runs command plans against the host facilities.
///
/// Binary paths and the command timeout come from the [`FacilityConfig`]
/// resolved once at startup; nothing is re-discovered per call.
#[derive(Debug)]
pub struct Executor {
    facility: FacilityConfig,
    log: DeploymentLog,
}

impl Executor {
    pub fn new(facility: FacilityConfig, log: DeploymentLog) -> Self {
        Self { facility, log }
    }

    /// Executes a plan under the policy lock.
    ///
    /// Returns the applied tags on success. On the first command failure the
    /// remaining commands are skipped, this invocation's own artifacts are
    /// rolled back, and the failing tag is returned inside
    /// [`Error::Apply`]/[`Error::Timeout`]. Every command attempted -
    /// including rollbacks - appends one deployment-log entry.
    pub async fn apply(&self, plan: &Plan, actor: &str) -> Result<ApplyReport> {
        if plan.is_empty() {
            return Ok(ApplyReport::default());
        }

        // Unavailability short-circuits before the lock
        self.probe(plan).await?;

        let _guard = POLICY_LOCK.lock().await;
        info!("policy lock acquired, executing {} command(s)", plan.len());

        self.ensure_baseline(plan).await?;

        let mut report = ApplyReport::default();
        let mut rollback_stack: Vec<(IdentityTag, CommandOp)> = Vec::new();

        for command in &plan.commands {
            match self.run_op(command.tag, &command.op).await {
                Ok(output) => {
                    self.log_attempt(actor, command, &output.command, &output.output, true)
                        .await;
                    report.commands_run += 1;
                    if !report.applied.contains(&command.tag) {
                        report.applied.push(command.tag);
                    }
                    if let Some(inverse) = command.op.inverse() {
                        rollback_stack.push((command.tag, inverse));
                    }
                }
                Err(failure) => {
                    warn!(
                        "command for {} failed, rolling back {} applied artifact(s)",
                        command.tag,
                        rollback_stack.len()
                    );
                    self.log_attempt(
                        actor,
                        command,
                        failure.command(),
                        &failure.output(),
                        false,
                    )
                    .await;
                    self.rollback(actor, rollback_stack).await;
                    return Err(self.failure_to_error(command.tag, failure));
                }
            }
        }

        info!("plan executed: {} command(s) succeeded", report.commands_run);
        Ok(report)
    }

    /// Reads the facility's current state. Takes no lock: a dump taken
    /// between two commands of a concurrent plan is a valid-but-stale
    /// snapshot.
    pub async fn live_state(&self) -> LiveState {
        let ruleset = match self
            .run_facility(FacilityProgram::Nft, &listing_args("ruleset"))
            .await
        {
            Ok(output) => output.output,
            Err(failure) => {
                return LiveState::Unavailable {
                    reason: failure.output(),
                }
            }
        };

        let routes = match self
            .run_facility(
                FacilityProgram::Ip,
                &["route".to_string(), "show".to_string()],
            )
            .await
        {
            Ok(output) => output.output,
            Err(failure) => {
                warn!("routing table dump failed: {}", failure.output());
                String::new()
            }
        };

        parser::parse_live_state(&ruleset, &routes)
    }

    /// Reads one kernel parameter value. Takes no lock.
    pub async fn read_sysctl(&self, key: &str) -> Result<String> {
        match self
            .run_facility(
                FacilityProgram::Sysctl,
                &["-n".to_string(), key.to_string()],
            )
            .await
        {
            Ok(output) => Ok(output.output.trim().to_string()),
            Err(failure) => Err(Error::Unavailable(failure.output())),
        }
    }

    /// Reads back the persisted route artifacts from the well-known
    /// directory. Survives process restarts by construction: this is a plain
    /// directory scan, no in-memory state.
    pub async fn read_persisted_routes(&self) -> Result<Vec<(IdentityTag, String)>> {
        let dir = &self.facility.route_persist_dir;
        let mut artifacts = Vec::new();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("route") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            let mut lines = content.lines();
            let tag = lines
                .next()
                .and_then(|first| first.strip_prefix("# "))
                .and_then(|t| t.parse::<IdentityTag>().ok());
            let route_line = lines.next().unwrap_or_default().to_string();
            if let Some(tag) = tag {
                artifacts.push((tag, route_line));
            } else {
                warn!("persist artifact without tag header: {}", path.display());
            }
        }

        Ok(artifacts)
    }

    // ─── Internals ───

    /// Probes the binaries a plan needs, before taking the lock.
    async fn probe(&self, plan: &Plan) -> Result<()> {
        let mut checks: Vec<(FacilityProgram, Vec<String>)> = Vec::new();
        if plan_needs(plan, FacilityProgram::Nft) {
            checks.push((FacilityProgram::Nft, vec!["--version".to_string()]));
        }
        if plan_needs(plan, FacilityProgram::Ip) {
            checks.push((FacilityProgram::Ip, vec!["-V".to_string()]));
        }
        if plan_needs(plan, FacilityProgram::Sysctl) {
            checks.push((FacilityProgram::Sysctl, vec!["--version".to_string()]));
        }

        for (program, args) in checks {
            let path = self.program_path(program);
            let mut cmd = tokio::process::Command::new(path);
            cmd.args(&args)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true);

            let status = tokio::time::timeout(self.facility.command_timeout, cmd.status()).await;
            match status {
                Ok(Ok(status)) if status.success() => {}
                Ok(Ok(status)) => {
                    return Err(Error::Unavailable(format!(
                        "{} probe exited with {status}",
                        path.display()
                    )))
                }
                Ok(Err(e)) => {
                    return Err(Error::Unavailable(format!(
                        "{} not runnable: {e}",
                        path.display()
                    )))
                }
                Err(_) => {
                    return Err(Error::Unavailable(format!(
                        "{} probe timed out",
                        path.display()
                    )))
                }
            }
        }

        Ok(())
    }

    /// Ensures the managed tables/chains exist before tagged commands run.
    /// These are idempotent facility no-ops when everything already exists;
    /// they carry no tag and are not deployment-logged.
    async fn ensure_baseline(&self, plan: &Plan) -> Result<()> {
        let needs_filter = plan.commands.iter().any(|c| {
            matches!(
                c.op,
                CommandOp::AddFilterRule { .. } | CommandOp::AddForwardAccept { .. }
            )
        });
        let needs_nat = plan.commands.iter().any(|c| {
            matches!(
                c.op,
                CommandOp::AddDnatRule { .. } | CommandOp::AddMasquerade { .. }
            )
        });

        let mut baseline: Vec<Vec<&str>> = Vec::new();
        if needs_filter {
            baseline.push(vec!["add", "table", "inet", "routemgr"]);
            baseline.push(chain_spec("inet", "routemgr", "input", "filter", "input", "filter"));
            baseline.push(chain_spec(
                "inet", "routemgr", "forward", "filter", "forward", "filter",
            ));
        }
        if needs_nat {
            baseline.push(vec!["add", "table", "ip", "routemgr-nat"]);
            baseline.push(chain_spec(
                "ip",
                "routemgr-nat",
                "prerouting",
                "nat",
                "prerouting",
                "dstnat",
            ));
            baseline.push(chain_spec(
                "ip",
                "routemgr-nat",
                "postrouting",
                "nat",
                "postrouting",
                "srcnat",
            ));
        }

        for args in baseline {
            let args: Vec<String> = args.iter().map(ToString::to_string).collect();
            if let Err(failure) = self.run_facility(FacilityProgram::Nft, &args).await {
                return Err(Error::Apply {
                    tag: "baseline".to_string(),
                    command: failure.command().to_string(),
                    stderr: failure.output(),
                    exit_code: None,
                });
            }
        }

        Ok(())
    }

    /// Runs one rendered operation.
    async fn run_op(
        &self,
        tag: IdentityTag,
        op: &CommandOp,
    ) -> std::result::Result<CommandOutput, OpFailure> {
        match render_invocation(tag, op) {
            Invocation::Run { program, args } => self.run_facility(program, &args).await,
            Invocation::TaggedDelete {
                family,
                table,
                chain,
            } => self.delete_tagged(tag, family, table, chain).await,
            Invocation::RouteDelete { args } => {
                match self.run_facility(FacilityProgram::Ip, &args).await {
                    Ok(output) => Ok(output),
                    // Deleting an already-removed route is a no-op, not an error
                    Err(OpFailure::Failed { command, output, .. })
                        if output.contains("No such process")
                            || output.contains("No such file or directory") =>
                    {
                        Ok(CommandOutput {
                            command,
                            output: "route already absent (no-op)".to_string(),
                        })
                    }
                    Err(failure) => Err(failure),
                }
            }
            Invocation::WritePersist {
                destination,
                gateway,
                interface,
                metric,
            } => {
                self.write_persist_artifact(tag, destination, gateway, &interface, metric)
                    .await
            }
            Invocation::RemovePersist => self.remove_persist_artifact(tag).await,
        }
    }

    /// Resolves a tag to live handles and deletes each one. A tag with no
    /// live artifact (or no managed table at all) is a successful no-op, so
    /// removal is idempotent.
    async fn delete_tagged(
        &self,
        tag: IdentityTag,
        family: &str,
        table: &str,
        chain: &str,
    ) -> std::result::Result<CommandOutput, OpFailure> {
        let list_args: Vec<String> = ["-a", "list", "table", family, table]
            .iter()
            .map(ToString::to_string)
            .collect();

        let listing = match self.run_facility(FacilityProgram::Nft, &list_args).await {
            Ok(output) => output,
            Err(OpFailure::Failed { command, output, .. })
                if output.contains("No such file or directory")
                    || output.contains("does not exist") =>
            {
                // Table absent: nothing to delete
                return Ok(CommandOutput {
                    command,
                    output: "managed table absent (no-op)".to_string(),
                });
            }
            Err(failure) => return Err(failure),
        };

        let handles = parser::scan_handles(
            &listing.output,
            &format!("{family} {table}"),
            chain,
            &tag.to_string(),
        );

        if handles.is_empty() {
            return Ok(CommandOutput {
                command: listing.command,
                output: format!("no live artifact for {tag} (no-op)"),
            });
        }

        let mut commands = Vec::new();
        let mut outputs = Vec::new();
        // Delete in descending handle order; deleting lower handles first
        // does not renumber higher ones, but the symmetry is free
        let mut handles = handles;
        handles.sort_unstable_by(|a, b| b.cmp(a));
        for handle in handles {
            let args: Vec<String> = [
                "delete", "rule", family, table, chain, "handle",
            ]
            .iter()
            .map(ToString::to_string)
            .chain(std::iter::once(handle.to_string()))
            .collect();
            let output = self.run_facility(FacilityProgram::Nft, &args).await?;
            commands.push(output.command);
            outputs.push(output.output);
        }

        Ok(CommandOutput {
            command: commands.join("; "),
            output: outputs.join("\n"),
        })
    }

    async fn write_persist_artifact(
        &self,
        tag: IdentityTag,
        destination: IpNetwork,
        gateway: Option<IpAddr>,
        interface: &str,
        metric: u32,
    ) -> std::result::Result<CommandOutput, OpFailure> {
        use std::io::Write;

        let Some(file_name) = persist_file_name(tag) else {
            return Err(OpFailure::Failed {
                command: format!("write persist artifact for {tag}"),
                output: "only routes have persist artifacts".to_string(),
                exit_code: None,
            });
        };

        let dir = self.facility.route_persist_dir.clone();
        let path = dir.join(file_name);
        let command = format!("write {}", path.display());

        let mut content = format!("# {tag}\n{destination}");
        if let Some(gateway) = gateway {
            content.push_str(&format!(" via {gateway}"));
        }
        if !interface.is_empty() {
            content.push_str(&format!(" dev {interface}"));
        }
        content.push_str(&format!(" metric {metric}\n"));

        let result = (|| -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            // Atomic write: temp file in the same directory, then rename
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(CommandOutput {
                command,
                output: String::new(),
            }),
            Err(e) => Err(OpFailure::Failed {
                command,
                output: e.to_string(),
                exit_code: None,
            }),
        }
    }

    async fn remove_persist_artifact(
        &self,
        tag: IdentityTag,
    ) -> std::result::Result<CommandOutput, OpFailure> {
        let Some(file_name) = persist_file_name(tag) else {
            return Err(OpFailure::Failed {
                command: format!("remove persist artifact for {tag}"),
                output: "only routes have persist artifacts".to_string(),
                exit_code: None,
            });
        };

        let path = self.facility.route_persist_dir.join(file_name);
        let command = format!("remove {}", path.display());

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(CommandOutput {
                command,
                output: String::new(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CommandOutput {
                command,
                output: "artifact already absent (no-op)".to_string(),
            }),
            Err(e) => Err(OpFailure::Failed {
                command,
                output: e.to_string(),
                exit_code: None,
            }),
        }
    }

    /// Spawns one elevated facility command with the configured timeout.
    async fn run_facility(
        &self,
        program: FacilityProgram,
        args: &[String],
    ) -> std::result::Result<CommandOutput, OpFailure> {
        let path = self.program_path(program);
        let command_text = format!("{} {}", path.display(), args.join(" "));

        let mut cmd = match elevation::elevated_command(path, args) {
            Ok(cmd) => cmd,
            Err(e) => {
                return Err(OpFailure::Failed {
                    command: command_text,
                    output: e.to_string(),
                    exit_code: None,
                })
            }
        };
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.facility.command_timeout, cmd.output()).await
        {
            Err(_) => {
                return Err(OpFailure::Timeout {
                    command: command_text,
                })
            }
            Ok(Err(e)) => {
                return Err(OpFailure::Failed {
                    command: command_text,
                    output: e.to_string(),
                    exit_code: None,
                })
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            Ok(CommandOutput {
                command: command_text,
                output: if stderr.is_empty() {
                    stdout.to_string()
                } else {
                    format!("{stdout}{stderr}")
                },
            })
        } else {
            Err(OpFailure::Failed {
                command: command_text,
                output: stderr.to_string(),
                exit_code: output.status.code(),
            })
        }
    }

    /// Rolls back this invocation's applied artifacts, newest first. Rollback
    /// failures are logged and reported but cannot abort - there is nothing
    /// further to fall back to.
    async fn rollback(&self, actor: &str, stack: Vec<(IdentityTag, CommandOp)>) {
        for (tag, inverse) in stack.into_iter().rev() {
            match self.run_op(tag, &inverse).await {
                Ok(output) => {
                    self.log_rollback(actor, tag, &output.command, &output.output, true)
                        .await;
                }
                Err(failure) => {
                    error!("rollback of {tag} failed: {}", failure.output());
                    self.log_rollback(actor, tag, failure.command(), &failure.output(), false)
                        .await;
                }
            }
        }
    }

    async fn log_attempt(
        &self,
        actor: &str,
        command: &PlannedCommand,
        command_text: &str,
        output: &str,
        success: bool,
    ) {
        let action = match command.action {
            PlanAction::Apply => LogAction::Apply,
            PlanAction::Remove => LogAction::Remove,
        };
        let entry = DeploymentLogEntry::new(
            actor,
            command.tag.to_string(),
            action,
            command_text,
            output,
            success,
        );
        if let Err(e) = self.log.append(&entry).await {
            warn!("failed to write deployment log: {e}");
        }
    }

    async fn log_rollback(
        &self,
        actor: &str,
        tag: IdentityTag,
        command_text: &str,
        output: &str,
        success: bool,
    ) {
        let entry = DeploymentLogEntry::new(
            actor,
            tag.to_string(),
            LogAction::Rollback,
            command_text,
            output,
            success,
        );
        if let Err(e) = self.log.append(&entry).await {
            warn!("failed to write deployment log: {e}");
        }
    }

    fn failure_to_error(&self, tag: IdentityTag, failure: OpFailure) -> Error {
        match failure {
            OpFailure::Failed {
                command,
                output,
                exit_code,
            } => Error::Apply {
                tag: tag.to_string(),
                command,
                stderr: output,
                exit_code,
            },
            OpFailure::Timeout { command } => Error::Timeout {
                tag: tag.to_string(),
                command,
                timeout: self.facility.command_timeout,
            },
        }
    }

    fn program_path(&self, program: FacilityProgram) -> &Path {
        match program {
            FacilityProgram::Nft => &self.facility.nft_program,
            FacilityProgram::Ip => &self.facility.ip_program,
            FacilityProgram::Sysctl => &self.facility.sysctl_program,
        }
    }
}

fn listing_args(scope: &str) -> Vec<String> {
    vec!["-a".to_string(), "list".to_string(), scope.to_string()]
}

/// Chain creation in the facility's brace syntax, tokenized for argv use
fn chain_spec<'a>(
    family: &'a str,
    table: &'a str,
    chain: &'a str,
    chain_type: &'a str,
    hook: &'a str,
    priority: &'a str,
) -> Vec<&'a str> {
    vec![
        "add", "chain", family, table, chain, "{", "type", chain_type, "hook", hook, "priority",
        priority, ";", "policy", "accept", ";", "}",
    ]
}

/// Which facility binary a plan touches, for targeted availability probing
fn plan_needs(plan: &Plan, program: FacilityProgram) -> bool {
    plan.commands.iter().any(|c| match program {
        FacilityProgram::Nft => matches!(
            c.op,
            CommandOp::AddFilterRule { .. }
                | CommandOp::DeleteFilterRule { .. }
                | CommandOp::AddDnatRule { .. }
                | CommandOp::DeleteDnatRule
                | CommandOp::AddForwardAccept { .. }
                | CommandOp::DeleteForwardAccept
                | CommandOp::AddMasquerade { .. }
                | CommandOp::DeleteMasquerade
        ),
        FacilityProgram::Ip => matches!(
            c.op,
            CommandOp::AddRoute { .. } | CommandOp::DeleteRoute { .. }
        ),
        FacilityProgram::Sysctl => matches!(c.op, CommandOp::SetSysctl { .. }),
    })
}
