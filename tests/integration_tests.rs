//! Integration tests for routemgr
//!
//! These tests drive the engine and executor end-to-end against stateful
//! mock `nft`/`ip`/`sysctl` scripts (see `mock_nft.sh` and friends), so
//! apply, rollback, removal, read-back, and drift behavior are all exercised
//! without privileges or a real kernel.
//!
//! Each test gets its own facility: per-test wrapper scripts pin the mock
//! state files, so tests are isolated and can run in parallel.

use routemgr::audit::{DeploymentLog, LogAction};
use routemgr::config::FacilityConfig;
use routemgr::core::engine::PolicyEngine;
use routemgr::core::executor::Executor;
use routemgr::core::model::{
    FirewallRule, ForwardProtocol, IdentityTag, PortForwardRule, PortRange, Protocol, RecordState,
    StaticRoute,
};
use routemgr::core::parser::LiveState;
use routemgr::core::plan;
use routemgr::core::store::PolicyStore;
use routemgr::core::system;
use routemgr::core::validate::RejectReason;
use routemgr::Error;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Bypass run0/sudo/pkexec so facility calls run the mocks directly
fn init_test_env() {
    INIT.call_once(|| {
        // SAFETY: set once before any test spawns a facility command, always
        // to the same value
        unsafe {
            std::env::set_var("ROUTEMGR_TEST_NO_ELEVATION", "1");
        }
    });
}

/// One isolated mock facility: wrapper scripts + state files in a temp dir
struct MockFacility {
    dir: PathBuf,
}

impl MockFacility {
    fn new(test: &str) -> Self {
        init_test_env();
        let dir = std::env::temp_dir().join(format!(
            "routemgr-it-{test}-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let facility = Self { dir };
        facility.write_nft_wrapper(&[]);
        facility.write_wrapper(
            "ip",
            "mock_ip.sh",
            &[("MOCK_IP_STATE", "ip.state"), ("MOCK_IP_LOG", "ip.log")],
            &[],
        );
        facility.write_wrapper(
            "sysctl",
            "mock_sysctl.sh",
            &[
                ("MOCK_SYSCTL_STATE", "sysctl.state"),
                ("MOCK_SYSCTL_LOG", "sysctl.log"),
            ],
            &[],
        );
        facility
    }

    /// (Re)writes the nft wrapper; `extra` holds literal KEY=VALUE exports
    /// such as failure injection, so a test can arm them mid-flight.
    fn write_nft_wrapper(&self, extra: &[(&str, &str)]) {
        self.write_wrapper(
            "nft",
            "mock_nft.sh",
            &[("MOCK_NFT_STATE", "nft.state"), ("MOCK_NFT_LOG", "nft.log")],
            extra,
        );
    }

    fn write_wrapper(
        &self,
        name: &str,
        mock: &str,
        state_vars: &[(&str, &str)],
        extra: &[(&str, &str)],
    ) {
        use std::os::unix::fs::PermissionsExt;

        let mock_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join(mock);

        let mut script = String::from("#!/usr/bin/env bash\n");
        for (var, file) in state_vars {
            script.push_str(&format!(
                "export {var}='{}'\n",
                self.dir.join(file).display()
            ));
        }
        for (var, value) in extra {
            script.push_str(&format!("export {var}='{value}'\n"));
        }
        script.push_str(&format!("exec '{}' \"$@\"\n", mock_path.display()));

        let path = self.dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn facility_config(&self) -> FacilityConfig {
        FacilityConfig {
            nft_program: self.dir.join("nft"),
            ip_program: self.dir.join("ip"),
            sysctl_program: self.dir.join("sysctl"),
            route_persist_dir: self.dir.join("routes.d"),
            command_timeout: Duration::from_secs(10),
        }
    }

    fn executor(&self) -> Executor {
        Executor::new(self.facility_config(), self.log())
    }

    fn log(&self) -> DeploymentLog {
        DeploymentLog::at_path(self.dir.join("deploy.log"))
    }

    async fn engine(&self) -> PolicyEngine {
        let store = PolicyStore::load(self.dir.join("policy.json")).await.unwrap();
        PolicyEngine::new(store, self.executor())
    }

    fn nft_log(&self) -> String {
        std::fs::read_to_string(self.dir.join("nft.log")).unwrap_or_default()
    }
}

fn ssh_rule() -> FirewallRule {
    let mut rule = FirewallRule::new("Allow SSH", Protocol::Tcp, "admin");
    rule.ports = Some(PortRange::single(22));
    rule.priority = 10;
    rule
}

fn web_forward() -> PortForwardRule {
    PortForwardRule::new(
        "Web",
        8080,
        ForwardProtocol::Tcp,
        "10.0.0.5".parse().unwrap(),
        80,
        "admin",
    )
}

fn lab_route(persist: bool) -> StaticRoute {
    let mut route = StaticRoute::new(
        "Lab",
        "10.1.0.0/24".parse().unwrap(),
        Some("192.168.1.1".parse().unwrap()),
        "eth0",
        "admin",
    );
    route.persistent = persist;
    route
}

/// Scenario A: a tcp/22 accept rule applied to the input chain must come
/// back from the live state with its tag, chain, and action intact.
#[tokio::test]
async fn test_firewall_rule_apply_and_read_back() {
    let mock = MockFacility::new("scenario-a");
    let mut engine = mock.engine().await;

    let rule = ssh_rule();
    let tag = rule.tag();
    engine.add_firewall_rule(rule, "admin").await.unwrap();

    assert_eq!(
        engine.store().state().firewall_rules[0].state,
        RecordState::Active
    );

    let LiveState::Available(snapshot) = engine.live_state().await else {
        panic!("live state should be available after apply");
    };
    let artifacts: Vec<_> = snapshot
        .filter_rules
        .iter()
        .filter(|r| r.tag == Some(tag))
        .collect();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].chain, "input");
    assert_eq!(artifacts[0].dport, Some(PortRange::single(22)));
    assert_eq!(
        artifacts[0].action,
        Some(routemgr::core::model::Action::Accept)
    );

    let drift = engine.drift().await.unwrap();
    assert!(drift.is_clean(), "unexpected drift: {drift:?}");
}

/// Scenario B: a port forward lands as a NAT + forward-accept pair sharing
/// one tag, and a second enabled rule on the same (port, protocol) is a
/// conflict caught before any facility call.
#[tokio::test]
async fn test_port_forward_pair_and_conflict() {
    let mock = MockFacility::new("scenario-b");
    let mut engine = mock.engine().await;

    let forward = web_forward();
    let tag = forward.tag();
    engine.add_port_forward(forward, "admin").await.unwrap();

    let LiveState::Available(snapshot) = engine.live_state().await else {
        panic!("live state should be available");
    };
    let nat: Vec<_> = snapshot
        .nat_rules
        .iter()
        .filter(|r| r.tag == Some(tag))
        .collect();
    let accept: Vec<_> = snapshot
        .filter_rules
        .iter()
        .filter(|r| r.tag == Some(tag))
        .collect();
    assert_eq!(nat.len(), 1);
    assert_eq!(accept.len(), 1);
    assert_eq!(nat[0].dnat_to, Some(("10.0.0.5".parse().unwrap(), 80)));
    assert_eq!(accept[0].chain, "forward");

    // Conflicting second rule: rejected before any apply
    let nft_log_before = mock.nft_log();
    let duplicate = PortForwardRule::new(
        "Dup",
        8080,
        ForwardProtocol::Tcp,
        "10.0.0.9".parse().unwrap(),
        90,
        "admin",
    );
    let err = engine.add_port_forward(duplicate, "admin").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Conflict(RejectReason::PortConflict {
            external_port: 8080,
            protocol: ForwardProtocol::Tcp,
        })
    ));
    assert_eq!(mock.nft_log(), nft_log_before, "conflict must not touch the facility");

    // A disabled duplicate is accepted (and applies nothing)
    let mut disabled = PortForwardRule::new(
        "Spare",
        8080,
        ForwardProtocol::Tcp,
        "10.0.0.9".parse().unwrap(),
        90,
        "admin",
    );
    disabled.enabled = false;
    engine.add_port_forward(disabled, "admin").await.unwrap();
}

/// Pairing invariant under failure: when the forward-accept half fails, the
/// already-applied NAT half is rolled back so neither artifact survives.
#[tokio::test]
async fn test_port_forward_pair_rolls_back_together() {
    let mock = MockFacility::new("pair-rollback");
    // The forward-accept command is the only one matching `daddr`
    mock.write_nft_wrapper(&[("MOCK_NFT_FAIL_SUBSTR", "daddr")]);
    let mut engine = mock.engine().await;

    let forward = web_forward();
    let tag = forward.tag();
    let err = engine.add_port_forward(forward, "admin").await.unwrap_err();
    assert!(matches!(err, Error::Apply { .. }));

    assert_eq!(
        engine.store().state().port_forwards[0].state,
        RecordState::Failed
    );

    // Neither half of the pair is live
    mock.write_nft_wrapper(&[]);
    let LiveState::Available(snapshot) = engine.live_state().await else {
        panic!("live state should be available");
    };
    assert!(!snapshot
        .nat_rules
        .iter()
        .chain(snapshot.filter_rules.iter())
        .any(|r| r.tag == Some(tag)));
}

/// Scenario C: of a three-command plan whose second command fails, the first
/// is rolled back, pre-existing state is untouched, the error names the
/// failing tag, and the deployment log holds exactly three entries.
#[tokio::test]
async fn test_mid_plan_failure_rolls_back_own_work_only() {
    let mock = MockFacility::new("scenario-c");

    // Pre-existing artifact from an earlier apply; must survive the rollback
    let pre_existing = ssh_rule();
    let executor = mock.executor();
    executor
        .apply(&plan::apply_firewall_rule(&pre_existing), "admin")
        .await
        .unwrap();
    std::fs::remove_file(mock.dir.join("deploy.log")).unwrap();

    let mut first = FirewallRule::new("first", Protocol::Icmp, "admin");
    first.priority = 1;
    let second = FirewallRule::new("second", Protocol::Icmp, "admin");
    let third = FirewallRule::new("third", Protocol::Icmp, "admin");

    // Fail exactly the second rule's command (argv carries its tag)
    let fail_tag = second.tag().to_string();
    mock.write_nft_wrapper(&[("MOCK_NFT_FAIL_SUBSTR", fail_tag.as_str())]);

    let mut combined = plan::apply_firewall_rule(&first);
    combined
        .commands
        .extend(plan::apply_firewall_rule(&second).commands);
    combined
        .commands
        .extend(plan::apply_firewall_rule(&third).commands);

    let executor = mock.executor();
    match executor.apply(&combined, "admin").await.unwrap_err() {
        Error::Apply { tag, stderr, .. } => {
            assert_eq!(tag, second.tag().to_string());
            assert!(stderr.contains("refused"));
        }
        other => panic!("expected an apply error, got {other:?}"),
    }

    // Exactly three log entries: first applied, second failed, first rolled back
    let entries = mock.log().read_page(0, 10).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].tag, first.tag().to_string());
    assert!(entries[2].success);
    assert_eq!(entries[2].action, LogAction::Apply);
    assert_eq!(entries[1].tag, second.tag().to_string());
    assert!(!entries[1].success);
    assert_eq!(entries[0].tag, first.tag().to_string());
    assert_eq!(entries[0].action, LogAction::Rollback);
    assert!(entries[0].success);

    // Only the pre-existing artifact remains
    mock.write_nft_wrapper(&[]);
    let LiveState::Available(snapshot) = mock.executor().live_state().await else {
        panic!("live state should be available");
    };
    let managed: Vec<_> = snapshot.managed_rules().collect();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].tag, Some(pre_existing.tag()));
}

/// Scenario D: a persistent route's artifact is keyed by its tag and
/// survives a process restart (fresh executor, same directories).
#[tokio::test]
async fn test_persistent_route_survives_restart() {
    let mock = MockFacility::new("scenario-d");
    let mut engine = mock.engine().await;

    let route = lab_route(true);
    let tag = route.tag();
    engine.add_static_route(route, "admin").await.unwrap();

    // Fresh executor simulating a restart
    let fresh = mock.executor();
    let artifacts = fresh.read_persisted_routes().await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].0, tag);
    assert!(artifacts[0].1.contains("10.1.0.0/24"));
    assert!(artifacts[0].1.contains("via 192.168.1.1"));

    // Removal deletes the kernel route and the persist artifact
    engine.remove(tag, "admin").await.unwrap();
    assert!(mock.executor().read_persisted_routes().await.unwrap().is_empty());
    let ip_state = std::fs::read_to_string(mock.dir.join("ip.state")).unwrap();
    assert!(ip_state.trim().is_empty());
    assert!(engine.store().state().static_routes.is_empty());
}

/// Removing an already-removed record's artifacts is a no-op, not an error.
#[tokio::test]
async fn test_removal_is_idempotent() {
    let mock = MockFacility::new("idempotent-remove");
    let mut engine = mock.engine().await;

    let rule = ssh_rule();
    let tag = rule.tag();
    engine.add_firewall_rule(rule.clone(), "admin").await.unwrap();
    engine.remove(tag, "admin").await.unwrap();

    // Record and artifacts are gone; removing again is quiet
    engine.remove(tag, "admin").await.unwrap();

    // Even a raw removal plan against the empty facility succeeds
    let report = mock
        .executor()
        .apply(&plan::remove_firewall_rule(&rule), "admin")
        .await
        .unwrap();
    assert_eq!(report.commands_run, 1);
}

/// Timeout and unavailability are distinct failures, and unavailability is
/// detected before anything is executed.
#[tokio::test]
async fn test_timeout_and_unavailable_are_distinct() {
    // Slow facility: only `add rule` sleeps, so the probe passes
    let mock = MockFacility::new("timeout");
    mock.write_nft_wrapper(&[
        ("MOCK_NFT_SLEEP_SUBSTR", "add rule"),
        ("MOCK_NFT_SLEEP_SECS", "5"),
    ]);
    let executor = Executor::new(
        FacilityConfig {
            command_timeout: Duration::from_millis(300),
            ..mock.facility_config()
        },
        mock.log(),
    );
    let err = executor
        .apply(&plan::apply_firewall_rule(&ssh_rule()), "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    // Missing facility binary: unavailable, and nothing was invoked
    let mock = MockFacility::new("unavailable");
    let executor = Executor::new(
        FacilityConfig {
            nft_program: mock.dir.join("missing-nft"),
            ..mock.facility_config()
        },
        mock.log(),
    );
    let err = executor
        .apply(&plan::apply_firewall_rule(&ssh_rule()), "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
    assert!(mock.nft_log().is_empty(), "no command may run when unavailable");
    assert!(mock.log().is_empty().await.unwrap());
}

/// Validation failures never touch the facility, even when the facility
/// does not exist at all.
#[tokio::test]
async fn test_validation_precedes_facility_access() {
    let mock = MockFacility::new("validation-first");
    let mut engine = {
        let store = PolicyStore::load(mock.dir.join("policy.json")).await.unwrap();
        let executor = Executor::new(
            FacilityConfig {
                nft_program: mock.dir.join("missing-nft"),
                ..mock.facility_config()
            },
            mock.log(),
        );
        PolicyEngine::new(store, executor)
    };

    // tcp without a port: validation error, not unavailability
    let invalid = FirewallRule::new("broken", Protocol::Tcp, "admin");
    let err = engine.add_firewall_rule(invalid, "admin").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(RejectReason::MissingPort)
    ));
    assert!(engine.store().state().firewall_rules.is_empty());
}

/// Reconciling the full desired state twice must not duplicate artifacts.
#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let mock = MockFacility::new("reconcile");
    let mut engine = mock.engine().await;

    engine.add_firewall_rule(ssh_rule(), "admin").await.unwrap();
    engine.add_port_forward(web_forward(), "admin").await.unwrap();

    let count_managed = |snapshot: &routemgr::core::parser::LiveSnapshot| {
        snapshot.managed_rules().count()
    };

    engine.reconcile("admin").await.unwrap();
    let LiveState::Available(first) = engine.live_state().await else {
        panic!("live state should be available");
    };

    engine.reconcile("admin").await.unwrap();
    let LiveState::Available(second) = engine.live_state().await else {
        panic!("live state should be available");
    };

    // ssh rule + forward-accept + DNAT, once each
    assert_eq!(count_managed(&first), 3);
    assert_eq!(count_managed(&second), 3);

    let drift = engine.drift().await.unwrap();
    assert!(drift.is_clean(), "unexpected drift: {drift:?}");
}

/// Forwarding sysctls and the masquerade artifact ride the same pipeline.
#[tokio::test]
async fn test_forwarding_and_masquerade() {
    let mock = MockFacility::new("system");
    let mut engine = mock.engine().await;

    engine.set_forwarding(true, false, "admin").await.unwrap();
    let status = system::forwarding_status(engine.executor()).await;
    assert!(status.ipv4);
    assert!(!status.ipv6);

    engine.set_masquerade(true, "eth0", "admin").await.unwrap();
    let nat = system::nat_status(engine.executor()).await;
    assert!(nat.enabled);
    assert!(nat.rules[0].contains("oifname"));

    // Toggling twice must not stack a second rewrite
    engine.set_masquerade(true, "eth0", "admin").await.unwrap();
    let nat = system::nat_status(engine.executor()).await;
    assert_eq!(nat.rules.len(), 1);

    engine.set_masquerade(false, "", "admin").await.unwrap();
    let nat = system::nat_status(engine.executor()).await;
    assert!(!nat.enabled);

    // Deployment log recorded the sysctl writes with the forwarding tag
    let entries = mock.log().read_page(0, 50).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.tag == IdentityTag::Forwarding.to_string()
            && e.command.contains("net.ipv4.ip_forward=1")));
}

/// Editing a record replaces its artifact instead of stacking a second one,
/// and editing is the way out of `Failed`.
#[tokio::test]
async fn test_update_replaces_artifact() {
    let mock = MockFacility::new("update");
    let mut engine = mock.engine().await;

    let rule = ssh_rule();
    let tag = rule.tag();
    engine.add_firewall_rule(rule.clone(), "admin").await.unwrap();

    let mut edited = engine.store().state().firewall_rules[0].clone();
    edited.ports = Some(PortRange::single(2222));
    engine.update_firewall_rule(edited, "admin").await.unwrap();

    let LiveState::Available(snapshot) = engine.live_state().await else {
        panic!("live state should be available");
    };
    let artifacts: Vec<_> = snapshot
        .filter_rules
        .iter()
        .filter(|r| r.tag == Some(tag))
        .collect();
    assert_eq!(artifacts.len(), 1, "edit must not stack artifacts");
    assert_eq!(artifacts[0].dport, Some(PortRange::single(2222)));
    assert_eq!(
        engine.store().state().firewall_rules[0].state,
        RecordState::Active
    );
}

/// Unmanaged artifacts (other actors' rules) are surfaced, never deleted or
/// misattributed by a record removal.
#[tokio::test]
async fn test_unmanaged_artifacts_untouched() {
    let mock = MockFacility::new("unmanaged");

    // Another actor's untagged rule in the managed table
    let alien = std::process::Command::new(mock.dir.join("nft"))
        .args(["add", "table", "inet", "routemgr"])
        .status()
        .unwrap();
    assert!(alien.success());
    let alien = std::process::Command::new(mock.dir.join("nft"))
        .args(["add", "rule", "inet", "routemgr", "input", "tcp", "dport", "9999", "accept"])
        .status()
        .unwrap();
    assert!(alien.success());

    let mut engine = mock.engine().await;
    let rule = ssh_rule();
    let tag = rule.tag();
    engine.add_firewall_rule(rule, "admin").await.unwrap();
    engine.remove(tag, "admin").await.unwrap();

    let LiveState::Available(snapshot) = engine.live_state().await else {
        panic!("live state should be available");
    };
    let unmanaged: Vec<_> = snapshot.unmanaged_rules().collect();
    assert_eq!(unmanaged.len(), 1);
    assert!(unmanaged[0].raw.contains("dport 9999"));

    let drift = engine.drift().await.unwrap();
    assert_eq!(drift.unmanaged.len(), 1);
    assert!(drift.missing.is_empty());
}
