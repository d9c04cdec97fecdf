//! Policy engine: the reconciliation control flow
//!
//! Wires the pieces together in the canonical order: candidate record →
//! validation → store (persist) → plan → executor (apply under lock, logged)
//! → state parser (read back for confirmation). Also drives each record's
//! lifecycle state:
//!
//! `Draft → Validated → Applying → {Active, Failed}`,
//! `Active → Removing → Removed`.
//!
//! `Failed` records are recovered only by re-editing and re-validating;
//! nothing transitions out of `Failed` automatically, and the engine never
//! retries an apply on its own.

use crate::core::error::{Error, Result};
use crate::core::executor::{ApplyReport, Executor};
use crate::core::model::{
    FirewallRule, IdentityTag, PortForwardRule, RecordState, StaticRoute,
};
use crate::core::parser::{self, DriftReport, LiveState};
use crate::core::plan::{self, Plan};
use crate::core::store::PolicyStore;
use crate::core::validate;
use crate::validators;
use tracing::{info, warn};

/// Owns the policy store and the executor; everything above (CLI, web UI)
/// talks to this.
#[derive(Debug)]
pub struct PolicyEngine {
    store: PolicyStore,
    executor: Executor,
}

impl PolicyEngine {
    pub fn new(store: PolicyStore, executor: Executor) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    // ─── Firewall rules ───

    /// Validates, persists, and (when enabled) applies a firewall rule.
    pub async fn add_firewall_rule(&mut self, mut rule: FirewallRule, actor: &str) -> Result<()> {
        validate::validate_firewall_rule(&rule).map_err(Error::from_rejection)?;
        self.note_rule_hints(&rule);

        rule.state = RecordState::Validated;
        let tag = rule.tag();
        let enabled = rule.enabled;
        let record_plan = plan::apply_firewall_rule(&rule);
        self.store.upsert_firewall_rule(rule)?;
        self.store.save().await?;

        if enabled {
            self.apply_record(tag, record_plan, actor).await?;
        }
        Ok(())
    }

    /// Re-validates and re-applies an edited firewall rule: the old artifact
    /// is removed and the new one installed in a single plan. Editing is the
    /// only way out of `Failed`.
    pub async fn update_firewall_rule(&mut self, mut rule: FirewallRule, actor: &str) -> Result<()> {
        let Some(existing) = self.store.firewall_rule(rule.id).cloned() else {
            return Err(Error::Internal(format!(
                "no firewall rule with id {}",
                rule.id
            )));
        };
        validate::validate_firewall_rule(&rule).map_err(Error::from_rejection)?;

        rule.state = RecordState::Validated;
        rule.modified_at = chrono::Utc::now();
        let tag = rule.tag();
        let enabled = rule.enabled;

        let mut combined = plan::remove_firewall_rule(&existing);
        if enabled {
            combined.commands.extend(plan::apply_firewall_rule(&rule).commands);
        }

        self.store.upsert_firewall_rule(rule)?;
        self.store.save().await?;
        self.apply_record(tag, combined, actor).await
    }

    pub async fn add_port_forward(&mut self, mut rule: PortForwardRule, actor: &str) -> Result<()> {
        validate::validate_port_forward(&rule, self.store.state())
            .map_err(Error::from_rejection)?;

        rule.state = RecordState::Validated;
        let tag = rule.tag();
        let enabled = rule.enabled;
        let record_plan = plan::apply_port_forward(&rule);
        self.store.upsert_port_forward(rule)?;
        self.store.save().await?;

        if enabled {
            self.apply_record(tag, record_plan, actor).await?;
        }
        Ok(())
    }

    pub async fn update_port_forward(
        &mut self,
        mut rule: PortForwardRule,
        actor: &str,
    ) -> Result<()> {
        let Some(existing) = self.store.port_forward(rule.id).cloned() else {
            return Err(Error::Internal(format!(
                "no port forward with id {}",
                rule.id
            )));
        };
        validate::validate_port_forward(&rule, self.store.state())
            .map_err(Error::from_rejection)?;

        rule.state = RecordState::Validated;
        rule.modified_at = chrono::Utc::now();
        let tag = rule.tag();
        let enabled = rule.enabled;

        let mut combined = plan::remove_port_forward(&existing);
        if enabled {
            combined.commands.extend(plan::apply_port_forward(&rule).commands);
        }

        self.store.upsert_port_forward(rule)?;
        self.store.save().await?;
        self.apply_record(tag, combined, actor).await
    }

    pub async fn add_static_route(&mut self, mut route: StaticRoute, actor: &str) -> Result<()> {
        validate::validate_static_route(&route, self.store.state())
            .map_err(Error::from_rejection)?;

        route.state = RecordState::Validated;
        let tag = route.tag();
        let enabled = route.enabled;
        let record_plan = plan::apply_static_route(&route);
        self.store.upsert_static_route(route)?;
        self.store.save().await?;

        if enabled {
            self.apply_record(tag, record_plan, actor).await?;
        }
        Ok(())
    }

    pub async fn update_static_route(&mut self, mut route: StaticRoute, actor: &str) -> Result<()> {
        let Some(existing) = self.store.static_route(route.id).cloned() else {
            return Err(Error::Internal(format!(
                "no static route with id {}",
                route.id
            )));
        };
        validate::validate_static_route(&route, self.store.state())
            .map_err(Error::from_rejection)?;

        route.state = RecordState::Validated;
        route.modified_at = chrono::Utc::now();
        let tag = route.tag();
        let enabled = route.enabled;

        let mut combined = plan::remove_static_route(&existing);
        if enabled {
            combined.commands.extend(plan::apply_static_route(&route).commands);
        }

        self.store.upsert_static_route(route)?;
        self.store.save().await?;
        self.apply_record(tag, combined, actor).await
    }

    // ─── Removal ───

    /// Removes a record's live artifacts and, on success, the stored record
    /// itself. Removing a record whose artifacts are already gone is a
    /// no-op that still deletes the record. Removing an unknown tag is a
    /// quiet no-op.
    pub async fn remove(&mut self, tag: IdentityTag, actor: &str) -> Result<()> {
        let removal = match tag {
            IdentityTag::FirewallRule(id) => self
                .store
                .firewall_rule(id)
                .map(|r| plan::remove_firewall_rule(r)),
            IdentityTag::PortForward(id) => self
                .store
                .port_forward(id)
                .map(|r| plan::remove_port_forward(r)),
            IdentityTag::StaticRoute(id) => self
                .store
                .static_route(id)
                .map(|r| plan::remove_static_route(r)),
            IdentityTag::Masquerade | IdentityTag::Forwarding => {
                return Err(Error::Internal(
                    "system settings are changed, not removed".to_string(),
                ))
            }
        };

        let Some(removal) = removal else {
            info!("remove of unknown record {tag} is a no-op");
            return Ok(());
        };

        self.set_state(tag, RecordState::Removing);
        self.store.save().await?;

        match self.executor.apply(&removal, actor).await {
            Ok(_) => {
                match tag {
                    IdentityTag::FirewallRule(id) => {
                        self.store.remove_firewall_rule(id);
                    }
                    IdentityTag::PortForward(id) => {
                        self.store.remove_port_forward(id);
                    }
                    IdentityTag::StaticRoute(id) => {
                        self.store.remove_static_route(id);
                    }
                    IdentityTag::Masquerade | IdentityTag::Forwarding => unreachable!(),
                }
                self.store.save().await?;
                info!("{tag} removed");
                Ok(())
            }
            Err(e) => {
                self.set_state(tag, RecordState::Failed);
                self.store.save().await?;
                Err(e)
            }
        }
    }

    // ─── System settings ───

    /// Sets the kernel forwarding switches and persists the desired values.
    pub async fn set_forwarding(&mut self, ipv4: bool, ipv6: bool, actor: &str) -> Result<()> {
        {
            let system = self.store.system_mut();
            system.ipv4_forwarding = ipv4;
            system.ipv6_forwarding = ipv6;
        }
        self.store.save().await?;

        let system_plan = plan::forwarding_plan(&self.store.state().system);
        self.executor.apply(&system_plan, actor).await.map(|_| ())
    }

    /// Enables or disables the egress masquerade rule.
    pub async fn set_masquerade(
        &mut self,
        enabled: bool,
        interface: &str,
        actor: &str,
    ) -> Result<()> {
        if enabled && validators::validate_interface(interface).is_err() {
            return Err(Error::from_rejection(
                validate::RejectReason::InvalidInterface(interface.to_string()),
            ));
        }

        {
            let system = self.store.system_mut();
            system.nat_enabled = enabled;
            system.nat_interface = interface.to_string();
        }
        self.store.save().await?;

        // Always clear the old artifact first (no-op when absent) so toggling
        // or changing the interface never leaves a duplicate rewrite behind
        let mut change = plan::masquerade_remove();
        if enabled {
            change.commands.extend(plan::masquerade_apply(interface).commands);
        }
        self.executor.apply(&change, actor).await.map(|_| ())
    }

    // ─── Whole-state operations ───

    /// Applies the complete desired state (used at boot and for operator
    /// "re-sync" after drift). Existing managed artifacts are cleared first,
    /// so reconciling twice does not duplicate anything.
    pub async fn reconcile(&mut self, actor: &str) -> Result<ApplyReport> {
        let mut full = plan::full_removal_plan(self.store.state());
        full.commands
            .extend(plan::full_apply_plan(self.store.state()).commands);

        let apply_tags: Vec<IdentityTag> = full
            .commands
            .iter()
            .filter(|c| c.action == plan::PlanAction::Apply)
            .map(|c| c.tag)
            .collect();

        for tag in &apply_tags {
            self.set_state(*tag, RecordState::Applying);
        }
        self.store.save().await?;

        match self.executor.apply(&full, actor).await {
            Ok(report) => {
                for tag in &apply_tags {
                    self.set_state(*tag, RecordState::Active);
                }
                self.store.save().await?;
                self.confirm_applied(&apply_tags).await;
                Ok(report)
            }
            Err(e) => {
                for tag in &apply_tags {
                    self.set_state(*tag, RecordState::Failed);
                }
                self.store.save().await?;
                Err(e)
            }
        }
    }

    /// Current live state; never takes the policy lock.
    pub async fn live_state(&self) -> LiveState {
        self.executor.live_state().await
    }

    /// Desired-vs-live drift. Informational: live state is evidence of
    /// current effect, never a source of intent, so nothing is auto-repaired.
    pub async fn drift(&self) -> Option<DriftReport> {
        match self.executor.live_state().await {
            LiveState::Available(snapshot) => {
                Some(parser::diff_desired_live(self.store.state(), &snapshot))
            }
            LiveState::Unavailable { reason } => {
                warn!("drift check skipped, facility unavailable: {reason}");
                None
            }
        }
    }

    // ─── Internals ───

    /// Runs one record's plan, driving its state through
    /// `Applying → {Active, Failed}` and confirming via read-back.
    async fn apply_record(&mut self, tag: IdentityTag, record_plan: Plan, actor: &str) -> Result<()> {
        self.set_state(tag, RecordState::Applying);
        self.store.save().await?;

        match self.executor.apply(&record_plan, actor).await {
            Ok(_) => {
                self.set_state(tag, RecordState::Active);
                self.store.save().await?;
                self.confirm_applied(&[tag]).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(tag, RecordState::Failed);
                self.store.save().await?;
                Err(e)
            }
        }
    }

    /// Post-apply confirmation: read the live state back and warn when an
    /// applied tag has no visible artifact. Advisory only - a read taken
    /// right here may legitimately race another session's plan.
    async fn confirm_applied(&self, tags: &[IdentityTag]) {
        let LiveState::Available(snapshot) = self.executor.live_state().await else {
            warn!("post-apply confirmation skipped: live state unavailable");
            return;
        };
        let drift = parser::diff_desired_live(self.store.state(), &snapshot);
        for tag in tags {
            if drift.missing.contains(tag) {
                warn!("{tag} applied but not visible in live state");
            }
        }
    }

    fn set_state(&mut self, tag: IdentityTag, state: RecordState) {
        let now = chrono::Utc::now();
        match tag {
            IdentityTag::FirewallRule(id) => {
                if let Some(rule) = self.store.firewall_rule_mut(id) {
                    rule.state = state;
                    rule.modified_at = now;
                }
            }
            IdentityTag::PortForward(id) => {
                if let Some(rule) = self.store.port_forward_mut(id) {
                    rule.state = state;
                    rule.modified_at = now;
                }
            }
            IdentityTag::StaticRoute(id) => {
                if let Some(route) = self.store.static_route_mut(id) {
                    route.state = state;
                    route.modified_at = now;
                }
            }
            IdentityTag::Masquerade | IdentityTag::Forwarding => {}
        }
    }

    /// Informational-only hints surfaced at submit time (reserved source
    /// ranges, well-known ports). Never blocks acceptance.
    fn note_rule_hints(&self, rule: &FirewallRule) {
        if let Some(source) = rule.source {
            if let Some(note) = validators::check_reserved_ip(source) {
                info!("rule '{}': {note}", rule.name);
            }
        }
        if let Some(ports) = rule.ports {
            if let Some(note) = validators::check_well_known_port(ports.start) {
                info!("rule '{}': {note}", rule.name);
            }
        }
    }
}
