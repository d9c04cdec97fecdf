//! Policy store: persisted desired state
//!
//! The store is the single owner of intent. Records are kept in one JSON
//! file, written atomically (temp file, restrictive permissions, rename) with
//! a SHA-256 checksum sidecar for integrity verification. The live facility
//! is never treated as a source of truth for intent - nothing here is ever
//! populated from a live dump.

use crate::core::error::{Error, Result};
use crate::core::model::{
    FirewallRule, PolicyState, PortForwardRule, StaticRoute, MAX_RECORDS,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File-backed desired-state store
#[derive(Debug)]
pub struct PolicyStore {
    path: PathBuf,
    state: PolicyState,
}

impl PolicyStore {
    /// Opens the store at `path`, creating an empty one if the file does not
    /// exist yet.
    ///
    /// A checksum sidecar mismatch logs a warning but does not fail - the
    /// file may have been hand-edited, and refusing to load would strand the
    /// operator.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !tokio::fs::try_exists(&path).await? {
            return Ok(Self {
                path,
                state: PolicyState::new(),
            });
        }

        let json = tokio::fs::read_to_string(&path).await?;

        let checksum_path = sidecar_path(&path);
        if let Ok(expected) = tokio::fs::read_to_string(&checksum_path).await {
            let actual = checksum(&json);
            if expected.trim() != actual {
                tracing::warn!(
                    "Policy store checksum mismatch (expected: {}, got: {})",
                    expected.trim(),
                    actual
                );
            }
        }

        let state: PolicyState = serde_json::from_str(&json)?;

        // Validate record counts to prevent memory exhaustion
        let too_many = state.firewall_rules.len() > MAX_RECORDS
            || state.port_forwards.len() > MAX_RECORDS
            || state.static_routes.len() > MAX_RECORDS;
        if too_many {
            return Err(Error::Internal(format!(
                "policy store exceeds {MAX_RECORDS} records per collection"
            )));
        }

        Ok(Self { path, state })
    }

    /// Persists the store atomically and refreshes the checksum sidecar.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&self.state)?;

        let mut temp_path = self.path.clone();
        temp_path.set_extension("json.tmp");

        #[cfg(unix)]
        {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            // Restrictive permissions before any policy data is written
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)
                .await?;

            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }

        #[cfg(not(unix))]
        {
            tokio::fs::write(&temp_path, &json).await?;
        }

        tokio::fs::rename(&temp_path, &self.path).await?;
        tokio::fs::write(sidecar_path(&self.path), checksum(&json)).await?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current desired-state snapshot. Validators run against this, never
    /// against the live facility.
    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    pub fn system_mut(&mut self) -> &mut crate::core::model::SystemSettings {
        &mut self.state.system
    }

    // ─── Firewall rules ───

    pub fn firewall_rule(&self, id: Uuid) -> Option<&FirewallRule> {
        self.state.firewall_rules.iter().find(|r| r.id == id)
    }

    pub fn firewall_rule_mut(&mut self, id: Uuid) -> Option<&mut FirewallRule> {
        self.state.firewall_rules.iter_mut().find(|r| r.id == id)
    }

    /// Inserts or replaces by id.
    pub fn upsert_firewall_rule(&mut self, rule: FirewallRule) -> Result<()> {
        if let Some(existing) = self.firewall_rule_mut(rule.id) {
            *existing = rule;
            return Ok(());
        }
        if self.state.firewall_rules.len() >= MAX_RECORDS {
            return Err(Error::Internal(format!(
                "firewall rule limit reached ({MAX_RECORDS})"
            )));
        }
        self.state.firewall_rules.push(rule);
        Ok(())
    }

    pub fn remove_firewall_rule(&mut self, id: Uuid) -> Option<FirewallRule> {
        let pos = self.state.firewall_rules.iter().position(|r| r.id == id)?;
        Some(self.state.firewall_rules.remove(pos))
    }

    // ─── Port forwards ───

    pub fn port_forward(&self, id: Uuid) -> Option<&PortForwardRule> {
        self.state.port_forwards.iter().find(|r| r.id == id)
    }

    pub fn port_forward_mut(&mut self, id: Uuid) -> Option<&mut PortForwardRule> {
        self.state.port_forwards.iter_mut().find(|r| r.id == id)
    }

    pub fn upsert_port_forward(&mut self, rule: PortForwardRule) -> Result<()> {
        if let Some(existing) = self.port_forward_mut(rule.id) {
            *existing = rule;
            return Ok(());
        }
        if self.state.port_forwards.len() >= MAX_RECORDS {
            return Err(Error::Internal(format!(
                "port forward limit reached ({MAX_RECORDS})"
            )));
        }
        self.state.port_forwards.push(rule);
        Ok(())
    }

    pub fn remove_port_forward(&mut self, id: Uuid) -> Option<PortForwardRule> {
        let pos = self.state.port_forwards.iter().position(|r| r.id == id)?;
        Some(self.state.port_forwards.remove(pos))
    }

    // ─── Static routes ───

    pub fn static_route(&self, id: Uuid) -> Option<&StaticRoute> {
        self.state.static_routes.iter().find(|r| r.id == id)
    }

    pub fn static_route_mut(&mut self, id: Uuid) -> Option<&mut StaticRoute> {
        self.state.static_routes.iter_mut().find(|r| r.id == id)
    }

    pub fn upsert_static_route(&mut self, route: StaticRoute) -> Result<()> {
        if let Some(existing) = self.static_route_mut(route.id) {
            *existing = route;
            return Ok(());
        }
        if self.state.static_routes.len() >= MAX_RECORDS {
            return Err(Error::Internal(format!(
                "static route limit reached ({MAX_RECORDS})"
            )));
        }
        self.state.static_routes.push(route);
        Ok(())
    }

    pub fn remove_static_route(&mut self, id: Uuid) -> Option<StaticRoute> {
        let pos = self.state.static_routes.iter().position(|r| r.id == id)?;
        Some(self.state.static_routes.remove(pos))
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut sidecar = path.to_path_buf();
    sidecar.set_extension("json.sha256");
    sidecar
}

fn checksum(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}
