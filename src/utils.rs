//! Utility functions for directory management and system integration
//!
//! This module provides helper functions following the XDG Base Directory
//! specification for portable configuration and data storage across Linux
//! distributions.
//!
//! # Directory Structure
//!
//! - Data: `~/.local/share/routemgr/` - Policy store and configuration
//! - State: `~/.local/state/routemgr/` - Runtime state (deployment log, logs)

use directories::ProjectDirs;
use std::path::PathBuf;

pub fn get_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "routemgr", "routemgr").map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "routemgr", "routemgr")
        .and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        if let Some(dir) = get_data_dir() {
            builder.create(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(dir) = get_data_dir() {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Lists host network interfaces from sysfs.
///
/// Loopback is skipped: the base ruleset already covers it and no managed
/// record should target it.
pub fn list_interfaces() -> Vec<String> {
    let mut interfaces = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/sys/class/net") {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                if name != "lo" {
                    interfaces.push(name);
                }
            }
        }
    }
    interfaces.sort();
    interfaces
}
