//! Privilege elevation for facility operations
//!
//! routemgr runs as an unprivileged user and only elevates for specific
//! operations:
//!
//! - **nft**: packet-filter rule application and listing
//! - **ip**: routing table changes
//! - **sysctl**: IP forwarding toggles
//!
//! # Elevation Strategy
//!
//! - **Preferred (all modes)**: Uses `run0` when available (systemd v256+, no SUID)
//! - **CLI fallback**: Uses `sudo` for terminal environments
//! - **GUI fallback**: Uses `pkexec` for graphical authentication
//!
//! # Environment Variables
//!
//! - `ROUTEMGR_ELEVATION_METHOD`: Force a specific elevation method (`sudo`,
//!   `run0`, or `pkexec`). Useful for scripts with sudoers NOPASSWD rules.
//!
//! - `ROUTEMGR_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Only the executor can build elevated commands, and only for the
//!   facility binaries resolved at startup
//! - All inputs are validated before elevation
//! - Commands are constructed safely without shell interpolation

use std::io;
use std::path::Path;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `ROUTEMGR_ELEVATION_METHOD`
    #[error("Invalid ROUTEMGR_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Builds a command that runs `program` with root privileges.
///
/// Arguments are passed directly without shell interpretation, preventing
/// command injection. Callers must ensure arguments are validated first.
///
/// Restricted to the crate: the executor is the only component allowed to
/// touch the facility, and it only elevates the binaries resolved into its
/// [`crate::config::FacilityConfig`] at startup.
pub(crate) fn elevated_command(program: &Path, args: &[String]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("ROUTEMGR_TEST_NO_ELEVATION").is_ok() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 2. Direct Root Execution (No prompt needed)
    let is_root = nix::unistd::getuid().is_root();
    if is_root {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 3. Explicit elevation method override (for scripts with sudoers NOPASSWD, etc.)
    if let Ok(method) = std::env::var("ROUTEMGR_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ElevationError::MethodNotAvailable(method));
                    }
                    let mut cmd = Command::new(&method);
                    cmd.arg(program).args(args);
                    Ok(cmd)
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection - prefer run0 (modern, no SUID), fallback to sudo/pkexec

    // Prefer run0 everywhere when available (better security, no SUID bit)
    if binary_exists("run0") {
        let mut cmd = Command::new("run0");
        cmd.arg(program).args(args);
        return Ok(cmd);
    }

    // Fall back based on environment when run0 not available
    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);

    if is_atty {
        // CLI: Standard sudo elevation
        let mut cmd = Command::new("sudo");
        cmd.arg(program).args(args);
        Ok(cmd)
    } else {
        // Headless/GUI: pkexec elevation
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }

        let mut cmd = Command::new("pkexec");
        cmd.arg(program).args(args);
        Ok(cmd)
    }
}
