//! routemgr - declarative router policy for a Linux gateway
//!
//! routemgr keeps the desired network policy of a host - firewall rules,
//! port forwards, static routes, and a couple of router-level switches - in a
//! persistent store, pushes it to the host's nftables and routing facilities
//! through their CLIs, and reads the live state back for display and drift
//! detection.
//!
//! # Architecture
//!
//! - [`core`] - Records, validation, planning, execution, live-state parsing
//! - [`audit`] - Append-only deployment log of every facility command
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Configuration persistence and facility path resolution
//! - [`elevation`] - Privilege escalation for facility commands
//! - [`utils`] - Utility functions (XDG directories, interface listing)
//!
//! # Safety Features
//!
//! - Pure validation before anything touches the facility
//! - One process-wide lock around every mutating facility sequence
//! - Bounded timeouts on all facility calls
//! - First-failure stop with rollback of the invocation's own changes
//! - NAT rewrites and their forward-accepts planned as an inseparable pair
//! - Append-only audit trail with raw command output

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::engine::PolicyEngine;
pub use core::error::{Error, Result};
pub use core::model::{
    Action, Chain, FirewallRule, ForwardProtocol, IdentityTag, PolicyState, PortForwardRule,
    PortRange, Protocol, StaticRoute,
};
