//! Core reconciliation functionality
//!
//! This module contains the types and logic for reconciling desired network
//! policy against the host's packet-filter and routing facilities:
//!
//! - [`model`]: Desired-state records, enums, and identity tags
//! - [`validate`]: Pure candidate-record validation with typed rejections
//! - [`store`]: The persisted policy store (single owner of intent)
//! - [`plan`]: Translation of records into ordered, facility-neutral command plans
//! - [`executor`]: Plan execution under the policy lock, with rollback and logging
//! - [`parser`]: Live-state dump parsing and drift detection
//! - [`system`]: Host-level router settings (forwarding, masquerade)
//! - [`engine`]: The validate → persist → plan → execute → read-back flow
//! - [`error`]: Error taxonomy for all of the above

pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod parser;
pub mod plan;
pub mod store;
pub mod system;
pub mod validate;
