//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate remote calls, transforms and operator prompts into the
//!   operations the CLI exposes.
//! - Keep the CLI decoupled from transport and transform details.
//!
//! # Invariants
//! - Services take a `SyncContext`; none of them keep connection state.
//! - Options are validated before the first remote call.

pub mod error;
pub mod housekeeping_service;
pub mod link_service;
pub mod manipulate_service;
pub mod options;
pub mod upload_service;
