//! Domain model for neurons, volumes and inter-project links.
//!
//! # Responsibility
//! - Define the in-memory shapes every service and transform works on.
//! - Keep the linking annotation encoding in one place.
//!
//! # Invariants
//! - Neurons are fetched fresh for every operation; edits only touch the
//!   in-memory copy until an explicit upload.
//! - A linking annotation is the only persisted link between projects.

pub mod link;
pub mod neuron;
pub mod swc;
pub mod volume;
