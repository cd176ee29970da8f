//! Remote annotation-server access.
//!
//! # Responsibility
//! - `api`: the contract every service talks to.
//! - `http`: blocking REST client for a live server.
//! - `memory`: in-process server for tests and offline rehearsal.
//!
//! # Invariants
//! - Services depend on `CatmaidApi` only, never on a concrete client.

pub mod api;
pub mod http;
pub mod memory;
