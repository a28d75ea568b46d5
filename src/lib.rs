//! Rolegate - role-based URL access gate with persistent remember-me logins.
//!
//! The binary wires these modules together; they are public so the
//! integration tests can drive them directly.

pub mod access;
pub mod entities;
pub mod errors;
pub mod identity;
pub mod jobs;
pub mod remember_me;
pub mod session;
pub mod settings;
pub mod storage;
pub mod user_sync;
pub mod web;
