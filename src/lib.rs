//! Marketplace API
//!
//! REST backend for a small multi-seller marketplace.
//!
//! ## Features
//! - Accounts: signup, signin, verified social login, profiles and addresses
//! - Product catalog with categories, owner-only edits and image payloads
//! - One cart per user with upsert semantics
//! - Transactional checkout, order status state machine and payments
//! - Domain events on NATS
//!
//! Storage sits behind [`store::Store`], with a Postgres implementation and
//! an in-memory one used by the tests.

pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod state;
pub mod store;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use state::AppState;
