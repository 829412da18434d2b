//! PREMIA: premium-target index options selling engine.
//!
//! Library crate root. The chat frontend drives [`engine::Engine`]; the
//! binary in `main.rs` wires configuration, storage, the broker client,
//! and the background tasks around it.

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod notify;
pub mod session;
pub mod store;
pub mod types;

pub use engine::Engine;
pub use error::{Error, Result};
