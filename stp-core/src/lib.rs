#![allow(clippy::new_without_default)]

//! Shared infrastructure for the secure stack: crypto primitives, configuration,
//! logging and the common error type. Mirrors the role `flux` played for the
//! original transport code, generalized from a single game-server protocol to
//! a CURVE-authenticated peer messaging stack.

pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{StackError, StackResult};
