//! The secure peer messaging stack: on-disk key material, the ZAP authenticator, one handle
//! per outbound peer, and the `Stack` that ties listener + remotes + receive queue together
//! behind a single `start`/`stop`/`service`/`send` surface. Built the way `flux` and
//! `t51core`/`authenticator` in the teacher workspace are built — small modules, a typed
//! error hierarchy from `stp-core`, structured logging threaded through every component — but
//! over a dealer/router CURVE transport instead of the teacher's token-based session model.

pub mod authenticator;
pub mod keystore;
pub mod pipeline;
pub mod remote;
mod socket_opts;
pub mod stack;

pub use authenticator::Authenticator;
pub use keystore::{KeyMaterial, KeyStore};
pub use remote::{HostAddress, Remote};
pub use stack::{Stack, StackOptions};

use stp_core::error::StackError;

pub(crate) fn zmq_err(err: zmq::Error) -> StackError {
    StackError::Transport(err.to_string())
}
