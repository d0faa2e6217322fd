//! One outbound peer: its socket, its liveness bit, its identity. Generalizes
//! `stp_zmq.remote.Remote` (`original_source/stp_zmq/zstack.py` imports it) using the
//! rust-zmq dealer-socket setup shown in
//! `other_examples/fe279972_chainflip-io-chainflip-backend__engine-src-p2p.rs.rs`
//! (`connect_to_peer`: `set_curve_secretkey`/`set_curve_publickey`/`set_curve_serverkey`,
//! `zmq::SocketType::DEALER`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use stp_core::config::Config;
use stp_core::error::StackResult;
use stp_core::logging::{debug, Logger};

use crate::socket_opts::apply_common_options;
use crate::zmq_err;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// `(host, port)` identifying a peer's listener endpoint.
pub type HostAddress = (String, u16);

/// The stack's in-memory handle for one known peer. State machine:
/// `NoSocket -> Dialing (connect) -> Connected (pong received) -> NoSocket (disconnect)`.
pub struct Remote {
    pub name: String,
    pub ha: HostAddress,
    pub verkey: Option<Vec<u8>>,
    pub pubkey: Vec<u8>,
    pub uid: u64,
    socket: Option<zmq::Socket>,
    connected: AtomicBool,
}

impl Remote {
    pub fn new(name: String, ha: HostAddress, verkey: Option<Vec<u8>>, pubkey: Vec<u8>) -> Remote {
        Remote {
            name,
            ha,
            verkey,
            pubkey,
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            socket: None,
            connected: AtomicBool::new(false),
        }
    }

    pub fn socket(&self) -> Option<&zmq::Socket> {
        self.socket.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Called on pong receipt.
    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    /// Creates a dealer socket, installs local curve keys, pins the peer's curve public key,
    /// sets the socket identity to the local encryption public key, applies the configured
    /// socket options and dials `ha`. Idempotent: tears down any existing socket first.
    pub fn connect(
        &mut self,
        ctx: &zmq::Context,
        local_public: &[u8],
        local_secret: &[u8],
        cfg: &Config,
        log: &Logger,
    ) -> StackResult<()> {
        if self.socket.is_some() {
            self.disconnect();
        }

        let socket = ctx.socket(zmq::SocketType::DEALER).map_err(zmq_err)?;
        socket.set_curve_secretkey(local_secret).map_err(zmq_err)?;
        socket.set_curve_publickey(local_public).map_err(zmq_err)?;
        socket.set_curve_serverkey(&self.pubkey).map_err(zmq_err)?;
        socket.set_identity(local_public).map_err(zmq_err)?;
        apply_common_options(&socket, cfg)?;

        let endpoint = format!("{}://{}:{}", cfg.network_protocol, self.ha.0, self.ha.1);
        socket.connect(&endpoint).map_err(zmq_err)?;

        debug!(log, "remote dialing"; "remote" => &self.name, "endpoint" => &endpoint);

        self.socket = Some(socket);
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    /// Unbinds/closes the socket with zero linger.
    pub fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.set_linger(0);
            drop(socket);
        }
        self.connected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_remotes_get_distinct_monotonic_uids() {
        let a = Remote::new("a".into(), ("host".into(), 1), None, vec![1]);
        let b = Remote::new("b".into(), ("host".into(), 1), None, vec![2]);
        assert!(b.uid > a.uid);
    }

    #[test]
    fn remote_starts_disconnected_with_no_socket() {
        let remote = Remote::new("a".into(), ("host".into(), 1), None, vec![1]);
        assert!(!remote.is_connected());
        assert!(remote.socket().is_none());
    }

    #[test]
    fn set_connected_flips_the_liveness_bit() {
        let remote = Remote::new("a".into(), ("host".into(), 1), None, vec![1]);
        remote.set_connected();
        assert!(remote.is_connected());
    }

    #[test]
    fn disconnect_without_a_socket_is_a_noop() {
        let mut remote = Remote::new("a".into(), ("host".into(), 1), None, vec![1]);
        remote.disconnect();
        assert!(!remote.is_connected());
    }
}
