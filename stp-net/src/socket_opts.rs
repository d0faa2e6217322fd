//! Socket options shared by the listener and every remote's dealer socket.

use stp_core::config::Config;
use stp_core::error::StackResult;

use crate::zmq_err;

pub(crate) fn apply_common_options(socket: &zmq::Socket, cfg: &Config) -> StackResult<()> {
    if cfg.keepalive {
        socket.set_tcp_keepalive(1).map_err(zmq_err)?;
    }
    socket.set_sndhwm(cfg.zmq_internal_queue_length).map_err(zmq_err)?;
    socket.set_rcvhwm(cfg.zmq_internal_queue_length).map_err(zmq_err)?;
    Ok(())
}
