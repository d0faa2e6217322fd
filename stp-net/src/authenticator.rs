//! Wraps the transport's ZAP authenticator. Grounded in `original_source/stp_zmq/zstack.py`'s
//! use of `MultiZapAuthenticator` (`setupAuth`/`teardownAuth`), and in the rust-zmq socket
//! idioms (`set_curve_*`, `recv_multipart`, `poll`) the corpus shows in
//! `other_examples/fe279972_chainflip-io-chainflip-backend__engine-src-p2p.rs.rs`. Neither the
//! teacher nor any other example repo carries a ZAP handler, so the wire-level handshake below
//! is written directly against the ZAP 1.0 frame layout (version, sequence, domain, address,
//! identity, mechanism, credentials).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use stp_core::crypto;
use stp_core::error::{StackError, StackResult};
use stp_core::logging::{debug, warn, Logger};

const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";
const ZAP_VERSION: &[u8] = b"1.0";
const POLL_TIMEOUT_MS: i64 = 200;

struct AuthState {
    /// `None` means "allow any" (key-sharing mode); `Some(dir)` means restrict to the
    /// signing-derived curve public keys found under `dir` (the stack's `public_keys` dir),
    /// re-scanned on every handshake so freshly added remotes are picked up immediately.
    allow_dir: Option<PathBuf>,
}

/// Runs the ZAP handler on a dedicated background thread, mirroring how the underlying
/// transport library would run its own authentication worker. `start`/`stop` own that
/// thread's lifetime; the thread is always joined on `stop`.
pub struct Authenticator {
    state: Arc<Mutex<AuthState>>,
    stop_flag: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
    log: Logger,
}

impl Authenticator {
    pub fn new(log: Logger) -> Authenticator {
        Authenticator {
            state: Arc::new(Mutex::new(AuthState { allow_dir: None })),
            stop_flag: None,
            handle: None,
            log,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// `restricted=true` binds the allowlist to `allow_dir` (expected to be the stack's
    /// `public_keys` directory); `restricted=false` configures "allow any". Starting twice
    /// without `force` is the one fatal programming error this component can raise.
    pub fn start(
        &mut self,
        ctx: &zmq::Context,
        restricted: bool,
        allow_dir: Option<PathBuf>,
        force: bool,
    ) -> StackResult<()> {
        if self.is_running() {
            if !force {
                return Err(StackError::AuthAlreadyRunning);
            }
            self.stop();
        }

        self.configure(restricted, allow_dir);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let ctx = ctx.clone();
        let state = self.state.clone();
        let thread_stop = stop_flag.clone();
        let log = self.log.clone();

        let handle = thread::Builder::new()
            .name("stp-zap".into())
            .spawn(move || zap_loop(ctx, state, thread_stop, log))
            .map_err(|err| StackError::Transport(err.to_string()))?;

        self.stop_flag = Some(stop_flag);
        self.handle = Some(handle);
        Ok(())
    }

    /// Updates the allowlist mode of a running (or not-yet-started) authenticator in place.
    pub fn configure(&self, restricted: bool, allow_dir: Option<PathBuf>) {
        let mut state = self.state.lock().expect("authenticator state poisoned");
        state.allow_dir = if restricted { allow_dir } else { None };
    }

    pub fn allow_any(&self) -> bool {
        self.state.lock().expect("authenticator state poisoned").allow_dir.is_none()
    }

    pub fn stop(&mut self) {
        if let Some(flag) = self.stop_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(self.log, "ZAP authenticator thread panicked");
            }
        }
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn zap_loop(ctx: zmq::Context, state: Arc<Mutex<AuthState>>, stop: Arc<AtomicBool>, log: Logger) {
    let socket = match ctx.socket(zmq::SocketType::REP) {
        Ok(socket) => socket,
        Err(err) => {
            warn!(log, "failed to create ZAP socket"; "error" => %err);
            return;
        }
    };

    if let Err(err) = socket.bind(ZAP_ENDPOINT) {
        warn!(log, "failed to bind ZAP socket"; "error" => %err);
        return;
    }

    while !stop.load(Ordering::SeqCst) {
        match socket.poll(zmq::POLLIN, POLL_TIMEOUT_MS) {
            Ok(n) if n > 0 => {}
            Ok(_) => continue,
            Err(_) => continue,
        }

        let frames = match socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(_) => continue,
        };

        if frames.len() < 6 {
            warn!(log, "malformed ZAP request"; "frame_count" => frames.len());
            continue;
        }

        let sequence = frames[1].clone();
        let domain = String::from_utf8_lossy(&frames[2]).into_owned();
        let mechanism = String::from_utf8_lossy(&frames[5]).into_owned();
        let client_key = frames.get(6).cloned().unwrap_or_default();

        let allowed = {
            let st = state.lock().expect("authenticator state poisoned");
            match &st.allow_dir {
                None => true,
                Some(_) if mechanism != "CURVE" => false,
                Some(dir) => key_is_allowed(dir, &client_key),
            }
        };

        debug!(log, "zap decision"; "domain" => &domain, "mechanism" => &mechanism, "allowed" => allowed);

        let (status_code, status_text): (&[u8], &[u8]) =
            if allowed { (b"200", b"OK") } else { (b"400", b"Denied") };

        let reply = [
            ZAP_VERSION.to_vec(),
            sequence,
            status_code.to_vec(),
            status_text.to_vec(),
            Vec::new(),
            Vec::new(),
        ];
        if let Err(err) = socket.send_multipart(reply, 0) {
            warn!(log, "failed to send ZAP reply"; "error" => %err);
        }
    }
}

fn key_is_allowed(dir: &Path, client_key: &[u8]) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|ext| ext == "key").unwrap_or(false) {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(bytes) = crypto::from_hex(&content) {
                    if bytes == client_key {
                        return true;
                    }
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use stp_core::logging::discard;

    #[test]
    fn fresh_authenticator_is_not_running() {
        let auth = Authenticator::new(discard());
        assert!(!auth.is_running());
        assert!(auth.allow_any());
    }

    #[test]
    fn start_twice_without_force_is_fatal() {
        let ctx = zmq::Context::new();
        let mut auth = Authenticator::new(discard());
        auth.start(&ctx, false, None, false).unwrap();
        let err = auth.start(&ctx, false, None, false).unwrap_err();
        assert!(matches!(err, StackError::AuthAlreadyRunning));
        auth.stop();
    }

    #[test]
    fn start_twice_with_force_restarts_cleanly() {
        let ctx = zmq::Context::new();
        let mut auth = Authenticator::new(discard());
        auth.start(&ctx, true, None, false).unwrap();
        auth.start(&ctx, false, None, true).unwrap();
        assert!(auth.allow_any());
        auth.stop();
    }

    #[test]
    fn configure_toggles_allow_any() {
        let auth = Authenticator::new(discard());
        auth.configure(true, Some(PathBuf::from("/tmp/does-not-matter")));
        assert!(!auth.allow_any());
        auth.configure(false, None);
        assert!(auth.allow_any());
    }
}
