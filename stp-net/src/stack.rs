//! Owns the listener, the remote table and the receive queue; the component the surrounding
//! runtime actually drives. Generalizes `ZStack` (`original_source/stp_zmq/zstack.py`) end to
//! end: `setupDirs`/`setupOwnKeysIfNeeded` become `Stack::new` delegating to `KeyStore`,
//! `setupAuth`/`teardownAuth` become the owned `Authenticator`, `_receiveFromListener`/
//! `_receiveFromRemotes`/`processReceived` become `drain_listener`/`drain_remotes`/
//! `process_received`, and `send`/`transmit`/`transmitThroughListener` become their Rust
//! namesakes below.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::HashMap as HashbrownMap;
use serde_json::Value;

use stp_core::config::Config;
use stp_core::crypto;
use stp_core::error::{StackError, StackResult};
use stp_core::logging::{debug, error, info, trace, warn, Logger};
use stp_core::time::interval_elapsed;

use crate::authenticator::Authenticator;
use crate::keystore::KeyStore;
use crate::pipeline::{self, Payload, PingTarget};
use crate::remote::{HostAddress, Remote};
use crate::socket_opts::apply_common_options;
use crate::zmq_err;

/// A signing public key known to this stack. Verification itself is delegated to
/// `stp_core::crypto` (out of scope for this component per SPEC_FULL.md 1); `Verifier` just
/// remembers which key a given peer signs with, mirroring `ZStack.verifiers`.
struct Verifier {
    public: Vec<u8>,
}

impl Verifier {
    fn new(public: Vec<u8>) -> Verifier {
        Verifier { public }
    }

    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        if sig.len() != crypto::SIGNATURE_SIZE || self.public.len() != crypto::SIGN_PUBLIC_SIZE {
            return false;
        }
        let mut sig_arr = [0u8; crypto::SIGNATURE_SIZE];
        sig_arr.copy_from_slice(sig);
        let mut pub_arr = [0u8; crypto::SIGN_PUBLIC_SIZE];
        pub_arr.copy_from_slice(&self.public);
        crypto::verify_detached(&sig_arr, msg, &pub_arr)
    }
}

/// Construction parameters for a `Stack`. Grouped into one struct rather than a long positional
/// constructor, since the teacher's larger constructors (e.g. `neutronium::World`) favor
/// builder-style setup over many positional arguments.
pub struct StackOptions {
    pub name: String,
    pub ha: HostAddress,
    pub base_dir: PathBuf,
    pub config: Config,
    pub seed: Option<Vec<u8>>,
    pub listener_only: bool,
    pub restricted: bool,
}

type MsgHandler = Box<dyn FnMut(Value, String) + Send>;
type RejectHandler = Box<dyn FnMut(String, String) + Send>;
type ProcessHook = Box<dyn FnMut(Value) -> Option<Value> + Send>;

/// One node's messaging stack: simultaneously a CURVE-authenticated router listening for
/// inbound connections and a table of dealer sockets dialing known peers.
pub struct Stack {
    name: String,
    ha: HostAddress,
    config: Config,
    log: Logger,

    msg_handler: MsgHandler,
    reject_handler: RejectHandler,
    process_hook: ProcessHook,

    home_dir: PathBuf,
    public_dir: PathBuf,
    secret_dir: PathBuf,
    verif_dir: PathBuf,
    sig_dir: PathBuf,

    sign_public: Vec<u8>,
    enc_public: Vec<u8>,
    enc_secret: Vec<u8>,

    verifiers: HashbrownMap<Vec<u8>, Verifier>,

    listener_only: bool,
    restricted: bool,

    ctx: Option<zmq::Context>,
    listener: Option<zmq::Socket>,
    listener_endpoint: Option<String>,
    auth: Authenticator,

    remotes: HashMap<String, Remote>,
    remotes_by_keys: HashMap<Vec<u8>, String>,
    peers_without_remotes: HashSet<Vec<u8>>,

    rx_msgs: VecDeque<(String, Vec<u8>)>,
    last_heartbeat_at: Option<Instant>,
}

fn default_reject_handler(_reason: String, _from: String) {}
fn default_process_hook(msg: Value) -> Option<Value> {
    Some(msg)
}

impl Stack {
    /// Sets up the four key directories (generating local keys from `options.seed` if they
    /// don't exist yet), loads the local signing/encryption keypairs, and seeds `verifiers`
    /// with every signing key already known on disk plus the local one.
    pub fn new(options: StackOptions, msg_handler: MsgHandler, log: Logger) -> StackResult<Stack> {
        Self::with_handlers(
            options,
            msg_handler,
            Box::new(default_reject_handler),
            Box::new(default_process_hook),
            log,
        )
    }

    pub fn with_handlers(
        options: StackOptions,
        msg_handler: MsgHandler,
        reject_handler: RejectHandler,
        process_hook: ProcessHook,
        log: Logger,
    ) -> StackResult<Stack> {
        let home_dir = KeyStore::home_dir(&options.base_dir, &options.name);
        let public_dir = KeyStore::public_dir(&home_dir);
        let secret_dir = KeyStore::secret_dir(&home_dir);
        let verif_dir = KeyStore::verif_dir(&home_dir);
        let sig_dir = KeyStore::sig_dir(&home_dir);

        if !KeyStore::are_keys_setup(&options.name, &options.base_dir) {
            let seed = options.seed.as_deref().ok_or_else(|| {
                StackError::Crypto(format!("keys are not setup for {} and no seed was supplied", options.name))
            })?;
            info!(log, "signing and encryption keys not found, creating them"; "name" => &options.name);
            KeyStore::init_local_keys(&options.name, &options.base_dir, seed, false, &log)?;
        }

        let sign_public = KeyStore::load_public(&verif_dir, &options.name)?;
        let enc_public = KeyStore::load_public(&public_dir, &options.name)?;
        let enc_secret = KeyStore::load_secret(&secret_dir, &options.name)?;

        let mut verifiers = HashbrownMap::new();
        for verkey in KeyStore::load_all_public(&verif_dir) {
            verifiers.insert(verkey.clone(), Verifier::new(verkey));
        }

        Ok(Stack {
            name: options.name,
            ha: options.ha,
            config: options.config,
            log: log.clone(),
            msg_handler,
            reject_handler,
            process_hook,
            home_dir,
            public_dir,
            secret_dir,
            verif_dir,
            sig_dir,
            sign_public,
            enc_public,
            enc_secret,
            verifiers,
            listener_only: options.listener_only,
            restricted: options.restricted,
            ctx: None,
            listener: None,
            listener_endpoint: None,
            auth: Authenticator::new(log),
            remotes: HashMap::new(),
            remotes_by_keys: HashMap::new(),
            peers_without_remotes: HashSet::new(),
            rx_msgs: VecDeque::new(),
            last_heartbeat_at: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn is_started(&self) -> bool {
        self.listener.is_some()
    }

    pub fn enc_public_hex(&self) -> String {
        crypto::to_hex(&self.enc_public)
    }

    pub fn sign_public_hex(&self) -> String {
        crypto::to_hex(&self.sign_public)
    }

    // ---- lifecycle -----------------------------------------------------------------------

    /// Acquires the transport context, optionally caps its socket ceiling, starts the
    /// authenticator in the requested mode, then opens the listener.
    pub fn start(&mut self, restricted: Option<bool>) -> StackResult<()> {
        self.start_internal(restricted, false)
    }

    fn start_internal(&mut self, restricted: Option<bool>, force_auth: bool) -> StackResult<()> {
        let ctx = zmq::Context::new();
        if let Some(max) = self.config.max_sockets {
            ctx.set_max_sockets(max).map_err(zmq_err)?;
        }

        let restricted = restricted.unwrap_or(self.restricted);
        self.restricted = restricted;
        let allow_dir = if restricted { Some(self.public_dir.clone()) } else { None };
        self.auth.start(&ctx, restricted, allow_dir, force_auth)?;

        self.ctx = Some(ctx);
        self.open()?;

        info!(self.log, "stack started"; "name" => &self.name, "restricted" => restricted);
        Ok(())
    }

    fn open(&mut self) -> StackResult<()> {
        let ctx = self.ctx.as_ref().expect("ctx must be set before open");
        let listener = ctx.socket(zmq::SocketType::ROUTER).map_err(zmq_err)?;
        listener.set_curve_secretkey(&self.enc_secret).map_err(zmq_err)?;
        listener.set_curve_publickey(&self.enc_public).map_err(zmq_err)?;
        listener.set_curve_server(true).map_err(zmq_err)?;
        listener.set_identity(&self.enc_public).map_err(zmq_err)?;
        apply_common_options(&listener, &self.config)?;

        let endpoint = format!("{}://*:{}", self.config.network_protocol, self.ha.1);
        listener.bind(&endpoint).map_err(zmq_err)?;
        debug!(self.log, "listener bound"; "name" => &self.name, "endpoint" => &endpoint);

        self.listener_endpoint = Some(format!("{}://0.0.0.0:{}", self.config.network_protocol, self.ha.1));
        self.listener = Some(listener);
        Ok(())
    }

    /// Closes the listener, disconnects every remote, clears the remotes table and the
    /// by-key index, clears the inbound-identity set, and stops the authenticator.
    pub fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            if let Some(endpoint) = self.listener_endpoint.take() {
                let _ = listener.unbind(&endpoint);
            }
            let _ = listener.set_linger(0);
            drop(listener);
        }

        for (_, mut remote) in self.remotes.drain() {
            remote.disconnect();
        }
        self.remotes_by_keys.clear();
        self.peers_without_remotes.clear();

        self.auth.stop();
        self.ctx = None;

        info!(self.log, "stack stopped"; "name" => &self.name);
    }

    /// If `restricted` actually changes, stops the stack, briefly pauses to let the bound
    /// port release, then restarts with the authenticator forced to (re)initialize.
    pub fn set_restricted(&mut self, restricted: bool) -> StackResult<()> {
        if self.restricted == restricted {
            return Ok(());
        }
        debug!(self.log, "changing restricted mode"; "name" => &self.name, "restricted" => restricted);
        self.stop();
        thread::sleep(Duration::from_millis(200));
        self.start_internal(Some(restricted), true)
    }

    // ---- remote management ----------------------------------------------------------------

    pub fn add_remote(&mut self, name: &str, ha: HostAddress, verkey: Option<Vec<u8>>, pubkey: Vec<u8>) -> u64 {
        if let Some(old) = self.remotes.remove(name) {
            self.remotes_by_keys.remove(&old.pubkey);
        }

        match &verkey {
            Some(vk) => {
                self.verifiers.insert(vk.clone(), Verifier::new(vk.clone()));
            }
            None => debug!(self.log, "adding remote without a verkey"; "name" => name),
        }

        let remote = Remote::new(name.to_string(), ha, verkey, pubkey.clone());
        let uid = remote.uid;
        self.remotes_by_keys.insert(pubkey, name.to_string());
        self.remotes.insert(name.to_string(), remote);
        uid
    }

    /// Reuses the existing remote by that name, or loads any missing keys from disk and adds
    /// one. Fails with `InsufficientConnectInfo` when the address, encryption key, or (in
    /// restricted mode) verify key cannot be supplied. Sends an initial ping after connecting.
    pub fn connect_to(
        &mut self,
        name: &str,
        ha: Option<HostAddress>,
        verkey_raw: Option<Vec<u8>>,
        pubkey_raw: Option<Vec<u8>>,
    ) -> StackResult<u64> {
        if !self.remotes.contains_key(name) {
            let pubkey = pubkey_raw.or_else(|| KeyStore::load_public(&self.public_dir, name).ok());
            let verkey = verkey_raw.or_else(|| KeyStore::load_public(&self.verif_dir, name).ok());

            let (ha, pubkey) = match (ha, pubkey) {
                (Some(ha), Some(pubkey)) if !(self.restricted && verkey.is_none()) => (ha, pubkey),
                _ => return Err(StackError::InsufficientConnectInfo { remote: name.to_string() }),
            };

            self.add_remote(name, ha, verkey, pubkey);
        }

        let ctx = self.ctx.clone().ok_or_else(|| StackError::Transport("stack not started".to_string()))?;
        let (enc_public, enc_secret) = (self.enc_public.clone(), self.enc_secret.clone());
        let log = self.log.clone();
        let config = self.config.clone();

        let remote = self.remotes.get_mut(name).expect("remote was just added or already present");
        remote.connect(&ctx, &enc_public, &enc_secret, &config, &log)?;
        let uid = remote.uid;
        let (host, port) = remote.ha.clone();

        info!(self.log, "looking for remote"; "name" => &self.name, "remote" => name, "host" => &host, "port" => port);
        self.send_ping_pong(PingTarget::Name(name.to_string()), true);
        Ok(uid)
    }

    /// Disconnect then connect then ping.
    pub fn reconnect_remote(&mut self, name: &str) -> StackResult<()> {
        let ctx = self.ctx.clone().ok_or_else(|| StackError::Transport("stack not started".to_string()))?;
        let (enc_public, enc_secret) = (self.enc_public.clone(), self.enc_secret.clone());
        let log = self.log.clone();
        let config = self.config.clone();

        let remote = self
            .remotes
            .get_mut(name)
            .ok_or_else(|| StackError::InsufficientConnectInfo { remote: name.to_string() })?;

        debug!(self.log, "reconnecting to remote"; "name" => &self.name, "remote" => name);
        remote.disconnect();
        remote.connect(&ctx, &enc_public, &enc_secret, &config, &log)?;

        self.send_ping_pong(PingTarget::Name(name.to_string()), true);
        Ok(())
    }

    /// Looks up and disconnects the remote by name. Returns `None` if unknown.
    pub fn disconnect_by_name(&mut self, name: &str) -> bool {
        match self.remotes.get_mut(name) {
            Some(remote) => {
                remote.disconnect();
                true
            }
            None => {
                debug!(self.log, "no remote to disconnect"; "name" => &self.name, "target" => name);
                false
            }
        }
    }

    /// Drops the remote from both indices and from `verifiers`.
    pub fn remove_remote(&mut self, name: &str) -> Option<Remote> {
        let remote = self.remotes.remove(name)?;
        self.remotes_by_keys.remove(&remote.pubkey);
        if let Some(vk) = &remote.verkey {
            self.verifiers.remove(vk);
        }
        Some(remote)
    }

    pub fn has_remote(&self, name: &str) -> bool {
        self.remotes.contains_key(name)
    }

    /// True iff `identity` has been seen inbound without a matching `Remote`. Populated during
    /// listener drain regardless of mode; only consulted for routing in listener-only mode.
    pub fn has_peer_identity(&self, identity: &[u8]) -> bool {
        self.peers_without_remotes.contains(identity)
    }

    /// In listener-only mode `name` is the hex encoding of a raw listener identity (see
    /// `PingTarget::Identity`); otherwise it is a registered remote's name.
    pub fn is_connected_to(&self, name: &str) -> bool {
        if self.listener_only {
            return hex::decode(name).map(|ident| self.has_peer_identity(&ident)).unwrap_or(false);
        }
        self.remotes.get(name).map(Remote::is_connected).unwrap_or(false)
    }

    /// In listener-only mode, removes the hex-identity `name` from `peers_without_remotes`;
    /// otherwise removes the named remote outright.
    pub fn remove_remote_by_name(&mut self, name: &str) -> bool {
        if self.listener_only {
            return hex::decode(name).map(|ident| self.peers_without_remotes.remove(&ident)).unwrap_or(false);
        }
        self.remove_remote(name).is_some()
    }

    pub fn get_ha(&self, name: &str) -> Option<HostAddress> {
        if self.listener_only {
            return None;
        }
        self.remotes.get(name).map(|r| r.ha.clone())
    }

    pub fn remote_uid(&self, name: &str) -> Option<u64> {
        self.remotes.get(name).map(|r| r.uid)
    }

    /// Verifies a detached signature against a known peer's signing key, exactly as
    /// `ZStack.verify` did. In key-sharing mode (unrestricted) every message is accepted
    /// without a signature check, since no verify key is guaranteed to be on file.
    pub fn verify(&self, msg: &[u8], sig: &[u8], by_identity: &[u8]) -> bool {
        if !self.restricted {
            return true;
        }
        let name = match self.remotes_by_keys.get(by_identity) {
            Some(name) => name,
            None => return false,
        };
        let verkey = match self.remotes.get(name).and_then(|r| r.verkey.as_ref()) {
            Some(vk) => vk,
            None => return false,
        };
        match self.verifiers.get(verkey) {
            Some(verifier) => verifier.verify(msg, sig),
            None => false,
        }
    }

    // ---- receive pipeline ------------------------------------------------------------------

    /// The single externally driven tick: emits heartbeats if due, drains the listener and
    /// every live remote socket under quota, then processes up to `limit` queued frames.
    pub fn service(&mut self, limit: Option<usize>) -> usize {
        if self.listener.is_none() {
            debug!(self.log, "service called on a stopped stack"; "name" => &self.name);
            return 0;
        }

        self.maybe_send_heartbeats();
        self.drain_listener(self.config.default_listener_quota);
        self.drain_remotes(self.config.default_sender_quota);

        if self.rx_msgs.is_empty() {
            return 0;
        }
        self.process_received(limit.unwrap_or(usize::MAX))
    }

    fn maybe_send_heartbeats(&mut self) {
        if !self.config.enable_heartbeats {
            return;
        }
        let now = Instant::now();
        let interval = Duration::from_secs_f64(self.config.heartbeat_freq_secs);
        if interval_elapsed(now, self.last_heartbeat_at, interval) {
            self.send_heartbeats();
            self.last_heartbeat_at = Some(now);
        }
    }

    fn send_heartbeats(&mut self) {
        debug!(self.log, "sending heartbeat to all remotes"; "name" => &self.name);
        let names: Vec<String> = self.remotes.keys().cloned().collect();
        for name in names {
            self.send_ping_pong(PingTarget::Name(name), true);
        }
    }

    fn drain_listener(&mut self, quota: usize) -> usize {
        let mut count = 0;
        while count < quota {
            let frames = {
                let listener = match &self.listener {
                    Some(listener) => listener,
                    None => break,
                };
                match listener.recv_multipart(zmq::DONTWAIT) {
                    Ok(frames) => frames,
                    Err(zmq::Error::EAGAIN) => break,
                    Err(err) => {
                        warn!(self.log, "listener recv failed"; "name" => &self.name, "error" => %err);
                        break;
                    }
                }
            };

            if frames.len() < 2 {
                continue;
            }
            let identity = frames[0].clone();
            let payload = &frames[1];
            if payload.is_empty() {
                // Router probing sends an empty message on connection; skip, doesn't count.
                continue;
            }
            count += 1;

            if !self.remotes_by_keys.contains_key(&identity) {
                self.peers_without_remotes.insert(identity.clone());
            }
            self.verify_and_enqueue(payload, identity);
        }

        if count > 0 {
            trace!(self.log, "drained listener"; "name" => &self.name, "count" => count);
        }
        count
    }

    fn drain_remotes(&mut self, quota: usize) -> usize {
        let mut total = 0;
        let names: Vec<String> = self.remotes.keys().cloned().collect();

        for name in names {
            let identity = match self.remotes.get(&name) {
                Some(remote) => remote.pubkey.clone(),
                None => continue,
            };

            let mut count = 0;
            while count < quota {
                let frames = {
                    let socket = match self.remotes.get(&name).and_then(Remote::socket) {
                        Some(socket) => socket,
                        None => break,
                    };
                    match socket.recv_multipart(zmq::DONTWAIT) {
                        Ok(frames) => frames,
                        Err(zmq::Error::EAGAIN) => break,
                        Err(err) => {
                            warn!(self.log, "remote recv failed"; "name" => &self.name, "remote" => &name, "error" => %err);
                            break;
                        }
                    }
                };

                let payload = match frames.into_iter().next() {
                    Some(payload) => payload,
                    None => continue,
                };
                if payload.is_empty() {
                    continue;
                }
                count += 1;
                self.verify_and_enqueue(&payload, identity.clone());
            }

            if count > 0 {
                trace!(self.log, "drained remote"; "name" => &self.name, "remote" => &name, "count" => count);
            }
            total += count;
        }
        total
    }

    fn verify_and_enqueue(&mut self, msg: &[u8], ident: Vec<u8>) {
        if pipeline::validate_len(msg, self.config.msg_len_limit).is_err() {
            let reason = format!("message exceeds length limit of {} bytes", self.config.msg_len_limit);
            let frm = self.remote_name_for(&ident);
            warn!(self.log, "message discarded"; "name" => &self.name, "from" => &frm, "reason" => &reason);
            (self.reject_handler)(reason, frm);
            return;
        }

        match pipeline::decode_text(msg) {
            Ok(text) => self.rx_msgs.push_back((text, ident)),
            Err(_) => {
                let reason = "payload is not valid UTF-8".to_string();
                let frm = self.remote_name_for(&ident);
                warn!(self.log, "message discarded"; "name" => &self.name, "from" => &frm, "reason" => &reason);
                (self.reject_handler)(reason, frm);
            }
        }
    }

    fn remote_name_for(&self, ident: &[u8]) -> String {
        match self.remotes_by_keys.get(ident) {
            Some(name) => name.clone(),
            None => hex::encode(ident),
        }
    }

    /// Pops up to `limit` queued frames. Ping/pong frames are filtered here and never reach
    /// the external handler; surviving JSON payloads are handed to `process_hook` and then,
    /// if it doesn't swallow the message, to the message handler.
    fn process_received(&mut self, limit: usize) -> usize {
        let mut processed = 0;
        while processed < limit {
            let (text, ident) = match self.rx_msgs.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            processed += 1;

            let frm = self.remote_name_for(&ident);
            let target = match self.remotes_by_keys.get(&ident) {
                Some(name) => PingTarget::Name(name.clone()),
                None => PingTarget::Identity(ident.clone()),
            };

            if text == pipeline::PING {
                debug!(self.log, "got ping"; "name" => &self.name, "from" => &frm);
                self.send_ping_pong(target, false);
                continue;
            }
            if text == pipeline::PONG {
                if let Some(name) = self.remotes_by_keys.get(&ident) {
                    if let Some(remote) = self.remotes.get(name) {
                        remote.set_connected();
                    }
                }
                debug!(self.log, "got pong"; "name" => &self.name, "from" => &frm);
                continue;
            }

            let decoded = match pipeline::deserialize_json(&text) {
                Ok(value) => value,
                Err(err) => {
                    error!(self.log, "json decode failed"; "name" => &self.name, "from" => &frm, "error" => %err);
                    continue;
                }
            };

            if let Some(msg) = (self.process_hook)(decoded) {
                (self.msg_handler)(msg, frm);
            }
        }
        processed
    }

    // ---- send path -----------------------------------------------------------------------

    /// `ha` is accepted for API compatibility with the original `send(msg, remoteName, ha)`
    /// signature but, as in the source this generalizes, never consulted.
    pub fn send(&mut self, payload: Payload<'_>, remote_name: Option<&str>, _ha: Option<HostAddress>) -> (bool, Option<String>) {
        if self.listener_only {
            let name = match remote_name {
                Some(name) => name,
                None => return (false, None),
            };
            let bytes = match pipeline::serialize(payload, self.config.msg_len_limit) {
                Ok(bytes) => bytes,
                Err(err) => return (false, Some(err.to_string())),
            };
            return self.transmit_through_listener(&bytes, name.as_bytes());
        }

        match remote_name {
            None => self.broadcast(payload),
            Some(name) => match pipeline::serialize(payload, self.config.msg_len_limit) {
                Ok(bytes) => self.transmit(&bytes, name),
                Err(err) => (false, Some(err.to_string())),
            },
        }
    }

    fn broadcast(&mut self, payload: Payload<'_>) -> (bool, Option<String>) {
        let bytes = match pipeline::serialize(payload, self.config.msg_len_limit) {
            Ok(bytes) => bytes,
            Err(err) => {
                let msg = err.to_string();
                error!(self.log, "broadcast serialize failed"; "name" => &self.name, "error" => &msg);
                return (false, Some(msg));
            }
        };

        let names: Vec<String> = self.remotes.keys().cloned().collect();
        let mut all_ok = true;
        let mut errors = Vec::new();
        for name in names {
            let (ok, err) = self.transmit(&bytes, &name);
            all_ok &= ok;
            if let Some(err) = err {
                errors.push(err);
            }
        }
        let joined = if errors.is_empty() { None } else { Some(errors.join("\n")) };
        (all_ok, joined)
    }

    fn transmit(&mut self, bytes: &[u8], name: &str) -> (bool, Option<String>) {
        let remote = match self.remotes.get(name) {
            Some(remote) => remote,
            None => {
                debug!(self.log, "remote does not exist"; "name" => &self.name, "target" => name);
                return (false, None);
            }
        };
        let socket = match remote.socket() {
            Some(socket) => socket,
            None => {
                debug!(self.log, "uninitialised socket for remote"; "name" => &self.name, "target" => name);
                return (false, Some(format!("{} has no initialized socket", name)));
            }
        };

        match socket.send(bytes, zmq::DONTWAIT) {
            Ok(()) => {
                debug!(self.log, "transmitted message"; "name" => &self.name, "to" => name);
                if !remote.is_connected() && !pipeline::is_health_message(bytes) {
                    warn!(
                        self.log,
                        "remote not connected - message will not be sent immediately";
                        "name" => &self.name, "to" => name
                    );
                }
                (true, None)
            }
            Err(zmq::Error::EAGAIN) => {
                debug!(self.log, "could not transmit, would block"; "name" => &self.name, "to" => name);
                (false, None)
            }
            Err(err) => {
                let msg = format!("got error {} while transmitting to {}", err, name);
                error!(self.log, "transmit failed"; "name" => &self.name, "to" => name, "error" => %err);
                (false, Some(msg))
            }
        }
    }

    fn transmit_through_listener(&mut self, bytes: &[u8], ident: &[u8]) -> (bool, Option<String>) {
        if !self.peers_without_remotes.contains(ident) {
            debug!(
                self.log,
                "not sending through listener to a peer we don't have an identity for";
                "name" => &self.name, "identity" => hex::encode(ident)
            );
            return (false, None);
        }
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return (false, None),
        };

        match listener.send_multipart([ident, bytes], zmq::DONTWAIT) {
            Ok(()) => {
                trace!(self.log, "transmitted via listener"; "name" => &self.name, "identity" => hex::encode(ident));
                (true, None)
            }
            Err(zmq::Error::EAGAIN) => (false, None),
            Err(err) => {
                let msg = format!("got error {} while sending through listener", err);
                error!(self.log, "listener transmit failed"; "name" => &self.name, "error" => %err);
                (false, Some(msg))
            }
        }
    }

    /// Tri-state return value: `Some(true)` transmitted, `Some(false)` the transport refused,
    /// `None` reserved for a deferred/batched send this implementation never produces (see
    /// SPEC_FULL.md 4.8 and DESIGN.md). Callers, including the heartbeat broadcaster, treat
    /// any non-`Some(true)` result as acceptable and move on.
    fn send_ping_pong(&mut self, target: PingTarget, is_ping: bool) -> Option<bool> {
        let msg: &[u8] = if is_ping { pipeline::PING.as_bytes() } else { pipeline::PONG.as_bytes() };
        let action = if is_ping { "ping" } else { "pong" };

        let (ok, err, label) = match target {
            PingTarget::Name(name) => {
                let (ok, err) = self.transmit(msg, &name);
                (ok, err, name)
            }
            PingTarget::Identity(ident) => {
                let (ok, err) = self.transmit_through_listener(msg, &ident);
                (ok, err, hex::encode(&ident))
            }
        };

        if ok {
            debug!(self.log, "sent health message"; "name" => &self.name, "action" => action, "to" => &label);
        } else {
            debug!(
                self.log, "failed to send health message";
                "name" => &self.name, "action" => action, "to" => &label, "error" => err.unwrap_or_default()
            );
        }
        Some(ok)
    }

    // ---- static key-management helpers (delegate to KeyStore) ----------------------------

    pub fn init_local_keys(name: &str, base: &Path, seed: &[u8], override_: bool, log: &Logger) -> StackResult<(String, String)> {
        KeyStore::init_local_keys(name, base, seed, override_, log)
    }

    pub fn are_keys_setup(name: &str, base: &Path) -> bool {
        KeyStore::are_keys_setup(name, base)
    }

    pub fn clear_local_role_keep(&self) {
        KeyStore::clear_local_role_keep(&self.name, &self.home_dir_base(), &self.log)
    }

    pub fn clear_remote_role_keeps(&self) {
        KeyStore::clear_remote_role_keeps(&self.name, &self.home_dir_base(), &self.log)
    }

    pub fn clear_all(&self) {
        KeyStore::clear_all(&self.name, &self.home_dir_base(), &self.log)
    }

    fn home_dir_base(&self) -> PathBuf {
        self.home_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| self.home_dir.clone())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if self.is_started() {
            self.stop();
        }
    }
}
