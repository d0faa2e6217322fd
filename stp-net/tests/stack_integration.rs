//! End-to-end scenarios driven over real loopback TCP sockets, one `tempfile::tempdir()` key
//! home per node. Mirrors the scenario list this crate's receive/send pipeline is built against:
//! ping/pong liveness, oversize rejection, restricted-mode authentication, partial-broadcast
//! failure, a restricted-mode flip, and heartbeat cadence.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;

use stp_core::config::Config;
use stp_core::logging::discard;
use stp_net::keystore::KeyMaterial;
use stp_net::pipeline::Payload;
use stp_net::{HostAddress, KeyStore, Stack, StackOptions};

type Captured = Arc<Mutex<Vec<(Value, String)>>>;
type Rejected = Arc<Mutex<Vec<(String, String)>>>;

fn provision(base: &Path, name: &str, seed_byte: u8) -> (String, String) {
    let seed = [seed_byte; stp_core::crypto::SEED_SIZE];
    KeyStore::init_local_keys(name, base, &seed, false, &discard()).unwrap()
}

fn link(base: &Path, local: &str, remote: &str, remote_sign_pub_hex: &str) {
    KeyStore::init_remote_keys(local, remote, base, KeyMaterial::Hex(remote_sign_pub_hex.to_string()), false).unwrap();
}

fn spawn_stack(
    base: &Path,
    name: &str,
    port: u16,
    restricted: bool,
    configure: impl FnOnce(&mut Config),
) -> (Stack, Captured, Rejected) {
    let mut config = Config::default();
    config.heartbeat_freq_secs = 3600.0;
    configure(&mut config);

    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let rejected: Rejected = Arc::new(Mutex::new(Vec::new()));
    let captured_handle = captured.clone();
    let rejected_handle = rejected.clone();

    let options = StackOptions {
        name: name.to_string(),
        ha: ("127.0.0.1".to_string(), port),
        base_dir: base.to_path_buf(),
        config,
        seed: None,
        listener_only: false,
        restricted,
    };

    let stack = Stack::with_handlers(
        options,
        Box::new(move |msg, from| captured_handle.lock().unwrap().push((msg, from))),
        Box::new(move |reason, from| rejected_handle.lock().unwrap().push((reason, from))),
        Box::new(Some),
        discard(),
    )
    .unwrap();

    (stack, captured, rejected)
}

fn settle(stacks: &mut [&mut Stack], rounds: usize) {
    for _ in 0..rounds {
        for stack in stacks.iter_mut() {
            stack.service(None);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn two_node_ping_pong_establishes_liveness() {
    let base = tempdir().unwrap();
    let (a_enc, a_sign) = provision(base.path(), "A", 1);
    let (b_enc, _b_sign) = provision(base.path(), "B", 2);
    link(base.path(), "A", "B", &provision(base.path(), "B", 2).1);
    link(base.path(), "B", "A", &a_sign);
    let _ = b_enc;

    let (mut a, _, _) = spawn_stack(base.path(), "A", 29001, false, |_| {});
    let (mut b, _, _) = spawn_stack(base.path(), "B", 29002, false, |_| {});

    b.start(Some(false)).unwrap();
    a.start(Some(false)).unwrap();

    a.connect_to("B", Some(("127.0.0.1".to_string(), 29002)), None, None).unwrap();

    settle(&mut [&mut a, &mut b], 6);

    assert!(a.is_connected_to("B"));
    let a_identity = hex::decode(&a_enc).unwrap();
    assert!(b.has_peer_identity(&a_identity));

    a.stop();
    b.stop();
}

#[test]
fn oversize_payload_is_rejected_before_reaching_the_wire() {
    let base = tempdir().unwrap();
    let (_a_enc, a_sign) = provision(base.path(), "A", 3);
    let (_b_enc, b_sign) = provision(base.path(), "B", 4);
    link(base.path(), "A", "B", &b_sign);
    link(base.path(), "B", "A", &a_sign);

    let (mut a, _, _) = spawn_stack(base.path(), "A", 29011, false, |c| c.msg_len_limit = 64);
    let (mut b, _, b_rejected) = spawn_stack(base.path(), "B", 29012, false, |c| c.msg_len_limit = 64);

    b.start(Some(false)).unwrap();
    a.start(Some(false)).unwrap();
    a.connect_to("B", Some(("127.0.0.1".to_string(), 29012)), None, None).unwrap();
    settle(&mut [&mut a, &mut b], 4);

    let big = json!({ "data": "x".repeat(200) });
    let (ok, err) = a.send(Payload::Json(&big), Some("B"), None);
    assert!(!ok);
    assert!(err.unwrap().contains("Cannot send message"));

    settle(&mut [&mut a, &mut b], 2);
    assert!(b_rejected.lock().unwrap().is_empty());

    a.stop();
    b.stop();
}

#[test]
fn restricted_mode_drops_frames_from_an_unknown_peer() {
    let base = tempdir().unwrap();
    let (_a_enc, _a_sign) = provision(base.path(), "A", 5);
    let (_c_enc, c_sign) = provision(base.path(), "C", 6);
    // A never learns C's key: restricted mode's allowlist is the public_keys dir, which C's
    // encryption key was never written into.
    let _ = c_sign;

    let (mut a, a_captured, _) = spawn_stack(base.path(), "A", 29021, true, |_| {});
    a.start(Some(true)).unwrap();

    let (mut c, _, _) = spawn_stack(base.path(), "C", 29022, false, |_| {});
    c.start(Some(false)).unwrap();

    let a_pubkey = KeyStore::load_public(&base.path().join("A").join("public_keys"), "A");
    let _ = a_pubkey;
    // C dials A's address directly, pinning A's curve key by hand, since KeyStore has no entry
    // for A on C's side in this scenario either; the handshake must fail at ZAP regardless.
    let ha: HostAddress = ("127.0.0.1".to_string(), 29021);
    let _ = c.connect_to("A", Some(ha), None, Some(vec![0u8; 32]));

    settle(&mut [&mut a, &mut c], 6);

    assert!(a_captured.lock().unwrap().is_empty());

    a.stop();
    c.stop();
}

#[test]
fn broadcast_reaches_live_remotes_despite_one_failure() {
    let base = tempdir().unwrap();
    let (_a_enc, a_sign) = provision(base.path(), "A", 7);
    let (_b_enc, b_sign) = provision(base.path(), "B", 8);
    link(base.path(), "A", "B", &b_sign);
    link(base.path(), "B", "A", &a_sign);

    let (mut a, _, _) = spawn_stack(base.path(), "A", 29031, false, |_| {});
    let (mut b, b_captured, _) = spawn_stack(base.path(), "B", 29032, false, |_| {});

    b.start(Some(false)).unwrap();
    a.start(Some(false)).unwrap();
    a.connect_to("B", Some(("127.0.0.1".to_string(), 29032)), None, None).unwrap();
    settle(&mut [&mut a, &mut b], 4);

    // D is registered but never connected: its socket stays uninitialised.
    a.add_remote("D", ("127.0.0.1".to_string(), 29033), None, vec![9u8; 32]);

    let (ok, err) = a.send(Payload::Json(&json!({"x": 1})), None, None);
    assert!(!ok);
    assert!(err.is_some());

    settle(&mut [&mut a, &mut b], 3);
    let msgs = b_captured.lock().unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].0, json!({"x": 1}));

    drop(msgs);
    a.stop();
    b.stop();
}

#[test]
fn set_restricted_flips_authenticator_mode_and_drops_remotes() {
    let base = tempdir().unwrap();
    let (_a_enc, a_sign) = provision(base.path(), "A", 11);
    let (_b_enc, b_sign) = provision(base.path(), "B", 12);
    link(base.path(), "A", "B", &b_sign);
    link(base.path(), "B", "A", &a_sign);

    let (mut a, _, _) = spawn_stack(base.path(), "A", 29041, false, |_| {});
    let (mut b, _, _) = spawn_stack(base.path(), "B", 29042, false, |_| {});

    b.start(Some(false)).unwrap();
    a.start(Some(false)).unwrap();
    assert!(!a.is_restricted());

    a.connect_to("B", Some(("127.0.0.1".to_string(), 29042)), None, None).unwrap();
    settle(&mut [&mut a, &mut b], 4);
    assert!(a.is_connected_to("B"));

    a.set_restricted(true).unwrap();
    assert!(a.is_restricted());
    assert!(!a.has_remote("B"));

    a.stop();
    b.stop();
}

#[test]
fn heartbeats_fire_once_per_elapsed_interval() {
    let base = tempdir().unwrap();
    let (_a_enc, a_sign) = provision(base.path(), "A", 13);
    let (_b_enc, b_sign) = provision(base.path(), "B", 14);
    link(base.path(), "A", "B", &b_sign);
    link(base.path(), "B", "A", &a_sign);

    let (mut a, _, _) = spawn_stack(base.path(), "A", 29051, false, |c| c.heartbeat_freq_secs = 0.1);
    let (mut b, _, _) = spawn_stack(base.path(), "B", 29052, false, |_| {});

    b.start(Some(false)).unwrap();
    a.start(Some(false)).unwrap();
    a.connect_to("B", Some(("127.0.0.1".to_string(), 29052)), None, None).unwrap();

    settle(&mut [&mut a, &mut b], 3);
    thread::sleep(Duration::from_millis(150));
    a.service(None);
    b.service(None);

    assert!(a.is_connected_to("B"));

    a.stop();
    b.stop();
}
