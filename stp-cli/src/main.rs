//! Node runner for the secure messaging stack. Two subcommands: `init-keys` provisions a
//! node's signing/encryption keypairs on disk (mirroring `gen_keys.rs`'s one-shot key
//! generation), and `run` starts a `Stack`, dials any peers given on the command line, and
//! drives `service` in a loop (mirroring the authenticator service's `main` in shape, minus
//! the web framework: load config, init logging, run).

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};

use stp_core::config::Config;
use stp_core::logging;
use stp_net::{HostAddress, KeyStore, Stack, StackOptions};

fn main() {
    let matches = App::new("Stack Node")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs a secure peer-messaging stack node.")
        .subcommand(
            App::new("init-keys")
                .about("Generates a node's signing and encryption keypairs")
                .arg(Arg::with_name("BASE").help("Key home base directory").required(true))
                .arg(Arg::with_name("NAME").help("Node name").required(true))
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .takes_value(true)
                        .help("Hex-encoded seed (random if omitted)"),
                ),
        )
        .subcommand(
            App::new("run")
                .about("Starts the stack and services it until interrupted")
                .arg(Arg::with_name("BASE").help("Key home base directory").required(true))
                .arg(Arg::with_name("NAME").help("Node name").required(true))
                .arg(Arg::with_name("HOST").help("Listener bind host").required(true))
                .arg(Arg::with_name("PORT").help("Listener bind port").required(true))
                .arg(
                    Arg::with_name("config")
                        .long("config")
                        .takes_value(true)
                        .help("Path to a TOML config file (defaults applied otherwise)"),
                )
                .arg(Arg::with_name("restricted").long("restricted").help("Only accept known peers"))
                .arg(
                    Arg::with_name("listener-only")
                        .long("listener-only")
                        .help("Route sends through the listener instead of outbound remotes"),
                )
                .arg(
                    Arg::with_name("connect")
                        .long("connect")
                        .takes_value(true)
                        .multiple(true)
                        .help("Peer to dial, as name@host:port (repeatable)"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("init-keys", Some(sub)) => run_init_keys(sub),
        ("run", Some(sub)) => run_node(sub),
        _ => {
            eprintln!("{}", matches.usage());
            std::process::exit(1);
        }
    }
}

fn run_init_keys(matches: &clap::ArgMatches) {
    let base = PathBuf::from(matches.value_of("BASE").unwrap());
    let name = matches.value_of("NAME").unwrap();
    let log = logging::discard();

    let seed = match matches.value_of("seed") {
        Some(hex_seed) => stp_core::crypto::from_hex(hex_seed).expect("seed must be valid hex"),
        None => {
            let mut buf = vec![0u8; stp_core::crypto::SEED_SIZE];
            stp_core::crypto::random_bytes(&mut buf);
            buf
        }
    };

    let (enc_pub, sign_pub) =
        KeyStore::init_local_keys(name, &base, &seed, false, &log).expect("key generation failed");

    println!("encryption public key: {}", enc_pub);
    println!("signing public key:    {}", sign_pub);
}

fn run_node(matches: &clap::ArgMatches) {
    let base = PathBuf::from(matches.value_of("BASE").unwrap());
    let name = matches.value_of("NAME").unwrap().to_string();
    let host = matches.value_of("HOST").unwrap().to_string();
    let port: u16 = matches.value_of("PORT").unwrap().parse().expect("PORT must be a valid port number");

    let config = match matches.value_of("config") {
        Some(path) => Config::load(path),
        None => Config::default(),
    };

    let log = logging::init("info");
    logging::info!(log, "starting stack node"; "name" => &name, "host" => &host, "port" => port);

    let options = StackOptions {
        name: name.clone(),
        ha: (host, port),
        base_dir: base,
        config,
        seed: None,
        listener_only: matches.is_present("listener-only"),
        restricted: matches.is_present("restricted"),
    };

    let handler_log = log.clone();
    let mut stack = Stack::new(
        options,
        Box::new(move |msg, from| {
            logging::info!(handler_log, "received message"; "from" => &from, "msg" => %msg);
        }),
        log.clone(),
    )
    .expect("failed to construct stack");

    stack.start(None).expect("failed to start stack");

    for spec in matches.values_of("connect").into_iter().flatten() {
        let (peer_name, ha) = parse_connect_spec(spec);
        match stack.connect_to(&peer_name, Some(ha), None, None) {
            Ok(_) => logging::info!(log, "dialing peer"; "peer" => &peer_name),
            Err(err) => logging::error!(log, "failed to dial peer"; "peer" => &peer_name, "error" => %err),
        }
    }

    loop {
        stack.service(None);
        thread::sleep(Duration::from_millis(50));
    }
}

fn parse_connect_spec(spec: &str) -> (String, HostAddress) {
    let (name, ha) = spec.split_once('@').expect("--connect expects name@host:port");
    let (host, port) = ha.rsplit_once(':').expect("--connect expects name@host:port");
    let port: u16 = port.parse().expect("--connect port must be numeric");
    (name.to_string(), (host.to_string(), port))
}
