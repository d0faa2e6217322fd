use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for one stack instance. Deserializable from TOML so an operator can ship a
/// config file alongside the node binary; every field has a default so a minimal (or empty)
/// file still produces a working configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Max frames pulled from the listener socket per `service` tick.
    pub default_listener_quota: usize,
    /// Max frames pulled from each remote's socket per `service` tick.
    pub default_sender_quota: usize,
    /// Inbound/outbound payload byte cap.
    pub msg_len_limit: usize,
    /// Optional ceiling on the transport context's socket count.
    pub max_sockets: Option<i32>,
    /// Whether the stack emits periodic pings to all remotes.
    pub enable_heartbeats: bool,
    /// Seconds between heartbeat bursts.
    pub heartbeat_freq_secs: f64,
    /// Whether sockets request TCP keepalive from the transport.
    pub keepalive: bool,
    /// ZMQ high-water-mark applied to every socket (listener and remote).
    pub zmq_internal_queue_length: i32,
    /// Reserved for a future per-message timeout. Not currently enforced; see DESIGN.md.
    pub message_timeout_secs: u64,
    /// Transport-level protocol used for the listener bind and remote dial endpoints.
    pub network_protocol: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            default_listener_quota: 1000,
            default_sender_quota: 1000,
            msg_len_limit: 262_144,
            max_sockets: None,
            enable_heartbeats: true,
            heartbeat_freq_secs: 30.0,
            keepalive: true,
            zmq_internal_queue_length: 1000,
            message_timeout_secs: 3,
            network_protocol: "tcp".to_string(),
        }
    }
}

impl Config {
    /// Loads a TOML configuration file, falling back to field-level defaults for anything
    /// the file omits. A missing or unparseable file is a hard startup error: the caller is
    /// not expected to run with a half-loaded configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Config {
        serdeconv::from_toml_file(path).expect("Error loading stack configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_listener_quota, 1000);
        assert_eq!(cfg.default_sender_quota, 1000);
        assert_eq!(cfg.msg_len_limit, 262_144);
        assert!(cfg.enable_heartbeats);
        assert_eq!(cfg.heartbeat_freq_secs, 30.0);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let partial: Config = toml_from_str("msg_len_limit = 64\n");
        assert_eq!(partial.msg_len_limit, 64);
        assert_eq!(partial.default_listener_quota, 1000);
    }

    fn toml_from_str(s: &str) -> Config {
        serdeconv::from_toml_str(s).expect("test toml should parse")
    }
}
