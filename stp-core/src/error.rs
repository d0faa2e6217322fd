use std::fmt;
use std::io;

/// Result alias used throughout the stack.
pub type StackResult<T> = Result<T, StackError>;

/// The typed error hierarchy for the stack. Variants split into three groups: conditions a
/// caller is expected to branch on (`WouldBlock`, `KeyNotFound`, `InsufficientConnectInfo`),
/// hard failures that abort the current operation, and the single fatal programming error
/// (`AuthAlreadyRunning`).
#[derive(Debug)]
pub enum StackError {
    /// Non-blocking socket operation would have blocked (EAGAIN).
    WouldBlock,
    /// A key file was missing or malformed on disk.
    KeyNotFound { dir: String, name: String },
    /// A payload exceeded the configured length limit.
    MessageTooLarge { len: usize, limit: usize },
    /// Inbound payload was not valid UTF-8.
    Utf8Decode,
    /// Inbound payload did not parse as JSON.
    JsonDecode(String),
    /// `connect_to` was missing a host address, encryption key, or (in restricted mode)
    /// a verify key.
    InsufficientConnectInfo { remote: String },
    /// The authenticator was started twice without `force`.
    AuthAlreadyRunning,
    /// A transport-level socket error.
    Transport(String),
    /// Underlying crypto primitive failed (bad seed, bad key length, signature mismatch).
    Crypto(String),
    /// Filesystem I/O failure.
    Io(io::Error),
    /// Hostname/address failed to parse.
    AddrParse(String),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::WouldBlock => write!(f, "operation would block"),
            StackError::KeyNotFound { dir, name } => {
                write!(f, "key not found for {} in {}", name, dir)
            }
            StackError::MessageTooLarge { len, limit } => {
                write!(f, "Cannot send message. Message length {} exceeds limit {}", len, limit)
            }
            StackError::Utf8Decode => write!(f, "payload is not valid UTF-8"),
            StackError::JsonDecode(reason) => write!(f, "JSON decode failed: {}", reason),
            StackError::InsufficientConnectInfo { remote } => write!(
                f,
                "{} doesn't have enough info to connect. Need ha, public key and verkey",
                remote
            ),
            StackError::AuthAlreadyRunning => write!(f, "authenticator already running"),
            StackError::Transport(reason) => write!(f, "transport error: {}", reason),
            StackError::Crypto(reason) => write!(f, "crypto error: {}", reason),
            StackError::Io(err) => write!(f, "io error: {}", err),
            StackError::AddrParse(reason) => write!(f, "address parse error: {}", reason),
        }
    }
}

impl std::error::Error for StackError {}

impl From<io::Error> for StackError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => StackError::WouldBlock,
            _ => StackError::Io(err),
        }
    }
}
