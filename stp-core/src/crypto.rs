//! Signing (ed25519) and encryption (curve25519) key material, plus the libsodium glue that
//! derives one from the other. Generalizes `flux::crypto`, which only ever needed a
//! ChaCha20-Poly1305 AEAD for session tokens, to the signing + curve-conversion primitives a
//! CURVE-authenticated peer stack needs. The actual CURVE handshake and wire encryption are
//! delegated to the transport library (`zmq`); this module only produces the key bytes it
//! consumes.

use crate::error::{StackError, StackResult};
use ctor::ctor;
use std::os::raw::c_ulonglong;

pub const SEED_SIZE: usize = libsodium_sys::crypto_sign_ed25519_SEEDBYTES as usize;
pub const SIGN_PUBLIC_SIZE: usize = libsodium_sys::crypto_sign_ed25519_PUBLICKEYBYTES as usize;
pub const SIGN_SECRET_SIZE: usize = libsodium_sys::crypto_sign_ed25519_SECRETKEYBYTES as usize;
pub const SIGNATURE_SIZE: usize = libsodium_sys::crypto_sign_ed25519_BYTES as usize;
pub const CURVE_PUBLIC_SIZE: usize = libsodium_sys::crypto_scalarmult_curve25519_BYTES as usize;
pub const CURVE_SECRET_SIZE: usize = libsodium_sys::crypto_scalarmult_curve25519_BYTES as usize;

/// Initializes the sodium infrastructure exactly once before any other call in this crate runs.
#[ctor]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed");
        }
    }
}

/// A node's long-term ed25519 signing keypair.
pub struct SigningKeypair {
    pub public: [u8; SIGN_PUBLIC_SIZE],
    pub secret: [u8; SIGN_SECRET_SIZE],
}

/// A node's short-term curve25519 encryption keypair, used directly as CURVE key material by
/// the transport and, per the data model, also as the node's socket identity.
pub struct EncryptionKeypair {
    pub public: [u8; CURVE_PUBLIC_SIZE],
    pub secret: [u8; CURVE_SECRET_SIZE],
}

/// Derives a signing keypair deterministically from a seed. Per the data model invariant, if
/// the on-disk secret keys are absent a seed must be supplied and both keypairs are generated
/// from it.
pub fn sign_keypair_from_seed(seed: &[u8]) -> StackResult<SigningKeypair> {
    if seed.len() != SEED_SIZE {
        return Err(StackError::Crypto(format!(
            "seed must be {} bytes, got {}",
            SEED_SIZE,
            seed.len()
        )));
    }

    let mut public = [0u8; SIGN_PUBLIC_SIZE];
    let mut secret = [0u8; SIGN_SECRET_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_sign_ed25519_seed_keypair(
            public.as_mut_ptr(),
            secret.as_mut_ptr(),
            seed.as_ptr(),
        )
    };

    if result != 0 {
        return Err(StackError::Crypto("seed keypair generation failed".into()));
    }

    Ok(SigningKeypair { public, secret })
}

/// Converts an ed25519 signing public key into its curve25519 encryption counterpart, exactly
/// as invariant (3) of the data model requires.
pub fn sign_public_to_curve(public: &[u8; SIGN_PUBLIC_SIZE]) -> StackResult<[u8; CURVE_PUBLIC_SIZE]> {
    let mut curve_public = [0u8; CURVE_PUBLIC_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_sign_ed25519_pk_to_curve25519(curve_public.as_mut_ptr(), public.as_ptr())
    };

    if result != 0 {
        return Err(StackError::Crypto("public key conversion failed".into()));
    }

    Ok(curve_public)
}

/// Converts an ed25519 signing secret key into its curve25519 encryption counterpart.
pub fn sign_secret_to_curve(secret: &[u8; SIGN_SECRET_SIZE]) -> StackResult<[u8; CURVE_SECRET_SIZE]> {
    let mut curve_secret = [0u8; CURVE_SECRET_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_sign_ed25519_sk_to_curve25519(curve_secret.as_mut_ptr(), secret.as_ptr())
    };

    if result != 0 {
        return Err(StackError::Crypto("secret key conversion failed".into()));
    }

    Ok(curve_secret)
}

/// Derives the full encryption keypair for a signing keypair in one step.
pub fn derive_encryption_keypair(signing: &SigningKeypair) -> StackResult<EncryptionKeypair> {
    Ok(EncryptionKeypair {
        public: sign_public_to_curve(&signing.public)?,
        secret: sign_secret_to_curve(&signing.secret)?,
    })
}

/// Signs `msg` with the given ed25519 secret key.
pub fn sign_detached(msg: &[u8], secret: &[u8; SIGN_SECRET_SIZE]) -> [u8; SIGNATURE_SIZE] {
    let mut sig = [0u8; SIGNATURE_SIZE];
    let mut sig_len: libsodium_sys::c_ulonglong = 0;

    unsafe {
        libsodium_sys::crypto_sign_ed25519_detached(
            sig.as_mut_ptr(),
            &mut sig_len,
            msg.as_ptr(),
            msg.len() as libsodium_sys::c_ulonglong,
            secret.as_ptr(),
        );
    }

    sig
}

/// Verifies a detached ed25519 signature against `msg` and the given public key.
pub fn verify_detached(sig: &[u8; SIGNATURE_SIZE], msg: &[u8], public: &[u8; SIGN_PUBLIC_SIZE]) -> bool {
    let result = unsafe {
        libsodium_sys::crypto_sign_ed25519_verify_detached(
            sig.as_ptr(),
            msg.as_ptr(),
            msg.len() as libsodium_sys::c_ulonglong,
            public.as_ptr(),
        )
    };

    result == 0
}

/// Fills the provided buffer with cryptographically secure random bytes. Used to mint a
/// signing seed when one isn't supplied by the caller's environment.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut std::ffi::c_void, out.len());
    }
}

/// Hex-encodes raw key bytes for on-disk storage, matching the `KeyStore` file format.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string back into raw bytes, as read from a `KeyStore` file.
pub fn from_hex(s: &str) -> StackResult<Vec<u8>> {
    hex::decode(s.trim()).map_err(|err| StackError::Crypto(format!("invalid hex: {}", err)))
}

/// True if `s` looks like a hex string (spec allows key-provisioning calls to accept either
/// hex or raw byte forms; this distinguishes the two on input).
pub fn is_hex(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let seed = [7u8; SEED_SIZE];
        let a = sign_keypair_from_seed(&seed).unwrap();
        let b = sign_keypair_from_seed(&seed).unwrap();
        assert_eq!(a.public, b.public);
        assert_eq!(a.secret[..], b.secret[..]);
    }

    #[test]
    fn rejects_wrong_seed_length() {
        let seed = [0u8; 4];
        assert!(sign_keypair_from_seed(&seed).is_err());
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let seed = [3u8; SEED_SIZE];
        let keys = sign_keypair_from_seed(&seed).unwrap();
        let msg = b"hello remote";
        let sig = sign_detached(msg, &keys.secret);
        assert!(verify_detached(&sig, msg, &keys.public));
        assert!(!verify_detached(&sig, b"tampered", &keys.public));
    }

    #[test]
    fn curve_conversion_round_trips_sizes() {
        let seed = [9u8; SEED_SIZE];
        let keys = sign_keypair_from_seed(&seed).unwrap();
        let enc = derive_encryption_keypair(&keys).unwrap();
        assert_eq!(enc.public.len(), CURVE_PUBLIC_SIZE);
        assert_eq!(enc.secret.len(), CURVE_SECRET_SIZE);
    }

    #[test]
    fn hex_round_trips() {
        let bytes = [1u8, 2, 3, 255];
        let encoded = to_hex(&bytes);
        assert_eq!(from_hex(&encoded).unwrap(), bytes.to_vec());
    }

    #[test]
    fn is_hex_detects_odd_length_and_non_hex() {
        assert!(is_hex("deadbeef"));
        assert!(!is_hex("deadbee"));
        assert!(!is_hex("zz"));
    }
}
