//! On-disk layout and lifecycle of a node's key material. Generalizes the original
//! `ZStack.initLocalKeys`/`initRemoteKeys`/`areKeysSetup` static methods (see
//! `original_source/stp_zmq/zstack.py`) into their own component, keeping the directory
//! layout and staging/move dance but swapping zmq's z85 certificate files for hex-encoded
//! text, since certificate parsing belongs to the transport library (out of scope here).

use std::fs;
use std::path::{Path, PathBuf};

use stp_core::crypto;
use stp_core::error::{StackError, StackResult};
use stp_core::logging::{debug, Logger};

/// Either form a caller may supply a key in: hex text (as read from a key file or typed by
/// an operator) or raw key bytes (as produced by another component in this process).
pub enum KeyMaterial {
    Hex(String),
    Raw(Vec<u8>),
}

impl KeyMaterial {
    fn into_bytes(self) -> StackResult<Vec<u8>> {
        match self {
            KeyMaterial::Hex(s) => crypto::from_hex(&s),
            KeyMaterial::Raw(bytes) => Ok(bytes),
        }
    }
}

/// Materializes, locates and erases the four canonical key directories under a node's home
/// directory. Carries no state of its own; every operation is a function of `base` and `name`.
pub struct KeyStore;

impl KeyStore {
    pub const PUBLIC_DIR: &'static str = "public_keys";
    pub const SECRET_DIR: &'static str = "private_keys";
    pub const VERIF_DIR: &'static str = "verif_keys";
    pub const SIG_DIR: &'static str = "sig_keys";

    pub fn home_dir(base: &Path, name: &str) -> PathBuf {
        base.join(name)
    }

    pub fn public_dir(home: &Path) -> PathBuf {
        home.join(Self::PUBLIC_DIR)
    }

    pub fn secret_dir(home: &Path) -> PathBuf {
        home.join(Self::SECRET_DIR)
    }

    pub fn verif_dir(home: &Path) -> PathBuf {
        home.join(Self::VERIF_DIR)
    }

    pub fn sig_dir(home: &Path) -> PathBuf {
        home.join(Self::SIG_DIR)
    }

    /// Generates both keypairs deterministically from `seed` and deposits them into the four
    /// canonical subdirectories, returning `(enc_pub_hex, sign_pub_hex)`. `override_` is
    /// accepted for API compatibility with callers that pass it but is not consulted:
    /// regeneration proceeds whenever the on-disk keys are absent regardless of its value.
    pub fn init_local_keys(
        name: &str,
        base: &Path,
        seed: &[u8],
        override_: bool,
        log: &Logger,
    ) -> StackResult<(String, String)> {
        let _ = override_;
        let home = Self::home_dir(base, name);
        let pub_dir = Self::public_dir(&home);
        let sec_dir = Self::secret_dir(&home);
        let verif_dir = Self::verif_dir(&home);
        let sig_dir = Self::sig_dir(&home);

        for dir in [&home, &pub_dir, &sec_dir, &verif_dir, &sig_dir] {
            fs::create_dir_all(dir)?;
        }

        let stage_sig = home.join("__sig_stage__");
        let stage_enc = home.join("__enc_stage__");
        fs::create_dir_all(&stage_sig)?;
        fs::create_dir_all(&stage_enc)?;

        let signing = crypto::sign_keypair_from_seed(seed)?;
        let encryption = crypto::derive_encryption_keypair(&signing)?;

        write_key_file(&stage_sig.join(format!("{}.key", name)), &crypto::to_hex(&signing.public))?;
        write_key_file(
            &stage_sig.join(format!("{}.key_secret", name)),
            &crypto::to_hex(&signing.secret),
        )?;
        write_key_file(&stage_enc.join(format!("{}.key", name)), &crypto::to_hex(&encryption.public))?;
        write_key_file(
            &stage_enc.join(format!("{}.key_secret", name)),
            &crypto::to_hex(&encryption.secret),
        )?;

        fs::rename(stage_sig.join(format!("{}.key", name)), verif_dir.join(format!("{}.key", name)))?;
        fs::rename(
            stage_sig.join(format!("{}.key_secret", name)),
            sig_dir.join(format!("{}.key_secret", name)),
        )?;
        fs::rename(stage_enc.join(format!("{}.key", name)), pub_dir.join(format!("{}.key", name)))?;
        fs::rename(
            stage_enc.join(format!("{}.key_secret", name)),
            sec_dir.join(format!("{}.key_secret", name)),
        )?;

        fs::remove_dir_all(&stage_sig)?;
        fs::remove_dir_all(&stage_enc)?;

        debug!(log, "generated local keys"; "name" => name);

        Ok((crypto::to_hex(&encryption.public), crypto::to_hex(&signing.public)))
    }

    /// Writes the peer's signing public key into `verif_keys` and its derived curve public
    /// key into `public_keys`. Accepts either hex or raw byte forms of the verify key.
    pub fn init_remote_keys(
        local_name: &str,
        remote_name: &str,
        base: &Path,
        verkey: KeyMaterial,
        override_: bool,
    ) -> StackResult<()> {
        let _ = override_;
        let home = Self::home_dir(base, local_name);
        let verif_dir = Self::verif_dir(&home);
        let pub_dir = Self::public_dir(&home);
        fs::create_dir_all(&home)?;
        fs::create_dir_all(&verif_dir)?;
        fs::create_dir_all(&pub_dir)?;

        let verkey_bytes = verkey.into_bytes()?;
        if verkey_bytes.len() != crypto::SIGN_PUBLIC_SIZE {
            return Err(StackError::Crypto(format!(
                "verify key must be {} bytes, got {}",
                crypto::SIGN_PUBLIC_SIZE,
                verkey_bytes.len()
            )));
        }
        let mut verkey_arr = [0u8; crypto::SIGN_PUBLIC_SIZE];
        verkey_arr.copy_from_slice(&verkey_bytes);

        write_key_file(&verif_dir.join(format!("{}.key", remote_name)), &crypto::to_hex(&verkey_bytes))?;

        let curve_public = crypto::sign_public_to_curve(&verkey_arr)?;
        write_key_file(&pub_dir.join(format!("{}.key", remote_name)), &crypto::to_hex(&curve_public))?;

        Ok(())
    }

    /// True iff all four canonical files for `name` exist under `base`.
    pub fn are_keys_setup(name: &str, base: &Path) -> bool {
        let home = Self::home_dir(base, name);
        let verif_file = Self::verif_dir(&home).join(format!("{}.key", name));
        let pub_file = Self::public_dir(&home).join(format!("{}.key", name));
        let sig_file = Self::sig_dir(&home).join(format!("{}.key_secret", name));
        let sec_file = Self::secret_dir(&home).join(format!("{}.key_secret", name));
        verif_file.is_file() && pub_file.is_file() && sig_file.is_file() && sec_file.is_file()
    }

    /// Reads `<dir>/<name>.key`, returning `KeyNotFound` when missing or not valid hex.
    pub fn load_public(dir: &Path, name: &str) -> StackResult<Vec<u8>> {
        load_key_file(&dir.join(format!("{}.key", name)), dir, name)
    }

    /// Reads `<dir>/<name>.key_secret`, returning `KeyNotFound` when missing or not valid hex.
    pub fn load_secret(dir: &Path, name: &str) -> StackResult<Vec<u8>> {
        load_key_file(&dir.join(format!("{}.key_secret", name)), dir, name)
    }

    /// Lists every `*.key` file under `dir`, decoded to raw bytes. Malformed entries are
    /// skipped rather than failing the whole listing.
    pub fn load_all_public(dir: &Path) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return keys,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|ext| ext == "key").unwrap_or(false) {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(bytes) = crypto::from_hex(&content) {
                        keys.push(bytes);
                    }
                }
            }
        }
        keys
    }

    /// Deletes only the local identity's files. Erasure never fails; errors are logged.
    pub fn clear_local_role_keep(name: &str, base: &Path, log: &Logger) {
        let home = Self::home_dir(base, name);
        safe_remove(&Self::sig_dir(&home).join(format!("{}.key_secret", name)), log);
        safe_remove(&Self::secret_dir(&home).join(format!("{}.key_secret", name)), log);
        safe_remove(&Self::verif_dir(&home).join(format!("{}.key", name)), log);
        safe_remove(&Self::public_dir(&home).join(format!("{}.key", name)), log);
    }

    /// Deletes every file in the four directories except the ones belonging to `name`.
    pub fn clear_remote_role_keeps(name: &str, base: &Path, log: &Logger) {
        let home = Self::home_dir(base, name);
        for dir in [Self::secret_dir(&home), Self::sig_dir(&home)] {
            clear_dir_except(&dir, &format!("{}.key_secret", name), log);
        }
        for dir in [Self::public_dir(&home), Self::verif_dir(&home)] {
            clear_dir_except(&dir, &format!("{}.key", name), log);
        }
    }

    /// Removes the entire home directory for `name`. Erasure never fails; errors are logged.
    pub fn clear_all(name: &str, base: &Path, log: &Logger) {
        let home = Self::home_dir(base, name);
        if let Err(err) = fs::remove_dir_all(&home) {
            debug!(log, "could not clear key home directory"; "path" => %home.display(), "error" => %err);
        }
    }
}

fn write_key_file(path: &Path, hex: &str) -> StackResult<()> {
    fs::write(path, hex)?;
    Ok(())
}

fn load_key_file(path: &Path, dir: &Path, name: &str) -> StackResult<Vec<u8>> {
    let not_found = || StackError::KeyNotFound {
        dir: dir.display().to_string(),
        name: name.to_string(),
    };
    let content = fs::read_to_string(path).map_err(|_| not_found())?;
    crypto::from_hex(&content).map_err(|_| not_found())
}

fn clear_dir_except(dir: &Path, keep_file_name: &str, log: &Logger) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_name().map(|n| n != keep_file_name).unwrap_or(false) {
            safe_remove(&path, log);
        }
    }
}

fn safe_remove(path: &Path, log: &Logger) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(log, "could not remove key file"; "path" => %path.display(), "error" => %err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stp_core::crypto::SEED_SIZE;
    use stp_core::logging::discard;
    use tempfile::tempdir;

    #[test]
    fn init_local_keys_populates_all_four_dirs() {
        let base = tempdir().unwrap();
        let log = discard();
        let seed = [5u8; SEED_SIZE];
        let (enc_pub, sign_pub) = KeyStore::init_local_keys("alice", base.path(), &seed, false, &log).unwrap();

        assert!(KeyStore::are_keys_setup("alice", base.path()));
        assert!(!enc_pub.is_empty());
        assert!(!sign_pub.is_empty());

        let home = KeyStore::home_dir(base.path(), "alice");
        assert!(!home.join("__sig_stage__").exists());
        assert!(!home.join("__enc_stage__").exists());
    }

    #[test]
    fn are_keys_setup_false_before_init() {
        let base = tempdir().unwrap();
        assert!(!KeyStore::are_keys_setup("bob", base.path()));
    }

    #[test]
    fn init_remote_keys_derives_curve_key_from_verkey() {
        let base = tempdir().unwrap();
        let log = discard();
        let seed = [9u8; SEED_SIZE];
        let signing = crypto::sign_keypair_from_seed(&seed).unwrap();

        KeyStore::init_remote_keys(
            "alice",
            "bob",
            base.path(),
            KeyMaterial::Raw(signing.public.to_vec()),
            false,
        )
        .unwrap();

        let home = KeyStore::home_dir(base.path(), "alice");
        let loaded_verkey = KeyStore::load_public(&KeyStore::verif_dir(&home), "bob").unwrap();
        assert_eq!(loaded_verkey, signing.public.to_vec());

        let loaded_pubkey = KeyStore::load_public(&KeyStore::public_dir(&home), "bob").unwrap();
        let expected = crypto::sign_public_to_curve(&signing.public).unwrap();
        assert_eq!(loaded_pubkey, expected.to_vec());
        let _ = log;
    }

    #[test]
    fn load_public_missing_file_is_key_not_found() {
        let base = tempdir().unwrap();
        let err = KeyStore::load_public(&base.path().join("nope"), "carol").unwrap_err();
        assert!(matches!(err, StackError::KeyNotFound { .. }));
    }

    #[test]
    fn clear_local_role_keep_only_removes_local_files() {
        let base = tempdir().unwrap();
        let log = discard();
        let seed = [3u8; SEED_SIZE];
        KeyStore::init_local_keys("alice", base.path(), &seed, false, &log).unwrap();

        let signing = crypto::sign_keypair_from_seed(&[7u8; SEED_SIZE]).unwrap();
        KeyStore::init_remote_keys("alice", "bob", base.path(), KeyMaterial::Raw(signing.public.to_vec()), false)
            .unwrap();

        KeyStore::clear_local_role_keep("alice", base.path(), &log);

        assert!(!KeyStore::are_keys_setup("alice", base.path()));
        let home = KeyStore::home_dir(base.path(), "alice");
        assert!(KeyStore::load_public(&KeyStore::verif_dir(&home), "bob").is_ok());
    }
}
