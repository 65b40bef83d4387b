use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use signature::Signer;
use ssh_key::{PrivateKey, Signature};

/// Hashes the session log and appends a delimited seal block containing the
/// lowercase hex digest and a detached SSH signature over it.
///
/// The signer is fed the hex-ASCII form of the digest, not the raw bytes;
/// downstream verifiers depend on that exact payload. Nothing prevents
/// further writes at the OS level, but any byte added before the seal marker
/// makes verification fail.
pub fn seal_log_file(log_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<()> {
    let log_path = log_path.as_ref();

    let log_data = fs::read(log_path).context("read log file")?;
    let hash_hex = hex::encode(Sha256::digest(&log_data));

    let key_data = fs::read_to_string(key_path.as_ref()).context("read private key")?;
    let key = PrivateKey::from_openssh(&key_data).context("parse private key")?;

    let sig: Signature = key.try_sign(hash_hex.as_bytes()).context("sign hash")?;
    let sig_b64 = STANDARD.encode(sig.as_bytes());

    let block = format!(
        "\n\n=== FORENSIC SEAL ===\nSHA256 Hash: {hash_hex}\nSSH Signature (Base64): {sig_b64}\n=====================\n"
    );

    let mut file = OpenOptions::new()
        .append(true)
        .open(log_path)
        .context("open log for append")?;
    file.write_all(block.as_bytes()).context("append seal")?;

    Ok(())
}
