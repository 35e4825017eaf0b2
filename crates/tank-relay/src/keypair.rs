use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const KEY_FILE_PERMS: u32 = 0o600;

/// Path of the public key written next to a seed file.
#[must_use]
pub fn public_key_path(path: &Path) -> PathBuf {
    path.with_extension("pub")
}

/// Loads the relay's signing key. Never creates one: a relay that signs with
/// a key the vehicle does not trust would be silently ignored.
///
/// # Errors
///
/// Returns an error if the key file is missing, has wrong permissions or
/// wrong length, or if file I/O fails.
pub fn load_signing_key(path: &Path) -> anyhow::Result<SigningKey> {
    if !path.exists() {
        anyhow::bail!(
            "key file {} not found, run `tank-relay keygen` first",
            path.display()
        );
    }

    let metadata = fs::metadata(path)?;
    let permissions = metadata.permissions().mode();

    if permissions & 0o077 != 0 {
        anyhow::bail!(
            "key file {} has overly permissive permissions ({:o}), must be 0600",
            path.display(),
            permissions & 0o777
        );
    }

    let seed = Zeroizing::new(fs::read(path)?);
    if seed.len() != SECRET_KEY_LENGTH {
        anyhow::bail!(
            "key file must contain exactly {SECRET_KEY_LENGTH} bytes, got {}",
            seed.len()
        );
    }

    let mut seed_array = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
    seed_array.copy_from_slice(&seed);
    Ok(SigningKey::from_bytes(&seed_array))
}

/// Generates a fresh key, writing the seed (mode 0600) and the raw public key
/// (`.pub`) for provisioning the vehicle.
///
/// # Errors
///
/// Returns an error if a key already exists and `force` is false, or if
/// file I/O fails.
pub fn generate_and_store(path: &Path, force: bool) -> anyhow::Result<SigningKey> {
    if path.exists() && !force {
        anyhow::bail!(
            "key file {} already exists, pass --force to replace it",
            path.display()
        );
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    let seed = Zeroizing::new(signing_key.to_bytes());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create file with restrictive permissions atomically
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(KEY_FILE_PERMS)
        .open(path)?;
    file.write_all(seed.as_slice())?;
    drop(file);
    // An existing file keeps its old mode on truncate.
    fs::set_permissions(path, fs::Permissions::from_mode(KEY_FILE_PERMS))?;

    fs::write(
        public_key_path(path),
        signing_key.verifying_key().as_bytes(),
    )?;

    Ok(signing_key)
}

/// Standard base64 of the raw 32-byte public key.
#[must_use]
pub fn encode_public_key(key: &VerifyingKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.as_bytes())
}
