//! Keygen command: produce a signing key pair.
//!
//! The secret key is written unencrypted unless HISTORIFY_PASSWORD is set,
//! in which case it is encrypted with that password.

use std::path::Path;

use anyhow::{bail, Result};

use crate::minisign::{KeyPair, PASSWORD_ENV};

pub fn execute(secret_key: &str, public_key: &str) -> Result<u8> {
    let secret_path = Path::new(secret_key);
    let public_path = Path::new(public_key);
    if secret_path.exists() {
        bail!("Refusing to overwrite existing key: {secret_key}");
    }
    if public_path.exists() {
        bail!("Refusing to overwrite existing key: {public_key}");
    }

    let password = std::env::var(PASSWORD_ENV).ok();
    let pair = KeyPair::generate();
    pair.secret.write_to(secret_path, password.as_deref())?;
    pair.public.write_to(public_path)?;

    println!("Generated key pair {}", pair.public.key_id_hex());
    println!("  secret key: {secret_key}");
    println!("  public key: {public_key}");
    if password.is_some() {
        println!("The secret key is encrypted with the {PASSWORD_ENV} password.");
    } else {
        println!("The secret key is NOT encrypted. Set {PASSWORD_ENV} before keygen to encrypt it.");
    }
    Ok(0)
}
