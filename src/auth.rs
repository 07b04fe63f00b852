use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use log::error;
use rand::rngs::OsRng;
use serde::Deserialize;

use crate::quiz::{Error, Result};

/// Signup/login request body. Fields default to empty so a missing
/// field surfaces as a validation error rather than a parse failure.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        if self.email.is_empty() || !self.email.contains('@') {
            return Err(Error::BadRequest);
        }
        if self.password.is_empty() {
            return Err(Error::BadRequest);
        }

        Ok(())
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("couldn't hash password: {e}");
            Error::Internal
        })
}

pub fn verify_password(password: &str, pwhash: &str) -> bool {
    let parsed = match PasswordHash::new(pwhash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("invalid stored password hash: {e}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
