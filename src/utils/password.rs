use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Argon2id hash with a fresh random salt, encoded as a PHC string
/// (`$argon2id$v=19$m=...`), so parameters travel with the hash.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// `Ok(false)` for a wrong password; `Err` only when the stored value is not
/// a usable PHC hash.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| anyhow!("Invalid password hash format: {e}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("Password verification failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted_phc_strings() {
        let a = hash_password("SV001").unwrap();
        let b = hash_password("SV001").unwrap();
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);
    }

    #[test]
    fn verify_accepts_only_the_right_password() {
        let stored = hash_password("SV001").unwrap();
        assert!(verify_password("SV001", &stored).unwrap());
        assert!(!verify_password("sv001", &stored).unwrap());
        assert!(!verify_password("", &stored).unwrap());
    }

    #[test]
    fn legacy_or_empty_hash_is_an_error() {
        assert!(verify_password("SV001", "").is_err());
        assert!(verify_password("SV001", "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8").is_err());
    }
}
