use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::errors::ServiceError;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

/// Hashes a plaintext password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    validate_password_strength(password)?;

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::InternalError(format!("Failed to hash password: {}", e)))
}

/// Checks `password` against a stored PHC string. A malformed hash never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

fn validate_password_strength(password: &str) -> Result<(), ServiceError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ServiceError::ValidationError(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_LEN
        )));
    }

    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ServiceError::ValidationError(
            "Password must contain letters and digits".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong-pass1", &hash));
    }

    #[test]
    fn weak_passwords_are_rejected() {
        assert_matches!(hash_password("short1"), Err(ServiceError::ValidationError(_)));
        assert_matches!(
            hash_password("lettersonly"),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything1", "not-a-phc-string"));
    }
}
