use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Result, TutorHubError};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 255;
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

/// Trims the address and lowercases the domain part. The local part is kept
/// as typed since mail servers may treat it case-sensitively.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

/// Normalises and validates an email address.
pub fn validate_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(TutorHubError::Validation("The Email field must be set".into()));
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(TutorHubError::Validation(format!(
            "Enter a valid email address: {}",
            email
        )));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(TutorHubError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_max_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(TutorHubError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

pub fn validate_not_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TutorHubError::Validation(format!("{} may not be blank", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_lowercased_local_part_kept() {
        assert_eq!(normalize_email("  Jane.Doe@Example.COM "), "Jane.Doe@example.com");
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@nodot").is_err());
        assert!(validate_email("sp ace@x.io").is_err());
        assert_eq!(validate_email("a@B.io").unwrap(), "a@b.io");
    }

    #[test]
    fn password_minimum_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn length_and_blank_checks() {
        assert!(validate_max_len("title", &"x".repeat(MAX_TITLE_LEN), MAX_TITLE_LEN).is_ok());
        assert!(validate_max_len("title", &"x".repeat(MAX_TITLE_LEN + 1), MAX_TITLE_LEN).is_err());
        assert!(validate_not_blank("content", "   ").is_err());
    }
}
