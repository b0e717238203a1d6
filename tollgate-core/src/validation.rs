//! Validation utilities for credentials and throttling identifiers
//!
//! Password strength is evaluated by [`check_password`] / [`validate_password`]
//! (or [`require_strong_password`] where a typed error is wanted);
//! [`normalize_identifier`] and [`validate_identifier`] build the stable
//! identifiers the attempt tracker is keyed on.

use crate::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Minimum number of characters a password must contain
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// The characters accepted by the special-character rule
pub const SPECIAL_CHARACTERS: &str = r#"!@#$%^&*(),.?":{}|<>"#;

static DIGIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]").expect("Invalid digit regex pattern"));

static UPPERCASE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]").expect("Invalid uppercase regex pattern"));

static SPECIAL_CHARACTER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[!@#$%^&*(),.?":{}|<>]"#).expect("Invalid special character regex pattern")
});

/// The first password rule a candidate password breaks.
///
/// Rules are checked in declaration order and only the first violation is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Password must be at least 8 characters long")]
    TooShort,

    #[error("Password must contain at least one number")]
    MissingDigit,

    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,

    #[error("Password must contain at least one special character")]
    MissingSpecialCharacter,
}

/// Result of evaluating a password against the strength policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordValidation {
    pub valid: bool,
    pub message: Option<String>,
}

impl PasswordValidation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid(violation: PolicyViolation) -> Self {
        Self {
            valid: false,
            message: Some(violation.to_string()),
        }
    }
}

impl From<Result<(), PolicyViolation>> for PasswordValidation {
    fn from(result: Result<(), PolicyViolation>) -> Self {
        match result {
            Ok(()) => Self::valid(),
            Err(violation) => Self::invalid(violation),
        }
    }
}

/// Checks a password against the strength policy
///
/// # Password Requirements
///
/// 1. Minimum 8 characters
/// 2. At least one decimal digit
/// 3. At least one uppercase ASCII letter
/// 4. At least one character from [`SPECIAL_CHARACTERS`]
///
/// # Examples
///
/// ```rust
/// use tollgate_core::validation::{check_password, PolicyViolation};
///
/// assert!(check_password("Abcdef1!").is_ok());
/// assert_eq!(check_password("abcdefg1"), Err(PolicyViolation::MissingUppercase));
/// ```
pub fn check_password(password: &str) -> Result<(), PolicyViolation> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PolicyViolation::TooShort);
    }

    if !DIGIT_REGEX.is_match(password) {
        return Err(PolicyViolation::MissingDigit);
    }

    if !UPPERCASE_REGEX.is_match(password) {
        return Err(PolicyViolation::MissingUppercase);
    }

    if !SPECIAL_CHARACTER_REGEX.is_match(password) {
        return Err(PolicyViolation::MissingSpecialCharacter);
    }

    Ok(())
}

/// Evaluates a password and reports the outcome as a value.
///
/// # Examples
///
/// ```rust
/// use tollgate_core::validation::validate_password;
///
/// let result = validate_password("short");
/// assert!(!result.valid);
/// assert_eq!(
///     result.message.as_deref(),
///     Some("Password must be at least 8 characters long")
/// );
/// ```
pub fn validate_password(password: &str) -> PasswordValidation {
    check_password(password).into()
}

/// Like [`check_password`], but as a [`ValidationError`] for callers that propagate with `?`.
pub fn require_strong_password(password: &str) -> Result<(), ValidationError> {
    check_password(password)?;
    Ok(())
}

/// Produces the throttling key for a raw login name: trimmed and ASCII-lowercased.
///
/// ```rust
/// use tollgate_core::validation::normalize_identifier;
///
/// assert_eq!(normalize_identifier("  User@Example.COM "), "user@example.com");
/// ```
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Normalizes an identifier and rejects one that is empty afterwards.
pub fn validate_identifier(raw: &str) -> Result<String, ValidationError> {
    let identifier = normalize_identifier(raw);
    if identifier.is_empty() {
        return Err(ValidationError::InvalidIdentifier(
            "identifier must not be empty".to_string(),
        ));
    }
    Ok(identifier)
}
