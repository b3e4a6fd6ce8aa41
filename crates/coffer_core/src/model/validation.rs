//! Field validation shared by stores and records.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 255;
/// Maximum encryption label length in characters.
pub const MAX_ENCRYPTION_LABEL_CHARS: usize = 64;

/// Validation failure for a store/record create request or patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyTitle,
    TitleTooLong { max: usize, actual: usize },
    EmptyEncryptionLabel,
    EncryptionLabelTooLong { max: usize, actual: usize },
    ExpiryBeforeCreation { created_at: i64, expires_at: i64 },
    InvalidBody(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "title must not be empty"),
            Self::TitleTooLong { max, actual } => {
                write!(f, "title has {actual} characters, at most {max} allowed")
            }
            Self::EmptyEncryptionLabel => write!(f, "encryption label must not be empty"),
            Self::EncryptionLabelTooLong { max, actual } => write!(
                f,
                "encryption label has {actual} characters, at most {max} allowed"
            ),
            Self::ExpiryBeforeCreation {
                created_at,
                expires_at,
            } => write!(
                f,
                "expires_at ({expires_at}) must not be earlier than created_at ({created_at})"
            ),
            Self::InvalidBody(message) => write!(f, "invalid request body: {message}"),
        }
    }
}

impl Error for ValidationError {}

/// Trims and checks a title, returning the normalized value.
pub fn normalize_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    let actual = trimmed.chars().count();
    if actual > MAX_TITLE_CHARS {
        return Err(ValidationError::TitleTooLong {
            max: MAX_TITLE_CHARS,
            actual,
        });
    }
    Ok(trimmed.to_string())
}

/// Trims and checks an encryption label, returning the normalized value.
pub fn normalize_encryption_label(label: &str) -> Result<String, ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyEncryptionLabel);
    }
    let actual = trimmed.chars().count();
    if actual > MAX_ENCRYPTION_LABEL_CHARS {
        return Err(ValidationError::EncryptionLabelTooLong {
            max: MAX_ENCRYPTION_LABEL_CHARS,
            actual,
        });
    }
    Ok(trimmed.to_string())
}

/// Checks the expiry window invariant.
pub fn check_expiry_window(created_at: i64, expires_at: Option<i64>) -> Result<(), ValidationError> {
    match expires_at {
        Some(expires_at) if expires_at < created_at => Err(ValidationError::ExpiryBeforeCreation {
            created_at,
            expires_at,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_expiry_window, normalize_title, ValidationError, MAX_TITLE_CHARS};

    #[test]
    fn title_is_trimmed() {
        assert_eq!(normalize_title("  passwords \n").unwrap(), "passwords");
    }

    #[test]
    fn blank_and_oversized_titles_are_rejected() {
        assert_eq!(normalize_title("   "), Err(ValidationError::EmptyTitle));
        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        assert!(matches!(
            normalize_title(&long),
            Err(ValidationError::TitleTooLong { .. })
        ));
    }

    #[test]
    fn expiry_equal_to_creation_is_allowed() {
        assert!(check_expiry_window(100, Some(100)).is_ok());
        assert!(check_expiry_window(100, None).is_ok());
        assert_eq!(
            check_expiry_window(100, Some(99)),
            Err(ValidationError::ExpiryBeforeCreation {
                created_at: 100,
                expires_at: 99
            })
        );
    }
}
