//! Server-side encryption settings for uploaded objects.

use crate::config::ConfigError;

/// Server-side encryption requested for every uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    None,
    /// SSE-KMS; `None` key id selects the bucket's default KMS key
    Kms { key_id: Option<String> },
}

impl Encryption {
    /// Resolve `encryption_type` / `encryption_key` config values.
    ///
    /// The type is case-insensitive and defaults to `none`. An empty key is
    /// treated as absent.
    pub fn resolve(encryption_type: Option<&str>, encryption_key: Option<&str>) -> Result<Self, ConfigError> {
        let encryption_type = encryption_type.unwrap_or("none").trim().to_ascii_lowercase();
        match encryption_type.as_str() {
            "" | "none" => Ok(Encryption::None),
            "kms" => Ok(Encryption::Kms {
                key_id: encryption_key
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string),
            }),
            other => Err(ConfigError::UnsupportedEncryption(other.to_string())),
        }
    }

    /// Suffix for upload log lines
    pub fn description(&self) -> String {
        match self {
            Encryption::None => String::new(),
            Encryption::Kms { key_id: Some(key_id) } => {
                format!(" using KMS encryption key ID '{}'", key_id)
            }
            Encryption::Kms { key_id: None } => " using default KMS encryption".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(Encryption::resolve(None, None).unwrap(), Encryption::None);
        assert_eq!(Encryption::resolve(Some("NONE"), Some("ignored")).unwrap(), Encryption::None);
        assert_eq!(
            Encryption::resolve(Some("kms"), None).unwrap(),
            Encryption::Kms { key_id: None }
        );
        assert_eq!(
            Encryption::resolve(Some("KMS"), Some("")).unwrap(),
            Encryption::Kms { key_id: None }
        );
        assert_eq!(
            Encryption::resolve(Some("kms"), Some("key-123")).unwrap(),
            Encryption::Kms {
                key_id: Some("key-123".to_string())
            }
        );
    }

    #[test]
    fn test_unsupported_type() {
        let err = Encryption::resolve(Some("aes256"), None).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedEncryption(ref t) if t == "aes256"));
    }

    #[test]
    fn test_description() {
        assert_eq!(Encryption::None.description(), "");
        assert_eq!(
            Encryption::Kms { key_id: None }.description(),
            " using default KMS encryption"
        );
        assert_eq!(
            Encryption::Kms {
                key_id: Some("abc".to_string())
            }
            .description(),
            " using KMS encryption key ID 'abc'"
        );
    }
}
