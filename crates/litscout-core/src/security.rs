use std::env;

use crate::LitScoutError;

/// Provider API key read from the environment; `Debug` never prints it.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, LitScoutError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(LitScoutError::MissingSecret(var.to_string())),
    }
}

/// Like [`require_env`], but an unset variable name means no secret is wanted.
pub fn optional_env(var: Option<&str>) -> Result<Option<SecretValue>, LitScoutError> {
    match var.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => require_env(name).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_loaded_and_masked() {
        unsafe {
            std::env::set_var("LITSCOUT_TEST_CORE_KEY", "value");
        }
        let secret = require_env("LITSCOUT_TEST_CORE_KEY").expect("secret should load");
        assert_eq!(secret.expose(), "value");
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }

    #[test]
    fn unset_api_key_is_a_missing_secret() {
        unsafe {
            std::env::remove_var("LITSCOUT_TEST_ORKG_KEY");
        }
        let err = require_env("LITSCOUT_TEST_ORKG_KEY").unwrap_err();
        assert!(matches!(err, LitScoutError::MissingSecret(_)));
    }

    #[test]
    fn optional_env_skips_blank_names() {
        assert!(optional_env(None).unwrap().is_none());
        assert!(optional_env(Some("  ")).unwrap().is_none());
    }
}
