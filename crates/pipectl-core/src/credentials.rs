//! Credential resolution and secret handling.
//!
//! The host credential store exposes secrets as environment variables. They
//! are resolved once at run start into [`Secret`] values, which never render
//! their contents through `Debug` or `Display`.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use std::fmt;

const REDACTED: &str = "****";

/// An opaque secret value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only call this when handing the secret to a child
    /// process.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Username/password pair for the container registry.
#[derive(Debug, Clone)]
pub struct RegistryLogin {
    pub username: String,
    pub password: Secret,
}

/// Which credentials a run actually needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialNeeds {
    pub registry: bool,
    pub index_token: bool,
}

/// Credentials resolved for one run.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub registry: Option<RegistryLogin>,
    pub index_token: Option<Secret>,
}

impl Credentials {
    /// Resolve the needed credentials through `lookup`, which maps a
    /// variable name to its value.
    ///
    /// Empty values count as missing.
    pub fn resolve<F>(config: &PipelineConfig, needs: CredentialNeeds, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch = |name: &str| -> Result<String> {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PipelineError::CredentialResolution(name.to_string()))
        };

        let registry = if needs.registry {
            Some(RegistryLogin {
                username: fetch(&config.registry_user_var)?,
                password: Secret::new(fetch(&config.registry_password_var)?),
            })
        } else {
            None
        };

        let index_token = if needs.index_token {
            Some(Secret::new(fetch(&config.index_token_var)?))
        } else {
            None
        };

        Ok(Self {
            registry,
            index_token,
        })
    }

    pub fn registry(&self) -> Result<&RegistryLogin> {
        self.registry
            .as_ref()
            .ok_or_else(|| PipelineError::CredentialResolution("registry login".to_string()))
    }

    pub fn index_token(&self) -> Result<&Secret> {
        self.index_token
            .as_ref()
            .ok_or_else(|| PipelineError::CredentialResolution("package index token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(secret.to_string(), "****");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");

        let login = RegistryLogin {
            username: "ci".to_string(),
            password: Secret::new("hunter2"),
        };
        assert!(!format!("{login:?}").contains("hunter2"));
    }

    #[test]
    fn test_resolves_only_needed_credentials() {
        let config = PipelineConfig::default();
        let vars = env(&[
            ("REGISTRY_CREDENTIALS_USR", "ci"),
            ("REGISTRY_CREDENTIALS_PSW", "pw"),
        ]);
        let creds = Credentials::resolve(
            &config,
            CredentialNeeds {
                registry: true,
                index_token: false,
            },
            |k| vars.get(k).cloned(),
        )
        .expect("resolve failed");

        assert_eq!(creds.registry().unwrap().username, "ci");
        assert!(creds.index_token().is_err());
    }

    #[test]
    fn test_missing_token_names_variable() {
        let config = PipelineConfig::default();
        let err = Credentials::resolve(
            &config,
            CredentialNeeds {
                registry: false,
                index_token: true,
            },
            |_| None,
        )
        .unwrap_err();

        match err {
            PipelineError::CredentialResolution(name) => assert_eq!(name, "PACKAGE_INDEX_TOKEN"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let config = PipelineConfig::default();
        let vars = env(&[("PACKAGE_INDEX_TOKEN", "")]);
        let result = Credentials::resolve(
            &config,
            CredentialNeeds {
                registry: false,
                index_token: true,
            },
            |k| vars.get(k).cloned(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_nothing_needed_resolves_empty() {
        let config = PipelineConfig::default();
        let creds = Credentials::resolve(&config, CredentialNeeds::default(), |_| None).unwrap();
        assert!(creds.registry.is_none());
        assert!(creds.index_token.is_none());
    }
}
