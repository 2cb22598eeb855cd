//! Configuration types.
//!
//! Everything is read from environment variables once, at startup, into
//! `TriageConfig`, which is then passed to components at construction.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::channels::gmail::{self, GmailConfig};
use crate::channels::imap::{self, ImapConfig};
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::classifier::triage_policy;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_ORG_DOMAIN: &str = "company.com";
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const DEFAULT_LEDGER_PATH: &str = "triage_log.csv";

/// Which mailbox to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxBackend {
    Gmail,
    Imap,
}

impl FromStr for MailboxBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "imap" => Ok(Self::Imap),
            other => Err(ConfigError::InvalidValue {
                key: "MAILBOX_BACKEND".to_string(),
                message: format!("unknown mailbox '{other}' (expected gmail or imap)"),
            }),
        }
    }
}

/// Resolved mailbox settings.
#[derive(Debug, Clone)]
pub enum MailboxConfig {
    Gmail(GmailConfig),
    Imap(ImapConfig),
}

/// Mailbox keys captured at load time, resolved on demand.
///
/// `serve` never needs mailbox credentials, so they are not validated up front.
#[derive(Clone, Default)]
struct MailboxVars(HashMap<String, String>);

impl MailboxVars {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

impl fmt::Debug for MailboxVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_tuple("MailboxVars").field(&keys).finish()
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub llm_backend: LlmBackend,
    pub model: String,
    pub temperature: f64,
    /// Key for `llm_backend`. Only needed when classifying in-process.
    pub api_key: Option<SecretString>,
    /// Remote classification endpoint. When set, `pull` posts messages here.
    pub api_url: Option<String>,
    /// Full classification policy text.
    pub policy: String,
    pub bind: SocketAddr,
    pub max_results: u32,
    pub ledger_path: PathBuf,
    pub continue_on_error: bool,
    pub mailbox: MailboxBackend,
    mailbox_vars: MailboxVars,
}

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let llm_backend: LlmBackend = match get("TRIAGE_LLM_BACKEND") {
            Some(raw) => raw.parse()?,
            None => LlmBackend::Gemini,
        };
        let api_key = get(llm_backend.api_key_var()).map(SecretString::from);

        let org_domain = get("TRIAGE_ORG_DOMAIN").unwrap_or_else(|| DEFAULT_ORG_DOMAIN.to_string());
        let policy = lookup("TRIAGE_POLICY")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| triage_policy(&org_domain));

        let mailbox = match get("MAILBOX_BACKEND") {
            Some(raw) => raw.parse()?,
            None => MailboxBackend::Gmail,
        };
        let mailbox_vars = MailboxVars(
            gmail::CONFIG_KEYS
                .iter()
                .chain(imap::CONFIG_KEYS)
                .filter_map(|&key| lookup(key).map(|v| (key.to_string(), v)))
                .collect(),
        );

        Ok(Self {
            llm_backend,
            model: get("TRIAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_or("TRIAGE_TEMPERATURE", get("TRIAGE_TEMPERATURE"), DEFAULT_TEMPERATURE)?,
            api_key,
            api_url: get("TRIAGE_API_URL"),
            policy,
            bind: parse_or(
                "TRIAGE_BIND",
                get("TRIAGE_BIND"),
                SocketAddr::from(([0, 0, 0, 0], 8000)),
            )?,
            max_results: parse_or("TRIAGE_MAX_RESULTS", get("TRIAGE_MAX_RESULTS"), DEFAULT_MAX_RESULTS)?,
            ledger_path: get("TRIAGE_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH)),
            continue_on_error: match get("TRIAGE_CONTINUE_ON_ERROR") {
                Some(raw) => parse_bool("TRIAGE_CONTINUE_ON_ERROR", &raw)?,
                None => false,
            },
            mailbox,
            mailbox_vars,
        })
    }

    /// Settings for the in-process model backend.
    pub fn llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let api_key = self.api_key.clone().ok_or_else(|| ConfigError::MissingRequired {
            key: self.llm_backend.api_key_var().to_string(),
            hint: "Set the API key, or set TRIAGE_API_URL to classify through a running service"
                .to_string(),
        })?;

        Ok(LlmConfig {
            backend: self.llm_backend,
            api_key,
            model: self.model.clone(),
            temperature: self.temperature,
        })
    }

    /// Resolve credentials for the configured mailbox.
    pub fn mailbox_config(&self) -> Result<MailboxConfig, ConfigError> {
        match self.mailbox {
            MailboxBackend::Gmail => {
                GmailConfig::from_lookup(|key| self.mailbox_vars.get(key)).map(MailboxConfig::Gmail)
            }
            MailboxBackend::Imap => {
                ImapConfig::from_lookup(|key| self.mailbox_vars.get(key)).map(MailboxConfig::Imap)
            }
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<TriageConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TriageConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.llm_backend, LlmBackend::Gemini);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.temperature, 0.2);
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
        assert_eq!(cfg.max_results, 10);
        assert_eq!(cfg.ledger_path, PathBuf::from("triage_log.csv"));
        assert!(!cfg.continue_on_error);
        assert_eq!(cfg.mailbox, MailboxBackend::Gmail);
        assert!(cfg.api_url.is_none());
        assert!(cfg.policy.contains("@company.com"));
    }

    #[test]
    fn org_domain_flows_into_policy() {
        let cfg = config(&[("TRIAGE_ORG_DOMAIN", "acme.io")]).unwrap();
        assert!(cfg.policy.contains("@acme.io"));
        assert!(!cfg.policy.contains("@company.com"));
    }

    #[test]
    fn policy_override_wins() {
        let cfg = config(&[("TRIAGE_POLICY", "Only say archive.")]).unwrap();
        assert_eq!(cfg.policy, "Only say archive.");
    }

    #[test]
    fn api_key_follows_backend() {
        let cfg = config(&[
            ("TRIAGE_LLM_BACKEND", "anthropic"),
            ("GEMINI_API_KEY", "g"),
            ("ANTHROPIC_API_KEY", "a"),
        ])
        .unwrap();
        let llm = cfg.llm_config().unwrap();
        assert_eq!(llm.backend, LlmBackend::Anthropic);
        assert_eq!(llm.api_key.expose_secret(), "a");
    }

    #[test]
    fn missing_api_key_is_reported_lazily() {
        let cfg = config(&[("TRIAGE_API_URL", "http://localhost:8000/triage-email")]).unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("http://localhost:8000/triage-email"));

        match cfg.llm_config().unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "GEMINI_API_KEY"),
            other => panic!("Expected MissingRequired, got {other:?}"),
        }
    }

    #[test]
    fn numeric_values_are_validated() {
        assert!(matches!(
            config(&[("TRIAGE_MAX_RESULTS", "ten")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config(&[("TRIAGE_TEMPERATURE", "warm")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config(&[("TRIAGE_BIND", "not an address")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(config(&[("TRIAGE_MAX_RESULTS", "25")]).unwrap().max_results, 25);
    }

    #[test]
    fn continue_on_error_accepts_common_spellings() {
        assert!(config(&[("TRIAGE_CONTINUE_ON_ERROR", "true")]).unwrap().continue_on_error);
        assert!(config(&[("TRIAGE_CONTINUE_ON_ERROR", "1")]).unwrap().continue_on_error);
        assert!(!config(&[("TRIAGE_CONTINUE_ON_ERROR", "off")]).unwrap().continue_on_error);
        assert!(config(&[("TRIAGE_CONTINUE_ON_ERROR", "maybe")]).is_err());
    }

    #[test]
    fn mailbox_backend_parses() {
        let cfg = config(&[("MAILBOX_BACKEND", "IMAP")]).unwrap();
        assert_eq!(cfg.mailbox, MailboxBackend::Imap);
        assert!(config(&[("MAILBOX_BACKEND", "pop3")]).is_err());
    }

    #[test]
    fn imap_settings_come_from_the_same_lookup() {
        let cfg = config(&[
            ("MAILBOX_BACKEND", "imap"),
            ("EMAIL_IMAP_HOST", "imap.example.com"),
            ("EMAIL_USERNAME", "triage@example.com"),
            ("EMAIL_PASSWORD", "hunter2"),
            ("EMAIL_IMAP_FOLDER", "Support"),
        ])
        .unwrap();

        match cfg.mailbox_config().unwrap() {
            MailboxConfig::Imap(imap) => {
                assert_eq!(imap.host, "imap.example.com");
                assert_eq!(imap.port, 993);
                assert_eq!(imap.username, "triage@example.com");
                assert_eq!(imap.password.expose_secret(), "hunter2");
                assert_eq!(imap.folder, "Support");
            }
            other => panic!("Expected IMAP config, got {other:?}"),
        }
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn missing_imap_setting_is_reported_lazily() {
        let cfg = config(&[("MAILBOX_BACKEND", "imap"), ("EMAIL_IMAP_HOST", "imap.example.com")]).unwrap();
        match cfg.mailbox_config().unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "EMAIL_USERNAME"),
            other => panic!("Expected MissingRequired, got {other:?}"),
        }

        let cfg = config(&[
            ("MAILBOX_BACKEND", "imap"),
            ("EMAIL_IMAP_HOST", "h"),
            ("EMAIL_USERNAME", "u"),
            ("EMAIL_PASSWORD", "p"),
            ("EMAIL_IMAP_PORT", "imaps"),
        ])
        .unwrap();
        assert!(matches!(cfg.mailbox_config(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn gmail_settings_come_from_the_same_lookup() {
        let cfg = config(&[
            ("GMAIL_ACCESS_TOKEN", " ya29.token "),
            ("GMAIL_LABEL", "Support"),
            ("GMAIL_API_BASE", "http://127.0.0.1:9/gmail/v1/"),
        ])
        .unwrap();

        match cfg.mailbox_config().unwrap() {
            MailboxConfig::Gmail(gmail) => {
                assert_eq!(gmail.access_token.expose_secret(), "ya29.token");
                assert_eq!(gmail.label, "Support");
                assert_eq!(gmail.base_url, "http://127.0.0.1:9/gmail/v1");
            }
            other => panic!("Expected Gmail config, got {other:?}"),
        }
    }

    #[test]
    fn gmail_token_file_path_comes_from_the_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"token": "from-file"}"#).unwrap();

        let cfg = config(&[("GMAIL_TOKEN_PATH", path.to_str().unwrap())]).unwrap();
        match cfg.mailbox_config().unwrap() {
            MailboxConfig::Gmail(gmail) => assert_eq!(gmail.access_token.expose_secret(), "from-file"),
            other => panic!("Expected Gmail config, got {other:?}"),
        }

        let missing = dir.path().join("absent.json");
        let cfg = config(&[("GMAIL_TOKEN_PATH", missing.to_str().unwrap())]).unwrap();
        match cfg.mailbox_config().unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "GMAIL_ACCESS_TOKEN"),
            other => panic!("Expected MissingRequired, got {other:?}"),
        }
    }
}
