//! Configuration management
//!
//! Settings are resolved in this order of precedence:
//! 1. Environment variables
//! 2. `qs-gateway.toml`
//! 3. Defaults
//!
//! `${VAR_NAME}` inside the config file is expanded from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Error;

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Claude API
    #[default]
    Claude,
    /// OpenAI-compatible API
    OpenAi,
}

impl LlmProvider {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "openai" | "glm" | "zai" | "minimax" => LlmProvider::OpenAi,
            _ => LlmProvider::Claude,
        }
    }
}

/// Item store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Gmail mailbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Where the OAuth token is persisted
    pub token_path: String,
    /// Extra Gmail search terms appended to the `after:` filter
    pub query: Option<String>,
    /// Per-request timeout for Gmail and the OAuth token endpoint
    pub timeout_secs: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            token_path: default_token_path(),
            query: None,
            timeout_secs: default_mailbox_timeout(),
        }
    }
}

/// Extraction (LLM) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Claude,
            api_key: String::new(),
            model: default_model(),
            base_url: None,
            timeout_secs: default_extraction_timeout(),
        }
    }
}

/// Monitoring scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between cycle starts
    pub interval_secs: u64,
    /// Upper bound on new messages fetched per cycle
    pub max_messages_per_cycle: usize,
    /// Timeout for one mailbox fetch
    pub fetch_timeout_secs: u64,
    /// Start monitoring at boot when the mailbox is already authenticated
    pub autostart: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_messages_per_cycle: default_max_messages(),
            fetch_timeout_secs: default_fetch_timeout(),
            autostart: true,
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key for mutating endpoints
    pub key: Option<String>,

    /// Port for HTTP API server
    pub port: u16,

    /// Allowed CORS origins; permissive when unset
    pub allowed_origins: Option<Vec<String>>,

    /// Where the OAuth callback redirects the browser afterwards
    pub frontend_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: None,
            port: default_api_port(),
            allowed_origins: None,
            frontend_url: default_frontend_url(),
        }
    }
}

/// Main configuration for qs-gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub mailbox: MailboxConfig,
    pub extraction: ExtractionConfig,
    pub monitor: MonitorConfig,
    pub api: ApiConfig,
}

fn default_db_path() -> String {
    "data/quotesnap.db".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:5000/api/auth/callback".to_string()
}

fn default_token_path() -> String {
    "data/gmail_token.json".to_string()
}

fn default_mailbox_timeout() -> u64 {
    30
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_extraction_timeout() -> u64 {
    60
}

fn default_interval() -> u64 {
    30
}

fn default_max_messages() -> usize {
    50
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_api_port() -> u16 {
    5000
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

impl Config {
    /// Expand `${VAR_NAME}` from the environment; unknown variables become empty.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let toml: TomlConfig = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        Ok(Self::from_toml_config(toml))
    }

    /// Load `./qs-gateway.toml` if present, otherwise environment only.
    pub fn load() -> crate::Result<Self> {
        if Path::new("qs-gateway.toml").exists() {
            return Self::from_toml_file("qs-gateway.toml");
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn from_toml_config(toml: TomlConfig) -> Self {
        let store = toml.store.unwrap_or_default();
        let mailbox = toml.mailbox.unwrap_or_default();
        let extraction = toml.extraction.unwrap_or_default();
        let monitor = toml.monitor.unwrap_or_default();
        let api = toml.api.unwrap_or_default();

        Config {
            store: StoreConfig {
                db_path: store.db_path.unwrap_or_else(default_db_path),
            },
            mailbox: MailboxConfig {
                client_id: mailbox.client_id.unwrap_or_default(),
                client_secret: mailbox.client_secret.unwrap_or_default(),
                redirect_uri: mailbox.redirect_uri.unwrap_or_else(default_redirect_uri),
                token_path: mailbox.token_path.unwrap_or_else(default_token_path),
                query: mailbox.query.filter(|q| !q.is_empty()),
                timeout_secs: mailbox.timeout_secs.unwrap_or_else(default_mailbox_timeout),
            },
            extraction: ExtractionConfig {
                provider: extraction
                    .provider
                    .as_deref()
                    .map(LlmProvider::parse)
                    .unwrap_or_default(),
                api_key: extraction.api_key.unwrap_or_default(),
                model: extraction.model.unwrap_or_else(default_model),
                base_url: extraction.base_url,
                timeout_secs: extraction
                    .timeout_secs
                    .unwrap_or_else(default_extraction_timeout),
            },
            monitor: MonitorConfig {
                interval_secs: monitor.interval_secs.unwrap_or_else(default_interval),
                max_messages_per_cycle: monitor
                    .max_messages_per_cycle
                    .unwrap_or_else(default_max_messages),
                fetch_timeout_secs: monitor
                    .fetch_timeout_secs
                    .unwrap_or_else(default_fetch_timeout),
                autostart: monitor.autostart.unwrap_or(true),
            },
            api: ApiConfig {
                key: api.key.filter(|k| !k.is_empty()),
                port: api.port.unwrap_or_else(default_api_port),
                allowed_origins: api.allowed_origins,
                frontend_url: api.frontend_url.unwrap_or_else(default_frontend_url),
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(path) = env_non_empty("DATABASE_PATH") {
            self.store.db_path = path;
        }

        if let Some(id) = env_non_empty("GMAIL_CLIENT_ID") {
            self.mailbox.client_id = id;
        }
        if let Some(secret) = env_non_empty("GMAIL_CLIENT_SECRET") {
            self.mailbox.client_secret = secret;
        }
        if let Some(uri) = env_non_empty("GMAIL_REDIRECT_URI") {
            self.mailbox.redirect_uri = uri;
        }
        if let Some(path) = env_non_empty("GMAIL_TOKEN_PATH") {
            self.mailbox.token_path = path;
        }

        if let Some(key) = env_non_empty("LLM_API_KEY").or_else(|| env_non_empty("OPENAI_API_KEY")) {
            self.extraction.api_key = key;
        }
        if let Some(provider) = env_non_empty("LLM_PROVIDER") {
            self.extraction.provider = LlmProvider::parse(&provider);
        }
        if let Some(model) = env_non_empty("LLM_MODEL") {
            self.extraction.model = model;
        }
        if let Some(base_url) = env_non_empty("LLM_BASE_URL") {
            self.extraction.base_url = Some(base_url);
        }

        if let Some(secs) = env_non_empty("EMAIL_CHECK_INTERVAL").and_then(|v| v.parse().ok()) {
            self.monitor.interval_secs = secs;
        }
        if let Some(max) = env_non_empty("MAX_EMAILS_PER_CHECK").and_then(|v| v.parse().ok()) {
            self.monitor.max_messages_per_cycle = max;
        }

        if let Some(key) = env_non_empty("API_KEY") {
            self.api.key = Some(key);
        }
        if let Some(port) = env_non_empty("API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }
        if let Some(url) = env_non_empty("FRONTEND_URL") {
            self.api.frontend_url = url;
        }
    }

    /// Check settings that would make the service useless if missing
    pub fn validate(&self) -> crate::Result<()> {
        if self.monitor.interval_secs == 0 {
            return Err(Error::Config("monitor.interval_secs must be positive".into()));
        }
        if self.monitor.max_messages_per_cycle == 0 {
            return Err(Error::Config(
                "monitor.max_messages_per_cycle must be positive".into(),
            ));
        }
        if self.extraction.api_key.is_empty() {
            return Err(Error::Config(
                "LLM_API_KEY (or extraction.api_key) not set".into(),
            ));
        }
        Ok(())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ============================================================================
// TOML file structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    store: Option<TomlStoreConfig>,
    mailbox: Option<TomlMailboxConfig>,
    extraction: Option<TomlExtractionConfig>,
    monitor: Option<TomlMonitorConfig>,
    api: Option<TomlApiConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlStoreConfig {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlMailboxConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    token_path: Option<String>,
    query: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlExtractionConfig {
    /// "claude" or "openai"
    provider: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlMonitorConfig {
    interval_secs: Option<u64>,
    max_messages_per_cycle: Option<usize>,
    fetch_timeout_secs: Option<u64>,
    autostart: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlApiConfig {
    key: Option<String>,
    port: Option<u16>,
    allowed_origins: Option<Vec<String>>,
    frontend_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.db_path, "data/quotesnap.db");
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.monitor.max_messages_per_cycle, 50);
        assert!(config.monitor.autostart);
        assert_eq!(config.api.port, 5000);
        assert!(config.api.key.is_none());
        assert_eq!(config.extraction.provider, LlmProvider::Claude);
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProvider::parse("OpenAI"), LlmProvider::OpenAi);
        assert_eq!(LlmProvider::parse("glm"), LlmProvider::OpenAi);
        assert_eq!(LlmProvider::parse("claude"), LlmProvider::Claude);
        assert_eq!(LlmProvider::parse("anything"), LlmProvider::Claude);
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("QS_GATEWAY_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${QS_GATEWAY_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${QS_GATEWAY_NONEXISTENT}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("QS_GATEWAY_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(Config::expand_env_vars("no_vars_here"), "no_vars_here");
        assert_eq!(Config::expand_env_vars("cost $5"), "cost $5");
        assert_eq!(Config::expand_env_vars("${}_content"), "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[store]
db_path = "/var/lib/qs/items.db"

[mailbox]
client_id = "cid"
client_secret = "secret"
query = "in:inbox"
timeout_secs = 15

[extraction]
provider = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"
timeout_secs = 20

[monitor]
interval_secs = 120
max_messages_per_cycle = 10
autostart = false

[api]
port = 8080
key = "api_key"
frontend_url = "https://quotes.example.com"
"#;

        let config = Config::from_toml_str(toml_content).unwrap();
        assert_eq!(config.store.db_path, "/var/lib/qs/items.db");
        assert_eq!(config.mailbox.client_id, "cid");
        assert_eq!(config.mailbox.query.as_deref(), Some("in:inbox"));
        assert_eq!(config.mailbox.token_path, "data/gmail_token.json");
        assert_eq!(config.mailbox.timeout_secs, 15);
        assert_eq!(config.extraction.provider, LlmProvider::OpenAi);
        assert_eq!(config.extraction.model, "gpt-4o-mini");
        assert_eq!(config.extraction.timeout_secs, 20);
        assert_eq!(config.monitor.interval_secs, 120);
        assert_eq!(config.monitor.max_messages_per_cycle, 10);
        assert_eq!(config.monitor.fetch_timeout_secs, 30);
        assert!(!config.monitor.autostart);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.key.as_deref(), Some("api_key"));
        assert_eq!(config.api.frontend_url, "https://quotes.example.com");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.monitor.max_messages_per_cycle, 50);
        assert_eq!(config.mailbox.timeout_secs, 30);
        assert_eq!(config.api.frontend_url, "http://localhost:3000");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[monitor\ninterval_secs = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.extraction.api_key = "key".into();
        assert!(config.validate().is_ok());

        config.monitor.interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
