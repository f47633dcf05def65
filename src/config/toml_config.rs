use crate::core::auth::AuthPolicy;
use crate::core::renewal::RenewalTiming;
use crate::domain::model::Credentials;
use crate::utils::error::{RenewError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORTAL_URL: &str = "https://support.euserv.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.61 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Sent as `Origin`; defaults to the portal's marketing site like a browser would.
    pub origin: String,
    pub request_timeout_seconds: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PORTAL_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            origin: "https://www.euserv.com".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl PortalConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}/index.iphp", self.base_url.trim_end_matches('/'))
    }

    pub fn captcha_url(&self) -> String {
        format!("{}/securimage_show.php", self.base_url.trim_end_matches('/'))
    }

    pub fn logo_url(&self) -> String {
        format!("{}/pic/logo_small.png", self.base_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub server: String,
    pub port: u16,
    /// Falls back to the account email when unset.
    pub username: Option<String>,
    pub password: Option<String>,
    pub sender: String,
    pub folder: String,
    pub timeout_seconds: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            server: "imap.gmail.com".to_string(),
            port: 993,
            username: None,
            password: None,
            sender: "no-reply@euserv.com".to_string(),
            folder: "INBOX".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("sender", &self.sender)
            .field("folder", &self.folder)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_base: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("telegram_bot_token", &self.telegram_bot_token.as_ref().map(|_| "***"))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("telegram_api_base", &self.telegram_api_base)
            .finish()
    }
}

impl NotificationConfig {
    /// Both Telegram values, or `None` when notification is disabled.
    pub fn telegram(&self) -> Option<(&str, &str)> {
        let token = present(&self.telegram_bot_token)?;
        let chat_id = present(&self.telegram_chat_id)?;
        Some((token, chat_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub login_attempts: u32,
    pub login_retry_delay_seconds: u64,
    pub pin_settle_seconds: u64,
    pub pin_attempts: u32,
    pub pin_retry_delay_seconds: u64,
    pub pin_clock_skew_seconds: u64,
    pub token_settle_seconds: u64,
    pub extension_settle_seconds: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            login_attempts: 3,
            login_retry_delay_seconds: 5,
            pin_settle_seconds: 3,
            pin_attempts: 3,
            pin_retry_delay_seconds: 5,
            pin_clock_skew_seconds: 120,
            token_settle_seconds: 3,
            extension_settle_seconds: 3,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty() && !validation::is_unresolved_placeholder(v.trim()))
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RenewError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text after `${VAR}` substitution.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| RenewError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Assembles a configuration from the process environment alone.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.account.email = env_opt("EUSERV_EMAIL");
        config.account.password = env_opt("EUSERV_PASSWORD");

        if let Some(base_url) = env_opt("PORTAL_BASE_URL") {
            config.portal.base_url = base_url;
        }

        if let Some(server) = env_opt("IMAP_SERVER") {
            config.mailbox.server = server;
        }
        config.mailbox.username = env_opt("IMAP_USERNAME");
        config.mailbox.password = env_opt("EMAIL_PASS");

        config.notification.telegram_bot_token = env_opt("TG_BOT_TOKEN");
        config.notification.telegram_chat_id = env_opt("TG_CHAT_ID");

        config
    }

    /// Replaces `${VAR}` with the environment value; unset variables are left as is.
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        use std::sync::LazyLock;

        static ENV_VAR: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Account credentials; their absence is a startup precondition failure.
    pub fn credentials(&self) -> Result<Credentials> {
        let email = validation::validate_required_field("account.email", &self.account.email)?;
        let password =
            validation::validate_required_field("account.password", &self.account.password)?;
        Ok(Credentials::new(email, password))
    }

    pub fn mailbox_username(&self) -> Option<&str> {
        present(&self.mailbox.username).or_else(|| present(&self.account.email))
    }

    pub fn mailbox_password(&self) -> Option<&str> {
        present(&self.mailbox.password)
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            attempts: self.timing.login_attempts,
            retry_delay: Duration::from_secs(self.timing.login_retry_delay_seconds),
        }
    }

    pub fn renewal_timing(&self) -> RenewalTiming {
        let t = &self.timing;
        RenewalTiming {
            pin_settle: Duration::from_secs(t.pin_settle_seconds),
            pin_attempts: t.pin_attempts,
            pin_retry_delay: Duration::from_secs(t.pin_retry_delay_seconds),
            pin_clock_skew: Duration::from_secs(t.pin_clock_skew_seconds),
            token_settle: Duration::from_secs(t.token_settle_seconds),
            extension_settle: Duration::from_secs(t.extension_settle_seconds),
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        self.credentials()?;

        validation::validate_url("portal.base_url", &self.portal.base_url)?;
        validation::validate_non_empty_string("portal.user_agent", &self.portal.user_agent)?;
        validation::validate_positive_number(
            "portal.request_timeout_seconds",
            self.portal.request_timeout_seconds as usize,
            1,
        )?;

        validation::validate_url(
            "notification.telegram_api_base",
            &self.notification.telegram_api_base,
        )?;

        validation::validate_non_empty_string("mailbox.server", &self.mailbox.server)?;
        validation::validate_range("mailbox.port", self.mailbox.port, 1, u16::MAX)?;
        validation::validate_non_empty_string("mailbox.sender", &self.mailbox.sender)?;
        validation::validate_positive_number(
            "mailbox.timeout_seconds",
            self.mailbox.timeout_seconds as usize,
            1,
        )?;

        validation::validate_range("timing.login_attempts", self.timing.login_attempts, 1, 10)?;
        validation::validate_range("timing.pin_attempts", self.timing.pin_attempts, 1, 10)?;

        if self.mailbox_password().is_none() {
            tracing::warn!("⚠️ No mailbox password configured; PIN retrieval will fail");
        }
        if self.notification.telegram().is_none() {
            tracing::info!("Telegram not configured, notifications disabled");
        }

        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_secrets_are_not_trimmed() {
        let config = AppConfig::from_toml_str(
            r#"
[account]
email = "user@example.com"
password = " hunter2 "

[mailbox]
password = "abcd efgh ijkl mnop "
"#,
        )
        .unwrap();

        assert_eq!(config.credentials().unwrap().password, " hunter2 ");
        assert_eq!(config.mailbox_password(), Some("abcd efgh ijkl mnop "));
    }

    #[test]
    fn test_parse_full_toml_config() {
        let toml_content = r#"
[account]
email = "user@example.com"
password = "hunter2"

[portal]
base_url = "http://127.0.0.1:9000"

[mailbox]
server = "imap.example.com"
password = "app-password"

[notification]
telegram_bot_token = "123:abc"
telegram_chat_id = "42"

[timing]
login_attempts = 2
pin_settle_seconds = 10
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.credentials().unwrap().email, "user@example.com");
        assert_eq!(config.portal.index_url(), "http://127.0.0.1:9000/index.iphp");
        assert_eq!(config.mailbox.port, 993);
        assert_eq!(config.mailbox.timeout_seconds, 30);
        assert_eq!(config.mailbox_username(), Some("user@example.com"));
        assert_eq!(config.notification.telegram(), Some(("123:abc", "42")));
        assert_eq!(config.auth_policy().attempts, 2);
        assert_eq!(config.renewal_timing().pin_settle, Duration::from_secs(10));
        assert_eq!(config.timing.token_settle_seconds, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_portal() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(
            config.portal.captcha_url(),
            "https://support.euserv.com/securimage_show.php"
        );
        assert_eq!(config.mailbox.sender, "no-reply@euserv.com");
        assert_eq!(config.auth_policy().attempts, 3);
        assert_eq!(config.auth_policy().retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("RENEW_TEST_ACCOUNT_PASSWORD", "from-env");

        let toml_content = r#"
[account]
email = "user@example.com"
password = "${RENEW_TEST_ACCOUNT_PASSWORD}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.credentials().unwrap().password, "from-env");

        std::env::remove_var("RENEW_TEST_ACCOUNT_PASSWORD");
    }

    #[test]
    fn test_missing_credentials_fail_validation() {
        let toml_content = r#"
[account]
email = "user@example.com"
password = "${RENEW_TEST_UNSET_PASSWORD}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        match config.validate() {
            Err(RenewError::MissingConfigError { field }) => assert_eq!(field, "account.password"),
            other => panic!("expected MissingConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_telegram_config_disables_notification() {
        let toml_content = r#"
[notification]
telegram_bot_token = "123:abc"
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(config.notification.telegram().is_none());
    }

    #[test]
    fn test_invalid_base_url_fails_validation() {
        let toml_content = r#"
[account]
email = "user@example.com"
password = "hunter2"

[portal]
base_url = "support.euserv.com"
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(RenewError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();

        let toml_content = r#"
[account]
email = "file@example.com"
password = "secret"
"#;

        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.account.email.as_deref(), Some("file@example.com"));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let config = AppConfig::from_toml_str(
            r#"
[account]
email = "user@example.com"
password = "hunter2"
"#,
        )
        .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
