use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenewError {
    #[error("HTTP request failed: {0}")]
    TransportError(#[from] reqwest::Error),

    #[error("Portal returned HTTP {status} for {url}")]
    HttpStatusError { status: u16, url: String },

    #[error("Unexpected portal response during {step}: {message}")]
    ProtocolMismatchError { step: String, message: String },

    #[error("No session id found on the login page")]
    SessionIdMissing,

    #[error("CAPTCHA could not be solved")]
    CaptchaUnsolved,

    #[error("CAPTCHA answer was rejected by the portal")]
    CaptchaRejected,

    #[error("Login was not accepted by the portal")]
    LoginRejected,

    #[error("No PIN retrieved for order {order_id}")]
    PinUnavailable { order_id: String },

    #[error("Token request rejected (status: {status}){}", token_detail(.error))]
    TokenRejected {
        status: String,
        error: Option<String>,
    },

    #[error("Portal session expired during {step}")]
    SessionExpired { step: String },

    #[error("Authentication failed after {attempts} attempts: {last_error}")]
    AuthenticationExhausted { attempts: u32, last_error: String },

    #[error("Mailbox error: {message}")]
    MailboxError { message: String },

    #[error("OCR backend failed: {message}")]
    OcrError { message: String },

    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid configuration value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },
}

fn token_detail(error: &Option<String>) -> String {
    error
        .as_deref()
        .map(|e| format!(": {}", e))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Captcha,
    Pin,
    Session,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RenewError {
    pub fn protocol(step: &str, message: impl Into<String>) -> Self {
        RenewError::ProtocolMismatchError {
            step: step.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RenewError::TransportError(_) | RenewError::HttpStatusError { .. } => {
                ErrorCategory::Transport
            }
            RenewError::ProtocolMismatchError { .. }
            | RenewError::SessionIdMissing
            | RenewError::LoginRejected
            | RenewError::TokenRejected { .. }
            | RenewError::SerializationError(_) => ErrorCategory::Protocol,
            RenewError::CaptchaUnsolved
            | RenewError::CaptchaRejected
            | RenewError::OcrError { .. }
            | RenewError::ImageError(_) => ErrorCategory::Captcha,
            RenewError::PinUnavailable { .. } | RenewError::MailboxError { .. } => {
                ErrorCategory::Pin
            }
            RenewError::SessionExpired { .. } | RenewError::AuthenticationExhausted { .. } => {
                ErrorCategory::Session
            }
            RenewError::MissingConfigError { .. }
            | RenewError::InvalidConfigValueError { .. }
            | RenewError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            RenewError::IoError(_) => ErrorCategory::System,
        }
    }

    /// Only authentication exhaustion and configuration problems end a run.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RenewError::MissingConfigError { .. }
            | RenewError::InvalidConfigValueError { .. }
            | RenewError::ConfigValidationError { .. } => ErrorSeverity::Critical,
            RenewError::AuthenticationExhausted { .. } | RenewError::IoError(_) => {
                ErrorSeverity::High
            }
            RenewError::TransportError(_)
            | RenewError::HttpStatusError { .. }
            | RenewError::CaptchaUnsolved
            | RenewError::CaptchaRejected
            | RenewError::SessionExpired { .. } => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Transport => format!("Could not reach the portal: {}", self),
            ErrorCategory::Protocol => format!("The portal answered unexpectedly: {}", self),
            ErrorCategory::Captcha => format!("CAPTCHA handling failed: {}", self),
            ErrorCategory::Pin => format!("PIN retrieval failed: {}", self),
            ErrorCategory::Session => format!("Login failed: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            RenewError::MissingConfigError { .. } => {
                "Set EUSERV_EMAIL and EUSERV_PASSWORD or provide them in the [account] section"
            }
            RenewError::InvalidConfigValueError { .. }
            | RenewError::ConfigValidationError { .. } => {
                "Check the configuration file against config.example.toml"
            }
            RenewError::AuthenticationExhausted { .. } => {
                "Verify the account credentials and that the tesseract binary is installed, then retry later"
            }
            RenewError::PinUnavailable { .. } | RenewError::MailboxError { .. } => {
                "Check the IMAP credentials (an app password is usually required) and increase pin_settle_seconds"
            }
            RenewError::CaptchaUnsolved
            | RenewError::CaptchaRejected
            | RenewError::OcrError { .. }
            | RenewError::ImageError(_) => "Retry the run; every attempt gets a fresh CAPTCHA",
            RenewError::TransportError(_) | RenewError::HttpStatusError { .. } => {
                "Check network connectivity and the portal base URL"
            }
            RenewError::SessionExpired { .. } => "Retry the run to start a fresh session",
            _ => "Run again with --verbose and inspect the portal response",
        }
    }
}

pub type Result<T> = std::result::Result<T, RenewError>;
