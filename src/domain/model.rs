use chrono::{DateTime, Utc};
use std::fmt;

/// Account login, immutable for the lifetime of the process.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Multiplication glyphs the OCR backend emits for the portal's "×".
pub const MULTIPLY_GLYPHS: [char; 4] = ['x', 'X', '*', '×'];

/// A decoded arithmetic CAPTCHA: `<left><×><right>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub decoded_text: String,
    pub left_operand: u64,
    pub right_token: char,
}

impl CaptchaChallenge {
    /// Letters extend the digits the base-36 way: A=10 ... Z=35.
    pub fn right_operand(&self) -> Option<u64> {
        let token = self.right_token.to_ascii_uppercase();
        match token {
            '0'..='9' => token.to_digit(10).map(u64::from),
            'A'..='Z' => Some(u64::from(token as u8 - b'A') + 10),
            _ => None,
        }
    }

    pub fn answer(&self) -> Option<u64> {
        self.left_operand.checked_mul(self.right_operand()?)
    }
}

/// One row of the account's order table, snapshotted once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: String,
    pub renewable: bool,
}

impl Order {
    pub fn new(order_id: impl Into<String>, renewable: bool) -> Self {
        Self {
            order_id: order_id.into(),
            renewable,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PinCode {
    pub value: String,
    pub received_at: Option<DateTime<Utc>>,
}

impl PinCode {
    pub fn new(value: impl Into<String>, received_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            received_at,
        }
    }

    /// True when the message arrived before `triggered_at - skew`,
    /// i.e. it was sent for an earlier action.
    pub fn is_older_than(&self, triggered_at: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.received_at
            .map(|received| received < triggered_at - skew)
            .unwrap_or(false)
    }
}

impl fmt::Debug for PinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinCode")
            .field("value", &"******")
            .field("received_at", &self.received_at)
            .finish()
    }
}

/// Single-use credential for the extension submit that immediately follows.
#[derive(Debug, PartialEq, Eq)]
pub struct RenewalToken {
    pub value: String,
    pub order_id: String,
    pub action: String,
}

/// Stages of the per-order renewal protocol, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStage {
    OrderSelected,
    PinDialogTriggered,
    PinRetrieved,
    TokenObtained,
    ExtensionSubmitted,
}

impl fmt::Display for RenewalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenewalStage::OrderSelected => "order selection",
            RenewalStage::PinDialogTriggered => "PIN dialog",
            RenewalStage::PinRetrieved => "PIN retrieval",
            RenewalStage::TokenObtained => "token request",
            RenewalStage::ExtensionSubmitted => "extension submit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalOutcome {
    pub order_id: String,
    pub succeeded: bool,
    pub reason: String,
    /// Stage reached on success, or the stage that failed.
    pub stage: RenewalStage,
}

impl RenewalOutcome {
    pub fn success(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            succeeded: true,
            reason: reason.into(),
            stage: RenewalStage::ExtensionSubmitted,
        }
    }

    pub fn failure(order_id: impl Into<String>, stage: RenewalStage, reason: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            succeeded: false,
            reason: reason.into(),
            stage,
        }
    }
}

/// Everything a run produced, handed to the binary for the final summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub orders_seen: usize,
    pub outcomes: Vec<RenewalOutcome>,
    pub skipped: Vec<String>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}
