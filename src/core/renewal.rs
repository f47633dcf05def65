//! Per-order contract extension.
//!
//! The portal gates the extension behind a PIN it emails to the account
//! holder. The flow primes the order, triggers that email, reads the PIN
//! back from the mailbox, trades it for a single-use token, and submits
//! the extension with the token. Every step is paced with a settle delay
//! because the portal's side effects land asynchronously.

use crate::core::session::PortalSession;
use crate::domain::model::{PinCode, RenewalOutcome, RenewalStage, RenewalToken};
use crate::domain::ports::PinSource;
use crate::utils::error::{RenewError, Result};
use crate::utils::logger::redact;
use chrono::Utc;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

pub const EXTEND_CONTRACT_PREFIX: &str = "kc2_customer_contract_details_extend_contract_";
const EXTEND_CONTRACT_TERM: &str = "kc2_customer_contract_details_extend_contract_term";
const SECURITY_ACTION_TYPE: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalTiming {
    /// Wait between triggering the PIN email and the first mailbox check.
    pub pin_settle: Duration,
    pub pin_attempts: u32,
    /// First back-off between mailbox checks; doubles each time.
    pub pin_retry_delay: Duration,
    /// Tolerated clock difference between the mail server and this host.
    pub pin_clock_skew: Duration,
    pub token_settle: Duration,
    pub extension_settle: Duration,
}

impl Default for RenewalTiming {
    fn default() -> Self {
        Self {
            pin_settle: Duration::from_secs(3),
            pin_attempts: 3,
            pin_retry_delay: Duration::from_secs(5),
            pin_clock_skew: Duration::from_secs(120),
            token_settle: Duration::from_secs(3),
            extension_settle: Duration::from_secs(3),
        }
    }
}

type StepResult<T> = std::result::Result<T, (RenewalStage, RenewError)>;

trait AtStage<T> {
    fn at(self, stage: RenewalStage) -> StepResult<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: RenewalStage) -> StepResult<T> {
        self.map_err(|e| (stage, e))
    }
}

pub struct RenewalFlow<P: PinSource> {
    pins: P,
    timing: RenewalTiming,
    /// PIN consumed by the previous order; the mailbox may still show it as newest.
    last_pin: Mutex<Option<PinCode>>,
}

impl<P: PinSource> RenewalFlow<P> {
    pub fn new(pins: P, timing: RenewalTiming) -> Self {
        Self {
            pins,
            timing,
            last_pin: Mutex::new(None),
        }
    }

    /// Drives one order through the extension protocol. Failures end only
    /// this order; the session stays usable unless the portal logged it out.
    pub async fn renew(&self, session: &mut PortalSession, order_id: &str) -> RenewalOutcome {
        tracing::info!("🔄 Renewing order {}...", order_id);

        match self.run_steps(session, order_id).await {
            Ok(()) => {
                tracing::info!("✅ Order {} renewed", order_id);
                RenewalOutcome::success(order_id, "extension submitted")
            }
            Err((stage, e)) => {
                tracing::error!("❌ Order {} failed at {}: {}", order_id, stage, e);
                RenewalOutcome::failure(order_id, stage, e.to_string())
            }
        }
    }

    async fn run_steps(&self, session: &mut PortalSession, order_id: &str) -> StepResult<()> {
        self.select_order(session, order_id)
            .await
            .at(RenewalStage::OrderSelected)?;

        let triggered_at = Utc::now();
        self.trigger_pin_dialog(session)
            .await
            .at(RenewalStage::PinDialogTriggered)?;

        let pin = self
            .await_pin(order_id, triggered_at)
            .await
            .at(RenewalStage::PinRetrieved)?;

        let token = self
            .request_token(session, order_id, &pin)
            .await
            .at(RenewalStage::TokenObtained)?;
        tokio::time::sleep(self.timing.token_settle).await;

        self.submit_extension(session, token)
            .await
            .at(RenewalStage::ExtensionSubmitted)?;
        tokio::time::sleep(self.timing.extension_settle).await;

        Ok(())
    }

    /// Primes server-side state only; nothing in the response is checked
    /// beyond the status and the session still being alive.
    async fn select_order(&self, session: &mut PortalSession, order_id: &str) -> Result<()> {
        tracing::info!("Step 1: selecting order {}", order_id);
        let html = session
            .post_action(&[
                ("Submit", "Extend contract"),
                ("ord_no", order_id),
                ("subaction", "choose_order"),
                ("show_contract_extension", "1"),
                ("choose_order_subaction", "show_contract_details"),
            ])
            .await?;
        session.ensure_still_authenticated(&html, "order selection")
    }

    async fn trigger_pin_dialog(&self, session: &mut PortalSession) -> Result<()> {
        tracing::info!("Step 2: requesting PIN email");
        let response = session
            .post_action(&[
                ("subaction", "show_kc2_security_password_dialog"),
                ("prefix", EXTEND_CONTRACT_PREFIX),
                ("type", SECURITY_ACTION_TYPE),
            ])
            .await?;
        tracing::debug!(
            "PIN dialog response: {}",
            response.chars().take(500).collect::<String>()
        );
        session.ensure_still_authenticated(&response, "PIN dialog")
    }

    /// Waits for delivery, then polls the mailbox with exponential back-off.
    ///
    /// Two PINs are skipped: one dated more than `pin_clock_skew` before the
    /// dialog was triggered, and the one already consumed by the previous
    /// order. The skew check alone cannot tell back-to-back orders apart.
    async fn await_pin(&self, order_id: &str, triggered_at: chrono::DateTime<Utc>) -> Result<PinCode> {
        tokio::time::sleep(self.timing.pin_settle).await;

        let skew = chrono::Duration::from_std(self.timing.pin_clock_skew)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let attempts = self.timing.pin_attempts.max(1);
        let mut delay = self.timing.pin_retry_delay;

        for attempt in 1..=attempts {
            tracing::info!("Step 3: checking mailbox for PIN ({}/{})", attempt, attempts);
            match self.pins.fetch_latest_pin().await {
                Some(pin) if pin.is_older_than(triggered_at, skew) => {
                    tracing::warn!("⚠️ Newest PIN email predates the request, waiting for a fresh one");
                }
                Some(pin) if self.was_consumed(&pin) => {
                    tracing::warn!("⚠️ Newest PIN was already used for the previous order, waiting for a fresh one");
                }
                Some(pin) => {
                    tracing::info!("✅ PIN retrieved");
                    self.remember(&pin);
                    return Ok(pin);
                }
                None => tracing::warn!("No PIN email found yet"),
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(RenewError::PinUnavailable {
            order_id: order_id.to_string(),
        })
    }

    fn was_consumed(&self, pin: &PinCode) -> bool {
        self.last_pin
            .lock()
            .map(|last| last.as_ref() == Some(pin))
            .unwrap_or(false)
    }

    fn remember(&self, pin: &PinCode) {
        if let Ok(mut last) = self.last_pin.lock() {
            *last = Some(pin.clone());
        }
    }

    async fn request_token(
        &self,
        session: &mut PortalSession,
        order_id: &str,
        pin: &PinCode,
    ) -> Result<RenewalToken> {
        tracing::info!("Step 4: exchanging PIN for a token");
        let ident = format!("{}{}", EXTEND_CONTRACT_PREFIX, order_id);
        let body = session
            .post_action(&[
                ("auth", pin.value.as_str()),
                ("subaction", "kc2_security_password_get_token"),
                ("prefix", EXTEND_CONTRACT_PREFIX),
                ("type", SECURITY_ACTION_TYPE),
                ("ident", ident.as_str()),
            ])
            .await?;
        session.ensure_still_authenticated(&body, "token request")?;

        let token = Self::parse_token_response(&body, order_id)?;
        tracing::info!("✅ Got token {}", redact(&token.value, 8));
        Ok(token)
    }

    /// Only `rs` is trusted to have a fixed shape; everything else is read
    /// after the status says success.
    fn parse_token_response(body: &str, order_id: &str) -> Result<RenewalToken> {
        let response: Value = serde_json::from_str(body).map_err(|e| {
            RenewError::protocol("token request", format!("unparsable payload: {}", e))
        })?;

        let status = match response.get("rs") {
            Some(Value::String(rs)) => rs.clone(),
            Some(Value::Null) | None => "unknown".to_string(),
            Some(other) => other.to_string(),
        };
        if status != "success" {
            return Err(RenewError::TokenRejected {
                status,
                error: response
                    .get("error")
                    .filter(|e| !e.is_null())
                    .map(|e| match e {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
            });
        }

        let value = response
            .pointer("/token/value")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RenewError::protocol("token request", "success without token value"))?;

        Ok(RenewalToken {
            value: value.to_string(),
            order_id: order_id.to_string(),
            action: EXTEND_CONTRACT_TERM.to_string(),
        })
    }

    /// Consumes the token. The portal gives no machine-readable confirmation
    /// here, so a non-error response that is not the login page counts as
    /// success.
    async fn submit_extension(&self, session: &mut PortalSession, token: RenewalToken) -> Result<()> {
        tracing::info!("Step 5: submitting extension for order {}", token.order_id);
        let html = session
            .post_action(&[
                ("ord_id", token.order_id.as_str()),
                ("subaction", token.action.as_str()),
                ("auth", token.value.as_str()),
            ])
            .await?;
        session.ensure_still_authenticated(&html, "extension submit")
    }
}
