//! Login against the portal's HTML form, including the arithmetic CAPTCHA
//! the portal interposes after the credentials post.

use crate::core::session::PortalSession;
use crate::domain::model::Credentials;
use crate::domain::ports::CaptchaSolver;
use crate::utils::error::{RenewError, Result};
use crate::utils::logger::redact;
use std::fmt;
use std::time::Duration;

const GREETING_MARKER: &str = "Hello";
const ACCOUNT_MARKER: &str = "Confirm or change your customer data here";

/// Progress of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    SessionBootstrapped,
    CredentialsSubmitted,
    CaptchaPending,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct AuthenticationFlow<S: CaptchaSolver> {
    solver: S,
    credentials: Credentials,
    policy: AuthPolicy,
}

impl<S: CaptchaSolver> AuthenticationFlow<S> {
    pub fn new(solver: S, credentials: Credentials, policy: AuthPolicy) -> Self {
        Self {
            solver,
            credentials,
            policy,
        }
    }

    /// Runs full login attempts until one succeeds or the policy is exhausted.
    /// Every attempt restarts the session so it gets a fresh id and CAPTCHA.
    pub async fn authenticate(&self, session: &mut PortalSession) -> Result<()> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tracing::info!("🔁 Login attempt {}/{}", attempt, attempts);
            }

            match self.attempt(session).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("❌ Login attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                tracing::info!("Waiting {:?} before retrying login", self.policy.retry_delay);
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(RenewError::AuthenticationExhausted {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    /// One pass through the login state machine, starting from `Anonymous`.
    pub async fn attempt(&self, session: &mut PortalSession) -> Result<()> {
        session.restart()?;
        let index_url = session.config().index_url();
        let mut state = AuthState::Anonymous;

        let result = self.drive(session, &index_url, &mut state).await;
        match &result {
            Ok(()) => {
                session.mark_authenticated();
                tracing::info!("✅ Logged in (state: {})", AuthState::Authenticated);
            }
            Err(e) => {
                tracing::debug!("Login stopped in state {} -> {}: {}", state, AuthState::Failed, e);
            }
        }
        result
    }

    async fn drive(
        &self,
        session: &mut PortalSession,
        index_url: &str,
        state: &mut AuthState,
    ) -> Result<()> {
        tracing::info!("Logging in to {}", index_url);
        let login_page = session.get(index_url).await?;
        let session_id =
            PortalSession::extract_session_id(&login_page).ok_or(RenewError::SessionIdMissing)?;
        tracing::info!("Got sess_id {}", redact(&session_id, 20));
        session.adopt_session_id(session_id);
        *state = AuthState::SessionBootstrapped;

        // Mirrors a browser loading the logo after the login page.
        if let Err(e) = session.get_bytes(&session.config().logo_url()).await {
            tracing::debug!("Logo fetch failed (ignored): {}", e);
        }

        let mut response = session
            .post(
                index_url,
                &[
                    ("email", self.credentials.email.as_str()),
                    ("password", self.credentials.password.as_str()),
                    ("form_selected_language", "en"),
                    ("Submit", "Login"),
                    ("subaction", "login"),
                ],
            )
            .await?;
        *state = AuthState::CredentialsSubmitted;

        if PortalSession::shows_captcha(&response) {
            *state = AuthState::CaptchaPending;
            tracing::info!("⚠️ CAPTCHA required, solving...");
            response = self.submit_captcha(session, index_url).await?;
        }

        if Self::is_authenticated_page(&response) {
            Ok(())
        } else {
            tracing::debug!(
                "Login response preview: {}",
                response.chars().take(500).collect::<String>()
            );
            Err(RenewError::LoginRejected)
        }
    }

    async fn submit_captcha(&self, session: &PortalSession, index_url: &str) -> Result<String> {
        let image = session.get_bytes(&session.config().captcha_url()).await?;
        let answer = self
            .solver
            .solve(&image)
            .await
            .ok_or(RenewError::CaptchaUnsolved)?;
        tracing::info!("CAPTCHA answer: {}", answer);

        let response = session
            .post(
                index_url,
                &[("subaction", "login"), ("captcha_code", answer.as_str())],
            )
            .await?;

        // Same image is never re-read; a wrong answer ends this attempt.
        if PortalSession::shows_captcha(&response) {
            return Err(RenewError::CaptchaRejected);
        }
        Ok(response)
    }

    pub fn is_authenticated_page(html: &str) -> bool {
        let lower = html.to_lowercase();
        html.contains(GREETING_MARKER)
            || html.contains(ACCOUNT_MARKER)
            || (lower.contains("logout") && lower.contains("customer"))
    }
}
