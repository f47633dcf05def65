use crate::domain::model::PinCode;
use crate::utils::error::Result;
use async_trait::async_trait;

/// Turns a CAPTCHA image into the answer the login form expects.
///
/// `None` means no answer could be produced; the caller abandons the
/// login attempt and starts over with a fresh image.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Option<String>;
}

/// Generic text recognition over an already cleaned PNG raster.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, png: &[u8]) -> Result<String>;
}

/// Source of the one-time PIN the portal emails for sensitive actions.
///
/// Implementations look at the newest matching message only and never
/// retry; pacing belongs to the caller.
#[async_trait]
pub trait PinSource: Send + Sync {
    async fn fetch_latest_pin(&self) -> Option<PinCode>;
}

/// Fire-and-forget outcome reporting. Delivery failures are logged by the
/// implementation and never surface to the workflow.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

#[async_trait]
impl<N: Notifier> Notifier for Option<N> {
    async fn notify(&self, message: &str) {
        match self {
            Some(notifier) => notifier.notify(message).await,
            None => tracing::debug!("Notification disabled, dropping report"),
        }
    }
}
