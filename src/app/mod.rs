//! Wires the configured adapters into a ready-to-run orchestrator.

use crate::adapters::mail::MailboxCredentials;
use crate::adapters::{ImageCaptchaSolver, ImapPinFetcher, TelegramNotifier, TesseractOcr};
use crate::config::AppConfig;
use crate::core::auth::AuthenticationFlow;
use crate::core::orchestrator::WorkflowOrchestrator;
use crate::core::renewal::RenewalFlow;
use crate::core::session::PortalSession;
use crate::utils::error::Result;
use std::time::Duration;

pub type DefaultOrchestrator =
    WorkflowOrchestrator<ImageCaptchaSolver<TesseractOcr>, ImapPinFetcher, Option<TelegramNotifier>>;

pub fn build_orchestrator(config: &AppConfig) -> Result<DefaultOrchestrator> {
    let credentials = config.credentials()?;

    let session = PortalSession::new(config.portal.clone())?;
    let solver = ImageCaptchaSolver::new(TesseractOcr::default());
    let auth = AuthenticationFlow::new(solver, credentials, config.auth_policy());

    let mailbox = MailboxCredentials {
        server: config.mailbox.server.clone(),
        port: config.mailbox.port,
        username: config.mailbox_username().unwrap_or_default().to_string(),
        password: config.mailbox_password().unwrap_or_default().to_string(),
        sender: config.mailbox.sender.clone(),
        folder: config.mailbox.folder.clone(),
        timeout: Duration::from_secs(config.mailbox.timeout_seconds),
    };
    let renewal = RenewalFlow::new(ImapPinFetcher::new(mailbox), config.renewal_timing());

    let notifier = TelegramNotifier::from_config(&config.notification)?;

    Ok(WorkflowOrchestrator::new(session, auth, renewal, notifier))
}
