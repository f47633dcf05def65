use crate::core::auth::AuthenticationFlow;
use crate::core::catalog::OrderCatalog;
use crate::core::renewal::RenewalFlow;
use crate::core::session::PortalSession;
use crate::domain::model::{Order, RenewalOutcome, RenewalStage, RunReport};
use crate::domain::ports::{CaptchaSolver, Notifier, PinSource};
use crate::utils::error::{RenewError, Result};
use chrono::{DateTime, Local};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sequences one run: login, order listing, one renewal per eligible order,
/// and a single report to the notifier.
pub struct WorkflowOrchestrator<S: CaptchaSolver, P: PinSource, N: Notifier> {
    session: PortalSession,
    auth: AuthenticationFlow<S>,
    renewal: RenewalFlow<P>,
    notifier: N,
    dry_run: bool,
}

impl<S: CaptchaSolver, P: PinSource, N: Notifier> WorkflowOrchestrator<S, P, N> {
    pub fn new(
        session: PortalSession,
        auth: AuthenticationFlow<S>,
        renewal: RenewalFlow<P>,
        notifier: N,
    ) -> Self {
        Self {
            session,
            auth,
            renewal,
            notifier,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Only authentication exhaustion is returned as an error; every later
    /// failure ends up in the report instead.
    pub async fn run(&mut self) -> Result<RunReport> {
        if let Err(e) = self.auth.authenticate(&mut self.session).await {
            tracing::error!("❌ {}", e);
            self.notifier
                .notify(&compose_login_failure(&e, self.auth_attempts(&e)))
                .await;
            return Err(e);
        }

        let orders = match OrderCatalog::list_orders(&mut self.session).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!("❌ Failed to load orders: {}", e);
                self.notifier.notify(&compose_catalog_failure(&e)).await;
                return Ok(self.empty_report());
            }
        };

        if orders.is_empty() {
            tracing::warn!("⚠️ No orders found on the account page");
            self.notifier.notify(&compose_no_orders()).await;
            return Ok(self.empty_report());
        }

        let report = self.renew_all(&orders).await;
        self.notifier
            .notify(&compose_report(&report, Local::now()))
            .await;
        Ok(report)
    }

    async fn renew_all(&mut self, orders: &[Order]) -> RunReport {
        let mut report = RunReport {
            orders_seen: orders.len(),
            dry_run: self.dry_run,
            ..RunReport::default()
        };
        let mut session_lost: Option<String> = None;

        for order in orders {
            tracing::info!("Checking order {}", order.order_id);
            if !order.renewable {
                tracing::info!("✓ Order {} not yet eligible for extension", order.order_id);
                report.skipped.push(order.order_id.clone());
                continue;
            }

            if let Some(reason) = &session_lost {
                report.outcomes.push(RenewalOutcome::failure(
                    &order.order_id,
                    RenewalStage::OrderSelected,
                    format!("session lost: {}", reason),
                ));
                continue;
            }

            if !self.session.is_authenticated() {
                tracing::warn!("Session expired, logging in again before order {}", order.order_id);
                if let Err(e) = self.auth.authenticate(&mut self.session).await {
                    tracing::error!("❌ Re-authentication failed: {}", e);
                    session_lost = Some(e.to_string());
                    report.outcomes.push(RenewalOutcome::failure(
                        &order.order_id,
                        RenewalStage::OrderSelected,
                        format!("session lost: {}", e),
                    ));
                    continue;
                }
            }

            let outcome = if self.dry_run {
                tracing::info!("[dry run] Would renew order {}", order.order_id);
                RenewalOutcome::success(&order.order_id, "dry run, renewal not triggered")
            } else {
                self.renewal.renew(&mut self.session, &order.order_id).await
            };
            report.outcomes.push(outcome);
        }

        report
    }

    fn empty_report(&self) -> RunReport {
        RunReport {
            dry_run: self.dry_run,
            ..RunReport::default()
        }
    }

    fn auth_attempts(&self, e: &RenewError) -> u32 {
        match e {
            RenewError::AuthenticationExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    pub fn session(&self) -> &PortalSession {
        &self.session
    }
}

pub fn compose_login_failure(error: &RenewError, attempts: u32) -> String {
    format!(
        "❌ EUserv login failed after {} attempts\n{}",
        attempts,
        escape_html(&error.to_string())
    )
}

pub fn compose_no_orders() -> String {
    "⚠️ No orders found on the EUserv account".to_string()
}

pub fn compose_catalog_failure(error: &RenewError) -> String {
    format!(
        "⚠️ EUserv order list could not be loaded\n{}",
        escape_html(&error.to_string())
    )
}

/// Outcome report in Telegram's HTML parse mode.
pub fn compose_report(report: &RunReport, now: DateTime<Local>) -> String {
    let prefix = if report.dry_run { "[dry run] " } else { "" };
    let mut lines = Vec::new();

    if report.outcomes.is_empty() {
        lines.push(format!("<b>{}✓ EUserv check complete</b>", prefix));
        lines.push(String::new());
        lines.push(format!("Time: {}", now.format(TIME_FORMAT)));
        lines.push(format!(
            "Checked {} orders, none needed renewal",
            report.orders_seen
        ));
        return lines.join("\n");
    }

    lines.push(format!("<b>{}🔄 EUserv renewal report</b>", prefix));
    lines.push(String::new());
    lines.push(format!("Time: {}", now.format(TIME_FORMAT)));
    lines.push(String::new());

    for outcome in &report.outcomes {
        if outcome.succeeded {
            lines.push(format!("✅ Order {} renewed", escape_html(&outcome.order_id)));
        } else {
            lines.push(format!(
                "❌ Order {} failed at {}: {}",
                escape_html(&outcome.order_id),
                outcome.stage,
                escape_html(&outcome.reason)
            ));
        }
    }

    if !report.skipped.is_empty() {
        lines.push(format!(
            "✓ Not yet eligible: {}",
            escape_html(&report.skipped.join(", "))
        ));
    }

    lines.join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
