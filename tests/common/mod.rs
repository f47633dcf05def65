#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use euserv_renew::config::PortalConfig;
use euserv_renew::core::{CaptchaSolver, Notifier, PinSource};
use euserv_renew::domain::model::{Credentials, PinCode};
use euserv_renew::{AuthPolicy, AuthenticationFlow, PortalSession, RenewalTiming};
use httpmock::prelude::*;
use httpmock::Mock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SID: &str = "q8w7e6r5t4y3u2i1o0p9a8s7d6f5g4h3";
pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "hunter2";

pub fn login_page() -> String {
    format!(
        r#"<html><body>
<form method="post" action="index.iphp">
  <input type="hidden" name="sess_id" value="{}">
  <input type="hidden" name="subaction" value="login">
  <input name="email"><input name="password" type="password">
</form>
<a href="index.iphp?sess_id={}">Home</a>
</body></html>"#,
        SID, SID
    )
}

pub const WELCOME_PAGE: &str = "<html><body><h1>Hello John</h1><a>Logout</a></body></html>";
pub const CAPTCHA_PAGE: &str =
    r#"<html><body><img src="securimage_show.php"><input name="captcha_code"></body></html>"#;

/// Account page as the portal serves it once logged in, carrying the order table.
pub fn account_page(rows: &[(&str, bool)]) -> String {
    let rows: String = rows
        .iter()
        .map(|(order_id, renewable)| {
            let action = if *renewable {
                "<a href=\"#\">Extend contract</a>".to_string()
            } else {
                "Contract extension possible from 2026-12-01".to_string()
            };
            format!(
                r#"<tr><td class="td-z1-sp1-kc">{}</td><td class="td-z1-sp2-kc"><div class="kc2_order_action_container">{}</div></td></tr>"#,
                order_id, action
            )
        })
        .collect();

    format!(
        r#"<html><body>
<a href="index.iphp?sess_id={}&amp;subaction=logout">Logout</a>
<p>Hello John, customer number 90210</p>
<div id="kc2_order_customer_orders_tab_content_1">
  <table class="kc2_order_table kc2_content_table">
    <tr><th>Order</th><th>Actions</th></tr>
    {}
  </table>
</div>
</body></html>"#,
        SID, rows
    )
}

pub fn portal_config(server: &MockServer) -> PortalConfig {
    let mut config = PortalConfig::with_base_url(server.base_url());
    config.request_timeout_seconds = 5;
    config
}

pub fn credentials() -> Credentials {
    Credentials::new(EMAIL, PASSWORD)
}

pub fn instant_policy(attempts: u32) -> AuthPolicy {
    AuthPolicy {
        attempts,
        retry_delay: Duration::ZERO,
    }
}

pub fn instant_timing(pin_attempts: u32) -> RenewalTiming {
    RenewalTiming {
        pin_settle: Duration::ZERO,
        pin_attempts,
        pin_retry_delay: Duration::ZERO,
        pin_clock_skew: Duration::from_secs(120),
        token_settle: Duration::ZERO,
        extension_settle: Duration::ZERO,
    }
}

pub fn mount_page<'a>(server: &'a MockServer, body: String) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET).path("/index.iphp");
        then.status(200).body(body);
    })
}

pub fn mount_login_post<'a>(server: &'a MockServer, body: &str) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path("/index.iphp")
            .body_contains("password=");
        then.status(200).body(body);
    })
}

/// Logs in through the mocked login form and hands back the live session.
pub async fn authenticated_session(server: &MockServer) -> PortalSession {
    mount_page(server, login_page());
    mount_login_post(server, WELCOME_PAGE);

    let mut session = PortalSession::new(portal_config(server)).unwrap();
    let auth = AuthenticationFlow::new(FixedSolver::new(None), credentials(), instant_policy(1));
    auth.authenticate(&mut session).await.unwrap();
    session
}

/// Answers from a script, then with the fallback forever.
#[derive(Clone)]
pub struct FixedSolver {
    script: Arc<Mutex<VecDeque<Option<String>>>>,
    fallback: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FixedSolver {
    pub fn new(answer: Option<&str>) -> Self {
        Self::script(Vec::new(), answer)
    }

    /// Solves the first CAPTCHA only.
    pub fn once(answer: &str) -> Self {
        Self::script(vec![Some(answer)], None)
    }

    pub fn script(answers: Vec<Option<&str>>, fallback: Option<&str>) -> Self {
        Self {
            script: Arc::new(Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
            )),
            fallback: fallback.map(str::to_string),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, _image: &[u8]) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(answer) => answer,
            None => self.fallback.clone(),
        }
    }
}

/// Hands out queued PINs in order, then `None`.
#[derive(Clone)]
pub struct ScriptedPins {
    queue: Arc<Mutex<VecDeque<Option<PinCode>>>>,
    fallback: Option<PinCode>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedPins {
    pub fn none() -> Self {
        Self::script(Vec::new(), None)
    }

    /// A freshly delivered PIN on every call.
    pub fn always(value: &str) -> Self {
        Self::script(Vec::new(), Some(PinCode::new(value, Some(Utc::now()))))
    }

    pub fn script(pins: Vec<Option<PinCode>>, fallback: Option<PinCode>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(pins.into())),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PinSource for ScriptedPins {
    async fn fetch_latest_pin(&self) -> Option<PinCode> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(pin) => pin,
            None => self.fallback.clone(),
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
