use crate::config::PortalConfig;
use crate::utils::error::{RenewError, Result};
use crate::utils::logger::redact;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, Response};
use std::sync::LazyLock;

static LABELED_SESSION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"sess_id["']?\s*[:=]\s*["']?([a-zA-Z0-9]{30,100})["']?"#)
        .expect("valid session id pattern")
});

static QUERY_SESSION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sess_id=([a-zA-Z0-9]{30,100})").expect("valid session id pattern")
});

const CAPTCHA_MARKER: &str = "captcha";
const LOGIN_FORM_MARKER: &str = r#"value="login""#;

/// The one HTTP session a run talks to the portal through.
///
/// Owns a cookie-keeping client with a fixed browser-like header set. Once
/// the portal has issued a session id it is attached to every form post,
/// and once authenticated also to every GET.
pub struct PortalSession {
    config: PortalConfig,
    client: Client,
    session_id: Option<String>,
    authenticated: bool,
}

impl PortalSession {
    pub fn new(config: PortalConfig) -> Result<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self {
            config,
            client,
            session_id: None,
            authenticated: false,
        })
    }

    fn build_client(config: &PortalConfig) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value("portal.user_agent", &config.user_agent)?);
        headers.insert(ORIGIN, header_value("portal.origin", &config.origin)?);
        headers.insert(REFERER, header_value("portal.base_url", &config.index_url())?);

        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;
        Ok(client)
    }

    /// Drops cookies, session id and login state so the next login starts clean.
    pub fn restart(&mut self) -> Result<()> {
        self.client = Self::build_client(&self.config)?;
        self.session_id = None;
        self.authenticated = false;
        Ok(())
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn adopt_session_id(&mut self, session_id: String) {
        tracing::debug!("Adopted sess_id {}", redact(&session_id, 20));
        self.session_id = Some(session_id);
    }

    pub(crate) fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    pub fn invalidate(&mut self) {
        if self.authenticated {
            tracing::warn!("⚠️ Portal session is no longer authenticated");
        }
        self.authenticated = false;
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        let mut request = self.client.get(url);
        if let Some(session_id) = self.session_id.as_deref().filter(|_| self.authenticated) {
            if !url.contains("sess_id=") {
                request = request.query(&[("sess_id", session_id)]);
            }
        }

        tracing::debug!("GET {}", url);
        let response = Self::check_status(request.send().await?)?;
        Ok(response.text().await?)
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET {} (binary)", url);
        let response = Self::check_status(self.client.get(url).send().await?)?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn post(&self, url: &str, fields: &[(&str, &str)]) -> Result<String> {
        let mut form: Vec<(&str, &str)> = fields.to_vec();
        if let Some(session_id) = self.session_id.as_deref() {
            if !form.iter().any(|(name, _)| *name == "sess_id") {
                form.push(("sess_id", session_id));
            }
        }

        tracing::debug!(
            "POST {} subaction={}",
            url,
            form.iter()
                .find(|(name, _)| *name == "subaction")
                .map(|(_, value)| *value)
                .unwrap_or("-")
        );
        let response = Self::check_status(self.client.post(url).form(&form).send().await?)?;
        Ok(response.text().await?)
    }

    /// Posts to the portal's single form endpoint.
    pub async fn post_action(&self, fields: &[(&str, &str)]) -> Result<String> {
        let url = self.config.index_url();
        self.post(&url, fields).await
    }

    /// The authenticated landing page carrying the order table.
    pub async fn account_page(&mut self) -> Result<String> {
        let html = self.get(&self.config.index_url()).await?;
        self.ensure_still_authenticated(&html, "account page")?;
        Ok(html)
    }

    fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(RenewError::HttpStatusError {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }

    /// Scans markup for the session token, labeled form first, bare query form second.
    pub fn extract_session_id(html: &str) -> Option<String> {
        LABELED_SESSION_ID
            .captures(html)
            .or_else(|| QUERY_SESSION_ID.captures(html))
            .map(|caps| caps[1].to_string())
    }

    pub fn shows_captcha(html: &str) -> bool {
        html.to_lowercase().contains(CAPTCHA_MARKER)
    }

    /// CAPTCHA or login form where an authenticated page was expected.
    pub fn shows_login(html: &str) -> bool {
        let lower = html.to_lowercase();
        lower.contains(CAPTCHA_MARKER) || lower.contains(LOGIN_FORM_MARKER)
    }

    /// Fails with `SessionExpired` and drops the login state when the portal
    /// answered an authenticated action with its login page.
    pub fn ensure_still_authenticated(&mut self, html: &str, step: &str) -> Result<()> {
        if Self::shows_login(html) {
            self.invalidate();
            return Err(RenewError::SessionExpired {
                step: step.to_string(),
            });
        }
        Ok(())
    }
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| RenewError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const SID: &str = "k7f3q9x2m5n8p1r4t6v0w3y5z7b9c2d4";

    #[test]
    fn test_extract_labeled_session_id() {
        let html = format!(r#"<script>var config = {{ sess_id: "{}" }};</script>"#, SID);
        assert_eq!(PortalSession::extract_session_id(&html), Some(SID.to_string()));

        let input = format!(r#"<input type="hidden" name="x" value="1"> sess_id='{}'"#, SID);
        assert_eq!(PortalSession::extract_session_id(&input), Some(SID.to_string()));
    }

    #[test]
    fn test_extract_query_session_id() {
        let html = format!(r#"<a href="index.iphp?sess_id={}&action=x">Home</a>"#, SID);
        assert_eq!(PortalSession::extract_session_id(&html), Some(SID.to_string()));
    }

    #[test]
    fn test_extract_session_id_rejects_short_tokens() {
        assert_eq!(PortalSession::extract_session_id("sess_id=abc123"), None);
        assert_eq!(PortalSession::extract_session_id("<html>no session</html>"), None);
    }

    #[test]
    fn test_login_markers() {
        assert!(PortalSession::shows_captcha("<img src=\"securimage_show.php\" alt=\"CAPTCHA\">"));
        assert!(PortalSession::shows_login(r#"<input type="hidden" name="subaction" value="login">"#));
        assert!(!PortalSession::shows_login("<p>Hello customer</p><a>Logout</a>"));
    }

    #[tokio::test]
    async fn test_post_appends_session_id() {
        let server = MockServer::start();
        let post_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/index.iphp")
                .body_contains("subaction=ping")
                .body_contains(format!("sess_id={}", SID));
            then.status(200).body("ok");
        });

        let mut session = PortalSession::new(PortalConfig::with_base_url(server.base_url())).unwrap();
        session.adopt_session_id(SID.to_string());

        let body = session.post_action(&[("subaction", "ping")]).await.unwrap();

        post_mock.assert();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_get_attaches_session_id_once_authenticated() {
        let server = MockServer::start();
        let page_mock = server.mock(|when, then| {
            when.method(GET).path("/index.iphp").query_param("sess_id", SID);
            then.status(200).body("<p>Hello customer</p>");
        });

        let mut session = PortalSession::new(PortalConfig::with_base_url(server.base_url())).unwrap();
        session.adopt_session_id(SID.to_string());
        session.mark_authenticated();

        let html = session.account_page().await.unwrap();

        page_mock.assert();
        assert!(html.contains("Hello"));
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_page_expires_session() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/index.iphp");
            then.status(200)
                .body(r#"<form><input name="subaction" value="login"></form>"#);
        });

        let mut session = PortalSession::new(PortalConfig::with_base_url(server.base_url())).unwrap();
        session.adopt_session_id(SID.to_string());
        session.mark_authenticated();

        let result = session.account_page().await;

        assert!(matches!(result, Err(RenewError::SessionExpired { .. })));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/index.iphp");
            then.status(502);
        });

        let session = PortalSession::new(PortalConfig::with_base_url(server.base_url())).unwrap();
        let result = session.post_action(&[("subaction", "login")]).await;

        match result {
            Err(RenewError::HttpStatusError { status, .. }) => assert_eq!(status, 502),
            other => panic!("expected HttpStatusError, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_restart_clears_state() {
        let mut session = PortalSession::new(PortalConfig::default()).unwrap();
        session.adopt_session_id(SID.to_string());
        session.mark_authenticated();

        session.restart().unwrap();

        assert!(session.session_id().is_none());
        assert!(!session.is_authenticated());
    }
}
