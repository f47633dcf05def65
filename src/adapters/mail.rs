use crate::domain::model::PinCode;
use crate::domain::ports::PinSource;
use crate::utils::error::{RenewError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use regex::Regex;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::LazyLock;
use std::time::Duration;

const PIN_MARKER: &str = "PIN";
/// Upper bound on a whole mailbox check, in multiples of the socket timeout.
const MAILBOX_CALL_BUDGET: u32 = 4;

static LABELED_PIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PIN:\s*([0-9]{6})").expect("valid PIN pattern"));
// Looser fallback; can pick up a date or order number that happens to be six digits.
static BARE_PIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{6})").expect("valid PIN pattern"));

#[derive(Clone)]
pub struct MailboxCredentials {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub folder: String,
    /// Applies to connecting and to every socket read and write.
    pub timeout: Duration,
}

impl std::fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("sender", &self.sender)
            .field("folder", &self.folder)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Reads the newest PIN email from an IMAP inbox over TLS.
#[derive(Debug, Clone)]
pub struct ImapPinFetcher {
    credentials: MailboxCredentials,
}

impl ImapPinFetcher {
    pub fn new(credentials: MailboxCredentials) -> Self {
        Self { credentials }
    }

    fn fetch_blocking(credentials: &MailboxCredentials) -> Result<Option<PinCode>> {
        let client = Self::connect(credentials)?;
        let mut session = client
            .login(&credentials.username, &credentials.password)
            .map_err(|(e, _)| mailbox_error(e))?;

        let result = Self::newest_pin(&mut session, credentials);
        if let Err(e) = session.logout() {
            tracing::debug!("IMAP logout failed: {}", e);
        }
        result
    }

    fn connect(
        credentials: &MailboxCredentials,
    ) -> Result<imap::Client<native_tls::TlsStream<TcpStream>>> {
        let addrs = (credentials.server.as_str(), credentials.port)
            .to_socket_addrs()
            .map_err(mailbox_error)?;

        let mut last_error = format!("{} did not resolve", credentials.server);
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, credentials.timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_error = format!("{}: {}", addr, e),
            }
        }
        let tcp = tcp.ok_or_else(|| mailbox_error(last_error))?;
        tcp.set_read_timeout(Some(credentials.timeout))
            .map_err(mailbox_error)?;
        tcp.set_write_timeout(Some(credentials.timeout))
            .map_err(mailbox_error)?;

        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(mailbox_error)?;
        let stream = tls
            .connect(&credentials.server, tcp)
            .map_err(mailbox_error)?;

        let mut client = imap::Client::new(stream);
        client.read_greeting().map_err(mailbox_error)?;
        Ok(client)
    }

    fn newest_pin<T: std::io::Read + std::io::Write>(
        session: &mut imap::Session<T>,
        credentials: &MailboxCredentials,
    ) -> Result<Option<PinCode>> {
        session.select(&credentials.folder).map_err(mailbox_error)?;

        let query = format!(
            "FROM \"{}\" BODY \"{}\"",
            credentials.sender, PIN_MARKER
        );
        let uids = session.uid_search(&query).map_err(mailbox_error)?;
        let Some(newest) = uids.iter().max() else {
            tracing::warn!("❌ No PIN email from {} found", credentials.sender);
            return Ok(None);
        };

        let messages = session
            .uid_fetch(newest.to_string(), "RFC822")
            .map_err(mailbox_error)?;
        let pin = messages
            .iter()
            .filter_map(|message| message.body())
            .find_map(parse_pin_message);

        if pin.is_none() {
            tracing::warn!("Newest PIN email carries no 6-digit code");
        }
        Ok(pin)
    }
}

#[async_trait]
impl PinSource for ImapPinFetcher {
    async fn fetch_latest_pin(&self) -> Option<PinCode> {
        let credentials = self.credentials.clone();
        // Socket timeouts bound each call; this bounds the whole exchange.
        let deadline = credentials.timeout.saturating_mul(MAILBOX_CALL_BUDGET);
        let task = tokio::task::spawn_blocking(move || Self::fetch_blocking(&credentials));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(pin))) => pin,
            Ok(Ok(Err(e))) => {
                tracing::warn!("⚠️ Mailbox check failed: {}", e);
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Mailbox task aborted: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("⚠️ Mailbox check gave no answer within {:?}", deadline);
                None
            }
        }
    }
}

fn mailbox_error(e: impl std::fmt::Display) -> RenewError {
    RenewError::MailboxError {
        message: e.to_string(),
    }
}

/// Parses a raw RFC 822 message into a PIN stamped with its `Date` header.
pub fn parse_pin_message(raw: &[u8]) -> Option<PinCode> {
    let mail = mailparse::parse_mail(raw).ok()?;
    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let received_at = mail
        .headers
        .get_first_value("Date")
        .and_then(|date| mailparse::dateparse(&date).ok())
        .and_then(timestamp);

    let text = body_text(&mail)?;
    let value = extract_pin(&text)?;
    tracing::info!("Found PIN email {:?} received {:?}", subject, received_at);
    Some(PinCode::new(value, received_at))
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// Plain-text part if there is one, otherwise the first decodable body.
fn body_text(mail: &ParsedMail<'_>) -> Option<String> {
    find_part(mail, "text/plain")
        .or_else(|| find_part(mail, "text/html"))
        .or_else(|| mail.get_body().ok())
}

fn find_part(mail: &ParsedMail<'_>, mimetype: &str) -> Option<String> {
    if mail.subparts.is_empty() {
        if mail.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            return mail.get_body().ok();
        }
        return None;
    }
    mail.subparts.iter().find_map(|part| find_part(part, mimetype))
}

/// `PIN: 123456` first, then any six-digit run.
pub fn extract_pin(text: &str) -> Option<String> {
    if let Some(caps) = LABELED_PIN.captures(text) {
        return Some(caps[1].to_string());
    }
    let fallback = BARE_PIN.captures(text).map(|caps| caps[1].to_string());
    if fallback.is_some() {
        tracing::warn!("⚠️ PIN label not found, falling back to the first 6-digit run");
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials_for(port: u16, timeout: Duration) -> MailboxCredentials {
        MailboxCredentials {
            server: "127.0.0.1".to_string(),
            port,
            username: "user@example.com".to_string(),
            password: "app-password".to_string(),
            sender: "no-reply@euserv.com".to_string(),
            folder: "INBOX".to_string(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_silent_server_yields_no_pin() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accepts and then never writes a byte.
        let _holder = std::thread::spawn(move || {
            let accepted = listener.accept();
            std::thread::sleep(Duration::from_secs(30));
            drop(accepted);
        });

        let fetcher = ImapPinFetcher::new(credentials_for(port, Duration::from_secs(1)));
        let pin = tokio::time::timeout(Duration::from_secs(15), fetcher.fetch_latest_pin())
            .await
            .expect("mailbox check must give up on a silent server");

        assert!(pin.is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_yields_no_pin() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = ImapPinFetcher::new(credentials_for(port, Duration::from_secs(1)));
        assert!(fetcher.fetch_latest_pin().await.is_none());
    }

    #[test]
    fn test_extract_labeled_pin() {
        let text = "Order 4782190\nYour PIN:\n 538201\nValid for 10 minutes";
        assert_eq!(extract_pin(text), Some("538201".to_string()));
    }

    #[test]
    fn test_labeled_pin_wins_over_earlier_digits() {
        let text = "Request 123456 received.\nPIN: 654321";
        assert_eq!(extract_pin(text), Some("654321".to_string()));
    }

    #[test]
    fn test_extract_bare_pin_fallback() {
        assert_eq!(
            extract_pin("Use code 246810 to confirm"),
            Some("246810".to_string())
        );
        assert_eq!(extract_pin("no digits here"), None);
        assert_eq!(extract_pin("short 12345 only"), None);
    }

    #[test]
    fn test_parse_plain_message() {
        let raw = b"From: EUserv <no-reply@euserv.com>\r\n\
Subject: Your PIN\r\n\
Date: Fri, 16 Oct 2026 08:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Dear customer,\r\n\
PIN:\r\n\
918273\r\n";

        let pin = parse_pin_message(raw).unwrap();

        assert_eq!(pin.value, "918273");
        assert_eq!(
            pin.received_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 8, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_multipart_prefers_plain_text() {
        let raw = b"From: no-reply@euserv.com\r\n\
Subject: PIN\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Ref 111111</p>\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
PIN: 222222\r\n\
--b1--\r\n";

        let pin = parse_pin_message(raw).unwrap();
        assert_eq!(pin.value, "222222");
        assert_eq!(pin.received_at, None);
    }
}
