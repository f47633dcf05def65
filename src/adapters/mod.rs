// Adapters layer: concrete implementations of the domain ports for
// external systems (OCR binary, IMAP mailbox, Telegram).

pub mod captcha;
pub mod mail;
pub mod ocr;
pub mod telegram;

pub use captcha::ImageCaptchaSolver;
pub use mail::ImapPinFetcher;
pub use ocr::TesseractOcr;
pub use telegram::TelegramNotifier;
