pub mod auth;
pub mod catalog;
pub mod orchestrator;
pub mod renewal;
pub mod session;

pub use crate::domain::model::{Order, RenewalOutcome, RenewalStage, RunReport};
pub use crate::domain::ports::{CaptchaSolver, Notifier, OcrEngine, PinSource};
pub use crate::utils::error::Result;
