pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliArgs;

pub use app::{build_orchestrator, DefaultOrchestrator};
pub use config::AppConfig;
pub use crate::core::auth::{AuthPolicy, AuthenticationFlow};
pub use crate::core::catalog::OrderCatalog;
pub use crate::core::orchestrator::WorkflowOrchestrator;
pub use crate::core::renewal::{RenewalFlow, RenewalTiming};
pub use crate::core::session::PortalSession;
pub use utils::error::{RenewError, Result};
