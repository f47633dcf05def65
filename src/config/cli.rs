use crate::config::AppConfig;
use crate::utils::error::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "euserv-renew")]
#[command(about = "Renews eligible EUserv contracts and reports the outcome")]
pub struct CliArgs {
    /// Path to a TOML configuration file; environment variables are used when omitted
    #[arg(short, long, env = "EUSERV_RENEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit JSON log lines instead of the compact format
    #[arg(long)]
    pub json_logs: bool,

    /// Log in and list orders, but do not trigger any renewal
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn load_config(&self) -> Result<AppConfig> {
        match &self.config {
            Some(path) => AppConfig::from_file(path),
            None => Ok(AppConfig::from_env()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from(["euserv-renew", "--config", "renew.toml", "--dry-run", "-v"]);
        assert_eq!(args.config, Some(PathBuf::from("renew.toml")));
        assert!(args.dry_run);
        assert!(args.verbose);
        assert!(!args.json_logs);
    }
}
