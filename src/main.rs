use clap::Parser;
use euserv_renew::utils::error::ErrorSeverity;
use euserv_renew::utils::{logger, validation::Validate};
use euserv_renew::{build_orchestrator, CliArgs, RenewError};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("{}", "=".repeat(50));
    tracing::info!("🚀 EUserv contract renewal");
    tracing::info!("Started at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    tracing::info!("{}", "=".repeat(50));

    if let Err(e) = run(&args).await {
        tracing::error!(
            "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        // Exit code follows error severity
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };

        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn run(args: &CliArgs) -> Result<(), RenewError> {
    let config = args.load_config()?;

    config.validate()?;
    if args.verbose {
        tracing::debug!("Config: {:?}", config);
    }

    let mut orchestrator = build_orchestrator(&config)?.with_dry_run(args.dry_run);
    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - no renewal will be triggered");
    }

    let report = orchestrator.run().await?;

    tracing::info!("{}", "=".repeat(50));
    tracing::info!(
        "📊 Orders: {}, renewed: {}, failed: {}, not yet eligible: {}",
        report.orders_seen,
        report.succeeded(),
        report.failed(),
        report.skipped.len()
    );
    tracing::info!("{}", "=".repeat(50));
    Ok(())
}
