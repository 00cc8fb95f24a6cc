use tokio::task::LocalSet;
use termsession::{
    AppResult,
    cli::{Cli, Commands},
    config::Config,
    init_logging,
    session::run_loopback,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let config = Config::load_or_default(&cli.config_file);

    // Initialize logging
    let _log_guard = init_logging(
        &cli.effective_log_level(&config.log_level),
        &config.log.file_path,
    )?;

    tracing::info!("termsession starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command() {
        Commands::Config { action } => Config::handle_command(&action, &cli.config_file)?,
        Commands::Run => LocalSet::new().run_until(run_loopback(&config)).await?,
    }

    Ok(())
}
