use queue_channels_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!("CLI error: {}", e);
        // Logging may not be installed yet
        eprintln!("{}", e);

        // Exit with appropriate code based on error type
        let exit_code = match e {
            queue_channels_cli::CliError::Configuration(_) => 1,
            queue_channels_cli::CliError::Channel(_) => 2,
            queue_channels_cli::CliError::Logging { .. } => 3,
            queue_channels_cli::CliError::InvalidArgument { .. } => 4,
            queue_channels_cli::CliError::Io(_) => 5,
        };

        std::process::exit(exit_code);
    }
}
