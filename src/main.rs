use authflow::cli::{self, Cli, Commands};
use authflow::config::Config;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::from(cli::EXIT_USAGE);
        }
    };

    init_logging(&config);

    match cli.command {
        Commands::Serve(args) => match cli::serve(&config, args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Commands::Run(args) => cli::run(&config, args).await,
        Commands::Check => cli::check(&config).await,
    }
}

/// Log to the file named by `AUTHFLOW_LOG` if set, else to stderr.
/// `RUST_LOG` wins over the configured filter.
fn init_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    if let Ok(path) = std::env::var("AUTHFLOW_LOG") {
        match std::fs::File::create(&path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter()))
                    .try_init();
                return;
            }
            Err(err) => {
                eprintln!("Failed to create log file {path}: {err}");
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init();
}
