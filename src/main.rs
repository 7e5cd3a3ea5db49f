use clap::Parser;
use flywheel::app::App;
use flywheel::cli::Args;
use flywheel::config::Config;
use flywheel::logging::setup_logging;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let config = Config::from_env().expect("Failed to load config");
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        internal_clock = config.internal_clock,
        "starting flywheel"
    );

    // Create and initialize the application
    let mut app = App::new(config)
        .await
        .expect("Failed to initialize application");

    app.setup_services();
    app.start_services();
    app.run().await
}
