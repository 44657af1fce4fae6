use certkeeper::acme::InstantAcmeEngine;
use certkeeper::cli::CommandLineArguments;
use certkeeper::config::Configuration;
use certkeeper::renew::RenewService;
use certkeeper::{CRATE_NAME, STARTUP_BANNER};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const ENV_FILTER_NAME: &str = "CERTKEEPER_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CommandLineArguments::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME).unwrap_or_else(|_| {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose {
                format!("{CRATE_NAME}=debug,info")
            } else {
                "info".to_string()
            })
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("{STARTUP_BANNER}");

    let config = match Configuration::load(cli) {
        Ok(config) => config,
        Err(e) => {
            error!(" X. ERROR {e}");
            return ExitCode::FAILURE;
        }
    };
    match RenewService::new(InstantAcmeEngine::default(), config).run().await {}
}
