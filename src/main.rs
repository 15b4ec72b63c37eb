use clap::Parser;
use infralog::shared::logging;
use std::path::PathBuf;
use tracing::error;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "infralog",
    about = "Watches Terraform state for drift and reports changes to webhooks, Slack or stdout.",
    version = APP_VERSION
)]
pub struct Cli {
    #[arg(
        long = "config-file",
        short = 'c',
        value_name = "PATH",
        help = "Path to the YAML configuration file"
    )]
    pub config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    if let Err(e) = infralog::core::infralog::run(cli.config_file.as_deref()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
