//! Coordinator daemon entry point.

use anyhow::Result;
use clap::Parser;

use payrail::config::AppConfig;
use payrail::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "payrail transaction coordinator")]
struct Args {
    /// Configuration environment (reads config/<env>.yaml)
    #[arg(long, default_value = "dev")]
    env: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match AppConfig::load(&args.env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            std::process::exit(1);
        }
    };
    let _guard = init_logging(&config);

    let runtime = tokio::runtime::Runtime::new()?;
    if let Err(e) = runtime.block_on(run(&config)) {
        tracing::error!(error = %format!("{:#}", e), "Coordinator failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: &AppConfig) -> Result<()> {
    payrail::coordinator::run_server(config).await
}
