//! Bank participant daemon entry point.

use anyhow::Result;
use clap::Parser;

use payrail::config::AppConfig;
use payrail::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "bank", about = "payrail bank participant")]
struct Args {
    /// Bank name; selects the registry entry, state file and credentials
    #[arg(long)]
    name: String,

    /// Listen port (0 = ephemeral; the bound port is what gets registered)
    #[arg(long)]
    port: Option<u16>,

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
    if let Err(e) = runtime.block_on(run(&config, &args)) {
        tracing::error!(bank = %args.name, error = %format!("{:#}", e), "Bank failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: &AppConfig, args: &Args) -> Result<()> {
    payrail::bank::run_server(config, &args.name, args.port).await
}
