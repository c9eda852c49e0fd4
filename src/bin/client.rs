//! Interactive client entry point.
//!
//! Optional positional `<bank> <user> <password>` logs in without the
//! prompt. The menu then drives transfers, balance and history; a
//! background worker polls the coordinator and drains queued transfers.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

use payrail::client::{
    HttpCoordinator, OfflineQueue, PayClient, QueueEvent, QueueWorker, QueueWorkerConfig, Session,
    SubmitOutcome,
};
use payrail::config::AppConfig;
use payrail::logging::init_logging;
use payrail::proto::TransferOutcome;
use payrail::registry::ServiceRegistry;

#[derive(Parser, Debug)]
#[command(name = "client", about = "payrail client")]
struct Args {
    /// Bank for non-interactive login
    bank: Option<String>,
    /// Username for non-interactive login
    user: Option<String>,
    /// Password for non-interactive login
    password: Option<String>,

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
    if let Err(e) = runtime.block_on(run(&config, args)) {
        eprintln!("Fatal: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: &AppConfig, args: Args) -> Result<()> {
    let api = Arc::new(HttpCoordinator::new(
        ServiceRegistry::new(&config.registry.path),
        std::time::Duration::from_millis(config.client.request_timeout_ms),
    ));
    let queue = Arc::new(OfflineQueue::new());
    let session = Arc::new(Session::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let worker = QueueWorker::new(
        api.clone(),
        queue.clone(),
        session.clone(),
        events_tx,
        QueueWorkerConfig {
            poll_interval: config.offline_poll(),
        },
    );
    tokio::spawn(async move { worker.run().await });

    let client = PayClient::new(api, queue, session);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    // Positional login, or prompt
    match (&args.bank, &args.user, &args.password) {
        (Some(bank), Some(user), Some(password)) => {
            client.login(bank, user, password).await?;
            println!("Logged in as {}/{}", bank, user);
        }
        _ => prompt_login(&client, &mut input).await?,
    }

    println!("Commands: (t)ransfer, (b)alance, (h)istory, (p)ending, (q)uit");
    loop {
        drain_events(&mut events_rx);

        if client.session().reauth_needed() {
            println!("Session expired, please log in again (queued transfers are kept).");
            prompt_login(&client, &mut input).await?;
        }

        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let Some(line) = input.next_line().await? else {
            break;
        };
        match line.trim() {
            "t" | "transfer" => {
                let dst_bank = prompt(&mut input, "to bank: ").await?;
                let dst_user = prompt(&mut input, "to user: ").await?;
                let amount: u64 = match prompt(&mut input, "amount (minor units): ")
                    .await?
                    .parse()
                {
                    Ok(amount) => amount,
                    Err(_) => {
                        println!("Not a number.");
                        continue;
                    }
                };
                match client.submit_transfer(&dst_bank, &dst_user, amount).await {
                    Ok(SubmitOutcome::Completed(TransferOutcome::Committed)) => {
                        println!("committed");
                    }
                    Ok(SubmitOutcome::Completed(TransferOutcome::Aborted { reason })) => {
                        println!("aborted({})", reason);
                    }
                    Ok(SubmitOutcome::Queued(txid)) => {
                        println!("queued (txid {})", txid);
                    }
                    Err(e) => println!("error: {}", e),
                }
            }
            "b" | "balance" => match client.balance().await {
                Ok(balance) => println!("balance: {}", balance),
                Err(e) => println!("error: {}", e),
            },
            "h" | "history" => match client.history().await {
                Ok(records) => {
                    if records.is_empty() {
                        println!("(no transactions)");
                    }
                    for r in records {
                        println!(
                            "{} {:?} {} {}/{}",
                            r.txid, r.direction, r.amount, r.counterparty_bank, r.counterparty_user
                        );
                    }
                }
                Err(e) => println!("error: {}", e),
            },
            "p" | "pending" => {
                let pending = client.queue().pending();
                if pending.is_empty() {
                    println!("(queue empty)");
                }
                for entry in pending {
                    println!(
                        "{} -> {}/{} amount {} (attempts {})",
                        entry.request.txid,
                        entry.request.dst_bank,
                        entry.request.dst_user,
                        entry.request.amount,
                        entry.attempts
                    );
                }
            }
            "q" | "quit" | "exit" => break,
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }

    Ok(())
}

async fn prompt_login(client: &PayClient, input: &mut Lines<BufReader<Stdin>>) -> Result<()> {
    loop {
        let bank = prompt(input, "bank: ").await?;
        let user = prompt(input, "user: ").await?;
        let password = prompt(input, "password: ").await?;
        match client.login(&bank, &user, &password).await {
            Ok(()) => {
                println!("Logged in as {}/{}", bank, user);
                return Ok(());
            }
            Err(e) => println!("Login failed: {}", e),
        }
    }
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<String> {
    print!("{}", label);
    use std::io::Write;
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.unwrap_or_default().trim().to_string())
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<QueueEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            QueueEvent::Completed { txid, outcome } => match outcome {
                TransferOutcome::Committed => println!("[queue] {} committed", txid),
                TransferOutcome::Aborted { reason } => {
                    println!("[queue] {} aborted({})", txid, reason)
                }
            },
            QueueEvent::Rejected { txid, reason } => {
                println!("[queue] {} rejected: {}", txid, reason)
            }
            QueueEvent::AuthExpired => {
                println!("[queue] token expired; log in to resume draining")
            }
        }
    }
}
