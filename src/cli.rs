use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tally::client::{self, ClientConfig, IngestClient, TOKEN_ENV, URL_ENV};
use tally::config::LogFormat;
use tally::response::Envelope;
use tally::{dashboard, logging};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Submit records to a Tally server and watch the dashboard", long_about = None)]
struct Cli {
    /// Server base URL, e.g. http://127.0.0.1:8080
    #[clap(long, env = URL_ENV)]
    url: Option<String>,

    /// Bearer token sent with every request
    #[clap(long, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    #[clap(long, default_value = "3")]
    retries: u32,

    /// Per-request timeout in seconds
    #[clap(long, default_value = "30")]
    timeout: u64,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a single record
    Submit {
        /// Parsed as JSON when possible (so 42 stays a number), otherwise sent as text
        #[clap(long)]
        id: String,
        #[clap(long)]
        result: String,
        #[clap(long)]
        score: String,
    },
    /// Submit every record of a JSON array file, one by one
    Batch { file: PathBuf },
    /// Post a throwaway record to check the server end to end
    Ping,
    /// Print all rows as JSON
    Rows,
    /// Poll the rows and print summary statistics
    Dashboard {
        /// Seconds between refreshes
        #[clap(long, default_value = "5")]
        interval: u64,
        /// Render one frame and exit
        #[clap(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging("info", LogFormat::Text);
    let cli = Cli::parse();

    print_banner();

    let mut config = match cli.url {
        Some(url) => ClientConfig::new(url),
        None => match ClientConfig::from_env() {
            Ok(config) => config,
            Err(e) => {
                println!("[\u{2717}] Configuration Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };
    config.token = cli.token.or(config.token);
    config.max_retries = cli.retries;
    config.timeout = Duration::from_secs(cli.timeout);

    let client = match IngestClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            println!("[\u{2717}] {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("[\u{26a0}\u{fe0f} Error] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   Tally CLI - Record Ingestion");
    println!("==================================================\n");
}

fn cell(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

async fn run(client: &IngestClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit { id, result, score } => {
            let record = json!({ "id": cell(id), "result": result, "score": cell(score) });
            let envelope = client.post_record(&record).await?;
            print_envelope(&envelope);
        }
        Command::Batch { file } => {
            let text = std::fs::read_to_string(&file)?;
            let items: Vec<Value> = serde_json::from_str(&text)?;
            let results = client.post_batch(&items).await;
            let ok = results.iter().filter(|r| r.is_success()).count();
            println!("{}", serde_json::to_string_pretty(&results)?);
            println!("\n[\u{2713}] Batch complete: {}/{} successful", ok, items.len());
        }
        Command::Ping => {
            println!("Testing connection to {} ...", client.config().base_url);
            if client.test_connection().await {
                println!("[\u{2713}] Connection test PASSED!");
            } else {
                println!("[\u{2717}] Connection test FAILED.");
                println!("\nTroubleshooting checklist:");
                for (i, line) in client::troubleshooting_checklist().iter().enumerate() {
                    println!("  {}. {}", i + 1, line);
                }
                anyhow::bail!("connection test failed");
            }
        }
        Command::Rows => {
            let rows = client.fetch_rows().await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Dashboard { interval, once } => {
            dashboard::run(client, Duration::from_secs(interval.max(1)), once).await;
        }
    }
    Ok(())
}

fn print_envelope(envelope: &Envelope) {
    match envelope {
        Envelope::Success { row, execution_time } => {
            println!("[\u{2713} OK] Data written to row {}", row);
            println!("Execution time: {:.3}s", execution_time);
        }
        Envelope::Error { message, code, .. } => {
            println!("[\u{2717}] Server error {:?}: {}", code, message);
        }
    }
}
