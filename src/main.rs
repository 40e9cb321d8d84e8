use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tally::config::{Settings, SystemProfile};
use tally::logging;
use tally::server::TallyServer;
use tally::storage::FileStore;
use tally::TallyService;
use tracing::info;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Tally ingestion server", long_about = None)]
struct Args {
    /// TOML settings file
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(long)]
    addr: Option<String>,

    #[clap(long)]
    data_dir: Option<PathBuf>,

    #[clap(long)]
    sheet: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let profile = SystemProfile::detect();

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(addr) = args.addr {
        settings.addr = addr;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if let Some(sheet) = args.sheet {
        settings.sheet_name = sheet;
    }
    settings.validate().context("validating settings")?;

    println!("--- [Tally] ---");
    println!("Detected Cores: {}", profile.logical_cores);
    println!("Worker Threads: {}", profile.worker_threads);
    println!("Sheet:          {}", settings.sheet_name);
    println!("Data Dir:       {}", settings.data_dir.display());
    println!("Durability:     {}", if settings.strict_durability { "Strict (Fsync)" } else { "OS Buffered" });
    println!("Lock Timeout:   {}ms", settings.lock_timeout_ms);
    println!("---------------");

    tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .enable_all()
    .build()
    .context("building tokio runtime")?
    .block_on(async_main(settings))
}

async fn async_main(settings: Settings) -> anyhow::Result<()> {
    logging::init_logging(&settings.log_level, settings.log_format);

    let addr: SocketAddr = settings
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {:?}", settings.addr))?;

    let store = FileStore::open(&settings.data_dir, settings.strict_durability)
        .with_context(|| format!("opening data dir {}", settings.data_dir.display()))?;
    info!(root = %store.root().display(), "store ready");

    let service = Arc::new(TallyService::with_store(Arc::new(store), &settings));

    tokio::spawn(async move {
        TallyServer::new(service).run(addr).await;
    });

    println!("Tally listening on http://{}", addr);
    println!("Ready.");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    println!("Shutting down.");
    Ok(())
}
