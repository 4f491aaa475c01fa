//! lockstep service - hosts challenges, judges withheld tests and completes
//! CLI logins.

mod rendezvous;
mod routes;
mod state;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use lockstep::core::parser::parse_challenge;
use lockstep::io::store::{Store, StoreError, default_db_path};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "lockstep-server")]
#[command(about = "Service side of lockstep: challenges, attempts and login hand-off")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Store file (defaults to LOCKSTEP_DB or ~/.lockstep.sdb)
    #[arg(long)]
    db: Option<PathBuf>,

    /// URL learners use to reach this server (defaults to http://<bind>:<port>/)
    #[arg(long)]
    public_url: Option<String>,

    /// Seconds `auth/jwt` waits for the browser login before giving up
    #[arg(long, default_value = "600")]
    login_timeout_secs: u64,

    /// Challenge documents to import at startup; already-hosted ones are skipped
    #[arg(long = "import", value_name = "FILE")]
    imports: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lockstep_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let db = args.db.clone().unwrap_or_else(default_db_path);
    let store = Store::open(&db).with_context(|| format!("open store {}", db.display()))?;
    let public_url = args
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}/", args.bind, args.port));
    let sid = store
        .ensure_server(&public_url)
        .context("register server")?;
    info!(db = %db.display(), %public_url, "starting lockstep-server");

    for path in &args.imports {
        import(&store, sid, path)?;
    }

    let state = AppState::new(store, sid, Duration::from_secs(args.login_timeout_secs));
    let reaper = state.broker.spawn_reaper();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::api_router().layer(cors).with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    let abandoned = state.broker.pending();
    if abandoned > 0 {
        info!(abandoned, "dropping unfinished logins");
    }
    Ok(())
}

fn import(store: &Store, sid: i64, path: &Path) -> anyhow::Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let challenge =
        parse_challenge(&text).with_context(|| format!("parse {}", path.display()))?;
    match store.import_challenge(sid, &challenge) {
        Ok(_) => {
            info!(challenge = %challenge.name, tests = challenge.tests.len(), "imported");
            Ok(())
        }
        Err(StoreError::Duplicate(_)) => {
            info!(challenge = %challenge.name, "already hosted");
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("import {}", path.display())),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
