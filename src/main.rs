use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pilotgate::cli::{Cli, Commands, WhitelistCommands};
use pilotgate::{api, config, middleware, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "pilotgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Whitelist { command }) => {
            let state = AppState::from_config(cfg)?;
            handle_whitelist_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!(store = %cfg.store_url, "Initializing object store...");
    let state = Arc::new(AppState::from_config(cfg)?);

    if !state.mailer.is_configured() && state.config.production {
        anyhow::bail!("PILOTGATE_MAIL_ENDPOINT must be set in production");
    }

    let app = api::router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(axum::middleware::from_fn(middleware::security_headers));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("PilotGate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_whitelist_command(
    cmd: WhitelistCommands,
    state: &AppState,
) -> anyhow::Result<()> {
    match cmd {
        WhitelistCommands::Add { tenant, email } => {
            state
                .whitelist
                .add(&tenant, &email)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Whitelisted {} for tenant {}.", email, tenant);
        }
        WhitelistCommands::Remove { tenant, email } => {
            state
                .whitelist
                .remove(&tenant, &email)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Removed {} from tenant {}.", email, tenant);
        }
        WhitelistCommands::Approve { tenant, email } => {
            state
                .whitelist
                .approve(&tenant, &email)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Approved {} for tenant {}.", email, tenant);
        }
        WhitelistCommands::Deny { tenant, email } => {
            state
                .whitelist
                .deny(&tenant, &email)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("Denied {} for tenant {}.", email, tenant);
        }
        WhitelistCommands::List { tenant } => {
            let doc = state
                .whitelist
                .document(&tenant)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            if doc.emails.is_empty() && doc.pending.is_empty() {
                println!("Whitelist for {} is empty.", tenant);
                return Ok(());
            }
            println!("Whitelisted:");
            for email in &doc.emails {
                println!("  {}", email);
            }
            println!("Pending:");
            for p in &doc.pending {
                println!("  {} (requested {})", p.email, p.requested_at.format("%Y-%m-%d"));
            }
        }
    }
    Ok(())
}
