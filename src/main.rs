//! Sigmaward - Sigma rule lifecycle for ElastAlert
//!
//! Stores versioned detection rules, compiles active ones into the
//! ElastAlert rules directory and reconciles fired alerts back.

use anyhow::Result;
use sigmaward::cli::{
    add, alert_stats, alerts, clear, clear_artifacts, config, delete, disable, enable, export, init,
    list, load, show, status, sync, sync_alerts, update, Cli, Commands, Workspace,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ws = Workspace::open(&cli.path, cli.config.as_deref())?;
    let format = cli.format;

    // Execute command
    match cli.command {
        Commands::Init(args) => init(&ws, args.force)?,

        Commands::Add(args) => add(&ws, &args.file, args.enable, format).await?,

        Commands::Update(args) => update(&ws, &args.rule, &args.file, format).await?,

        Commands::List => list(&ws, format)?,

        Commands::Show(args) => show(&ws, &args.rule, format)?,

        Commands::Enable(args) => enable(&ws, &args.rule).await?,

        Commands::Disable(args) => disable(&ws, &args.rule)?,

        Commands::Delete(args) => delete(&ws, &args.rule)?,

        Commands::Load(args) => {
            load(&ws, args.dir.as_deref(), args.auto_enable, format).await?;
        }

        Commands::Export(args) => {
            export(&ws, &args.dir)?;
        }

        Commands::Clear(args) => clear(&ws, args.force)?,

        Commands::ClearArtifacts(args) => clear_artifacts(&ws, args.force)?,

        Commands::Sync => sync(&ws, format).await?,

        Commands::SyncAlerts(args) => sync_alerts(&ws, args.since.as_deref(), format).await?,

        Commands::Alerts(args) => alerts(&ws, &args.rule, args.since.as_deref(), format)?,

        Commands::AlertStats(args) => alert_stats(&ws, args.since.as_deref(), format)?,

        Commands::Status => status(&ws, format)?,

        Commands::Config(args) => config(&ws, args.reset)?,
    }

    Ok(())
}
