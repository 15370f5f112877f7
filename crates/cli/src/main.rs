//! cqldrift binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cqldrift_core::{MigrateConfig, ScriptKind};
use cqldrift_engine::{ExitDisposition, Orchestrator};
use cqldrift_state::{MemoryCluster, SessionRegistry};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cqldrift - schema-migration orchestrator for CQL clusters
#[derive(Parser, Debug)]
#[command(name = "cqldrift")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CQLDRIFT_CONFIG",
        default_value = "config/cqldrift.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full orchestration against an in-process simulated cluster.
    ///
    /// Exercises the real lifecycle - init, lock, discovery, bootstraps,
    /// migration rounds, release - so a script tree can be validated in CI
    /// before it ever reaches a live cluster. Live runs use the same
    /// orchestrator over a driver adapter implementing the session seam.
    Rehearse,
    /// Lex, canonicalize, and checksum every discovered script without
    /// touching any cluster.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(config.debug);

    tracing::info!("cqldrift v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Rehearse => rehearse(config).await,
        Commands::Check => check(config),
    }
}

/// Load configuration from an optional TOML file merged with
/// `CQLDRIFT_`-prefixed environment variables.
fn load_config(path: &str) -> Result<MigrateConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        figment = figment.merge(Toml::file(path));
    }
    let config: MigrateConfig = figment
        .merge(Env::prefixed("CQLDRIFT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn rehearse(config: MigrateConfig) -> Result<()> {
    tracing::info!(root = %config.root.display(), "Rehearsing against simulated cluster");

    let cluster = MemoryCluster::new(&config.meta_keyspace);
    let registry = Arc::new(SessionRegistry::new(Arc::new(cluster.clone())));
    let mut orchestrator = Orchestrator::new(config, registry);

    match orchestrator.run().await {
        ExitDisposition::Exit(0) => Ok(()),
        ExitDisposition::Exit(code) => std::process::exit(code),
        // Deliberately no exit call: the lingering state is the operator's
        // signal that the lock needs manual recovery.
        ExitDisposition::Linger => Ok(()),
    }
}

fn check(config: MigrateConfig) -> Result<()> {
    let scripts = cqldrift_engine::scan(&config)
        .with_context(|| format!("scan of {} failed", config.root.display()))?;

    if scripts.is_empty() {
        anyhow::bail!("no scripts found under {}", config.root.display());
    }

    for script in &scripts {
        let role = match &script.kind {
            ScriptKind::Init => "init".to_string(),
            ScriptKind::Bootstrap { keyspace } => format!("bootstrap {keyspace}"),
            ScriptKind::Migration {
                keyspace, service, ..
            } => format!("migration {keyspace}/{service}"),
        };
        println!(
            "{}  {:<40} {} ({} statement{})",
            script.checksum,
            script.relative_path.display(),
            role,
            script.statement_count,
            if script.statement_count == 1 { "" } else { "s" },
        );
    }
    println!("{} script(s) OK", scripts.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &std::path::Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn check_reports_discovered_scripts() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "cqlmigrate.cql", "CREATE KEYSPACE cqldrift;");
        write(temp.path(), "events/bootstrap.cql", "CREATE KEYSPACE events;");
        write(
            temp.path(),
            "events/ingest/001.cql",
            "CREATE TABLE events.t (x int);",
        );

        let config = MigrateConfig::for_testing(temp.path());
        check(config).unwrap();
    }

    #[test]
    fn check_fails_on_empty_tree() {
        let temp = tempfile::tempdir().unwrap();
        let config = MigrateConfig::for_testing(temp.path());
        assert!(check(config).is_err());
    }

    #[tokio::test]
    async fn rehearse_runs_a_valid_tree() {
        let temp = tempfile::tempdir().unwrap();
        write(
            temp.path(),
            "cqlmigrate.cql",
            "CREATE KEYSPACE IF NOT EXISTS cqldrift;",
        );
        write(temp.path(), "events/bootstrap.cql", "CREATE KEYSPACE events;");
        write(
            temp.path(),
            "events/ingest/001.cql",
            "CREATE TABLE events.t (x int);",
        );

        let config = MigrateConfig::for_testing(temp.path());
        rehearse(config).await.unwrap();
    }
}
