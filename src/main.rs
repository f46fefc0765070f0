use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::config::{load_config, render_config};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "chbackup",
    about = "Downloads ClickHouse backups from remote storage",
    version
)]
struct Cli {
    /// Configuration file, read after the default locations
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a backup from remote storage
    Download {
        /// Backup to download; remote backups are listed when omitted
        name: Option<String>,

        /// Comma-separated `db.table` globs to restrict the download to
        #[clap(short, long, default_value = "")]
        table: String,

        /// Download table schemas only, no data
        #[clap(short, long)]
        schema: bool,
    },

    /// List backups on remote storage
    ListRemote,

    /// List backups present locally
    ListLocal,

    /// Print the effective configuration
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logger = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_level(true)
        .format_module_path(false)
        .format_indent(Some(4))
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .build();
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(sentry_log::SentryLogger::with_dest(logger)))?;
    log::set_max_level(max_level);

    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let config = load_config(cli.config.as_deref()).context("can't load configuration")?;

    match cli.command {
        Commands::Download {
            name,
            table,
            schema,
        } => {
            let name = name.unwrap_or_default();
            backup::download(&config, &name, &table, schema)
                .await
                .with_context(|| format!("download of '{name}' failed"))?;
        }
        Commands::ListRemote => {
            backup::list_remote(&config, &mut std::io::stdout())
                .await
                .context("can't list remote backups")?;
        }
        Commands::ListLocal => {
            backup::list_local(&config, &mut std::io::stdout())
                .await
                .context("can't list local backups")?;
        }
        Commands::DefaultConfig => {
            let rendered = render_config(&config)?;
            std::io::stdout().write_all(rendered.as_bytes())?;
        }
    }

    Ok(())
}
