use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use oracle_sync::schema::store;
use oracle_sync::sql::split_statements;
use oracle_sync::utils::init_logging;
use oracle_sync::{
    config, Config, DdlGenerator, Error, GeneratorOptions, OracleSyncClient, SchemaDiffer,
    SqlStatementParser, SyncOptions,
};

mod render;

use render::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "oracle_sync")]
#[command(about = "Compare and synchronize Oracle schemas and table data", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "oracle_sync.toml")]
    config: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Side {
    Source,
    Target,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the changes that turn the source schema into the target schema
    Diff {
        /// Compare this snapshot file instead of the live source
        #[arg(long, requires = "target_file")]
        source_file: Option<PathBuf>,
        /// Compare this snapshot file instead of the live target
        #[arg(long, requires = "source_file")]
        target_file: Option<PathBuf>,
    },

    /// Print the DDL that brings the target schema in line with the source
    Generate {
        #[arg(long, requires = "target_file")]
        source_file: Option<PathBuf>,
        #[arg(long, requires = "source_file")]
        target_file: Option<PathBuf>,
    },

    /// Classify SQL statements
    Parse {
        /// Statement text
        #[arg(long, conflicts_with = "file")]
        sql: Option<String>,
        /// Script file, split into statements
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    #[command(flatten)]
    Live(LiveCommand),
}

/// Commands that need a live connection
#[derive(Subcommand, Debug)]
enum LiveCommand {
    /// Check that every configured database is reachable
    TestConnection,

    /// Capture a schema snapshot into a .json or .yaml file
    Snapshot {
        #[arg(long, value_enum, default_value = "source")]
        side: Side,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Apply the generated DDL to the target
    Sync {
        /// Report the statements without executing them
        #[arg(long)]
        dry_run: bool,
        /// Record failures and carry on with the next statement
        #[arg(long)]
        continue_on_error: bool,
        /// Statements per transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Compare the rows of one table on both sides
    DataDiff {
        #[arg(short, long)]
        table: String,
        /// Key column (repeatable); defaults to the primary key
        #[arg(short, long = "key")]
        keys: Vec<String>,
        /// Column to compare (repeatable); defaults to all columns. Row
        /// changes are always applied over all columns.
        #[arg(long = "column", conflicts_with = "apply")]
        columns: Vec<String>,
        /// Filter applied on both sides
        #[arg(long = "where")]
        where_clause: Option<String>,
        /// Apply the row changes to the target
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let path = path.to_string_lossy();
    let config = config::load_from_file(&path).with_context(|| format!("loading {}", path))?;
    init_logging(config.logging.as_ref())?;
    Ok(config)
}

async fn connect(config: Config) -> anyhow::Result<OracleSyncClient> {
    let client = OracleSyncClient::connect(config).await?;

    let token = client.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    Ok(client)
}

fn sync_options(config: &Config, dry_run: bool, continue_on_error: bool, batch_size: Option<usize>) -> anyhow::Result<SyncOptions> {
    let mut options = SyncOptions::from(&config.sync);
    options.dry_run |= dry_run;
    if continue_on_error {
        options.stop_on_error = false;
    }
    if let Some(size) = batch_size {
        if size == 0 {
            bail!("--batch-size must be at least 1");
        }
        options.batch_size = size;
    }
    Ok(options)
}

fn offline_delta(
    source_file: &Option<PathBuf>,
    target_file: &Option<PathBuf>,
) -> anyhow::Result<Option<(oracle_sync::SchemaSnapshot, oracle_sync::SchemaSnapshot)>> {
    match (source_file, target_file) {
        (Some(source), Some(target)) => {
            let source = store::load(source).with_context(|| format!("reading {}", source.display()))?;
            let target = store::load(target).with_context(|| format!("reading {}", target.display()))?;
            Ok(Some((source, target)))
        }
        _ => Ok(None),
    }
}

/// Generator for snapshot files, honouring the `[sync]` settings when a
/// configuration is at hand
fn offline_generator(config: Option<&Config>) -> DdlGenerator {
    match config {
        Some(config) => DdlGenerator::new(GeneratorOptions::from(&config.sync)),
        None => DdlGenerator::default(),
    }
}

/// Print a failed run's partial report before surfacing the error
fn report_apply_error(error: Error, format: OutputFormat) -> anyhow::Error {
    if let Error::ApplyError { report, .. } = &error {
        if let Ok(text) = render::report(report, format) {
            print!("{}", text);
        }
    }
    error.into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = cli.format;

    match cli.command {
        Command::Parse { sql, file } => {
            init_logging(None)?;
            let statements = match (sql, file) {
                (Some(sql), _) => vec![sql],
                (None, Some(file)) => {
                    let script = std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    split_statements(&script)
                }
                (None, None) => bail!("pass --sql or --file"),
            };
            let parsed: Vec<_> = statements
                .into_iter()
                .map(|s| {
                    let facts = SqlStatementParser::parse(&s);
                    (s, facts)
                })
                .collect();
            print!("{}", render::parsed(&parsed, format)?);
        }

        Command::Diff { source_file, target_file } => {
            let (source, target) = match offline_delta(&source_file, &target_file)? {
                Some(pair) => {
                    init_logging(None)?;
                    pair
                }
                None => {
                    let client = connect(load_config(&cli.config)?).await?;
                    (client.snapshot_source().await?, client.snapshot_target().await?)
                }
            };
            let delta = SchemaDiffer::diff(&source, &target)?;
            print!("{}", render::delta(&delta, format)?);
        }

        Command::Generate { source_file, target_file } => {
            let statements = match offline_delta(&source_file, &target_file)? {
                Some((source, target)) => {
                    let config = if cli.config.exists() {
                        Some(load_config(&cli.config)?)
                    } else {
                        init_logging(None)?;
                        None
                    };
                    let delta = SchemaDiffer::diff(&target, &source)?;
                    offline_generator(config.as_ref()).generate(&delta)?
                }
                None => connect(load_config(&cli.config)?).await?.plan().await?,
            };
            print!("{}", render::statements(&statements, format)?);
        }

        Command::Live(command) => {
            let config = load_config(&cli.config)?;
            let mut client = connect(config.clone()).await?;

            match command {
                LiveCommand::TestConnection => {
                    client.test_connections().await?;
                    println!("All connections OK");
                }
                LiveCommand::Snapshot { side, output } => {
                    let snapshot = match side {
                        Side::Source => client.snapshot_source().await?,
                        Side::Target => client.snapshot_target().await?,
                    };
                    store::save(&snapshot, &output)?;
                    print!("{}", render::snapshot(&snapshot, format)?);
                }
                LiveCommand::Sync { dry_run, continue_on_error, batch_size } => {
                    let options = sync_options(&config, dry_run, continue_on_error, batch_size)?;
                    let report = client
                        .sync(options)
                        .await
                        .map_err(|e| report_apply_error(e, format))?;
                    print!("{}", render::report(&report, format)?);
                    if !report.succeeded() {
                        bail!("{} statements failed", report.count(oracle_sync::OutcomeStatus::Failed));
                    }
                }
                LiveCommand::DataDiff { table, keys, columns, where_clause, apply, dry_run } => {
                    if apply {
                        let options = sync_options(&config, dry_run, false, None)?;
                        let report = client
                            .sync_data(&table, &keys, where_clause.as_deref(), options)
                            .await
                            .map_err(|e| report_apply_error(e, format))?;
                        print!("{}", render::report(&report, format)?);
                    } else {
                        let delta = client
                            .data_diff(&table, &keys, &columns, where_clause.as_deref())
                            .await?;
                        print!("{}", render::data_delta(&table, &delta, format)?);
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_generation_follows_the_sync_settings() {
        let config = config::parse(
            r#"
            [source]
            host = "db1"
            service_name = "PDB1"
            username = "app"

            [sync]
            guard_statements = true
            allow_table_removal = false
            "#,
        )
        .unwrap();

        let generator = offline_generator(Some(&config));
        assert!(generator.options().guard_statements);
        assert!(!generator.options().allow_table_removal);
        assert!(!offline_generator(None).options().guard_statements);
    }

    #[test]
    fn test_column_selection_cannot_be_applied() {
        let parsed = Cli::try_parse_from([
            "oracle_sync", "data-diff", "--table", "CUSTOMERS", "--column", "NAME", "--apply",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["oracle_sync", "data-diff", "--table", "CUSTOMERS", "--apply"]);
        assert!(parsed.is_ok());
    }
}
