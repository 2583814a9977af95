//! Command-line driver for the geocoding index maintenance tasks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gazetteer_db::dsn::redacted_dsn;
use gazetteer_indexer::Indexer;
use gazetteer_tokenizer::phrases::PhraseSettings;
use gazetteer_tokenizer::{create_tokenizer, SpecialPhrasesImporter};

#[derive(Parser)]
#[command(name = "gazetteer")]
#[command(about = "Maintenance tools for the gazetteer geocoding database")]
#[command(version)]
struct Cli {
    /// Database connection string
    #[arg(long, env = "NOMINATIM_DATABASE_DSN")]
    dsn: String,

    /// Tokenizer used when the database was imported
    #[arg(long, default_value = gazetteer_tokenizer::factory::DEFAULT_TOKENIZER)]
    tokenizer: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reindex all new and modified data
    Index {
        /// Index only administrative boundaries
        #[arg(long)]
        boundaries_only: bool,

        /// Index everything except administrative boundaries
        #[arg(long)]
        no_boundaries: bool,

        /// Minimum/starting rank
        #[arg(short = 'r', long, value_name = "RANK", default_value_t = 0)]
        minrank: i32,

        /// Maximum/finishing rank
        #[arg(short = 'R', long, value_name = "RANK", default_value_t = 30)]
        maxrank: i32,

        /// Number of worker connections (defaults to the CPU count)
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },

    /// Import special search phrases
    SpecialPhrases {
        /// Import special phrases from the OSM wiki to the database
        #[arg(long)]
        import_from_wiki: bool,

        /// Comma-separated list of languages to import
        #[arg(long, value_delimiter = ',')]
        languages: Vec<String>,

        /// JSON file with class/type black and white lists
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Using database {}", redacted_dsn(&cli.dsn));

    match &cli.command {
        Commands::Index {
            boundaries_only,
            no_boundaries,
            minrank,
            maxrank,
            threads,
        } => {
            run_index(
                &cli,
                *boundaries_only,
                *no_boundaries,
                *minrank,
                *maxrank,
                *threads,
            )
            .await?;
        }
        Commands::SpecialPhrases {
            import_from_wiki,
            languages,
            settings,
        } => {
            run_special_phrases(&cli, *import_from_wiki, languages.clone(), settings.clone())
                .await?;
        }
    }

    Ok(())
}

async fn run_index(
    cli: &Cli,
    boundaries_only: bool,
    no_boundaries: bool,
    minrank: i32,
    maxrank: i32,
    threads: Option<usize>,
) -> Result<()> {
    let tokenizer = create_tokenizer(&cli.tokenizer, &cli.dsn)
        .context("cannot initialize the tokenizer for this database")?;
    let threads = threads.unwrap_or_else(default_threads).max(1);

    let indexer = Indexer::new(&cli.dsn, tokenizer, threads);

    if !no_boundaries {
        indexer.index_boundaries(minrank, maxrank).await?;
    }
    if !boundaries_only {
        indexer.index_by_rank(minrank, maxrank).await?;
    }

    // Only an unrestricted run leaves the whole database indexed.
    if !no_boundaries && !boundaries_only && minrank == 0 && maxrank == 30 {
        indexer.update_status_table().await?;
    }

    Ok(())
}

async fn run_special_phrases(
    cli: &Cli,
    import_from_wiki: bool,
    languages: Vec<String>,
    settings: Option<PathBuf>,
) -> Result<()> {
    if !import_from_wiki {
        return Ok(());
    }

    tracing::warn!("Special phrases importation starting");

    let settings = match settings {
        Some(path) => PhraseSettings::from_file(&path)
            .with_context(|| format!("cannot load phrase settings from {}", path.display()))?,
        None => PhraseSettings::default(),
    };

    let tokenizer = create_tokenizer(&cli.tokenizer, &cli.dsn)
        .context("cannot initialize the tokenizer for this database")?;
    let mut analyzer = tokenizer.name_analyzer().await?;

    let importer = SpecialPhrasesImporter::new(&cli.dsn, languages, settings);
    let result = importer.import_from_wiki(&mut analyzer).await;
    analyzer.close().await;
    result?;

    Ok(())
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
