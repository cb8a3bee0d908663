use anyhow::Result;
use clap::Parser;
use function_classifier::artifacts::{ArtifactWriter, WrittenArtifact};
use function_classifier::classifier::{DictionaryFile, SpellCommand, WordClassifier};
use function_classifier::cli::{Cli, Commands};
use function_classifier::config::{IdentifierInput, RunConfig, clear_store, resolve_store_path};
use function_classifier::extract::{read_identifier_list, scan_source_tree};
use function_classifier::oracle::{GithubCodeSearch, RetryingOracle};
use function_classifier::pipeline::{Pipeline, ResolutionFailure, ResolutionStats};
use function_classifier::store::FrequencyStore;
use function_classifier::workdir::{WorkDir, install_signal_cleanup};
use serde::Serialize;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = RunConfig::resolve(&cli)?;
            let summary = run(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Stats => {
            let store_path = resolve_store_path(&cli)?;
            let store = FrequencyStore::load(store_path)?;
            let today = chrono::Local::now().date_naive();
            let stats = store.stats(today, cli.age_limit);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Clear => {
            let store_path = resolve_store_path(&cli)?;
            let removed = clear_store(&store_path)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "store_path": store_path.to_string_lossy(),
                    "removed": removed,
                }))?
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug, Serialize)]
struct RunSummary {
    identifiers: usize,
    words: usize,
    frequent: usize,
    rare: usize,
    failures: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<ResolutionFailure>,
    resolution: ResolutionStats,
    oracle_requests: u64,
    store_path: String,
    store_records: usize,
    artifacts: Vec<WrittenArtifact>,
    duration_ms: u64,
}

fn run(config: &RunConfig) -> Result<RunSummary> {
    let start = Instant::now();
    install_signal_cleanup()?;
    config.ensure_output_dir()?;

    let today = chrono::Local::now().date_naive();
    let work = WorkDir::new()?;

    let classifier: Box<dyn WordClassifier> = match &config.dictionary {
        Some(path) => Box::new(DictionaryFile::load(path)?),
        None => Box::new(SpellCommand::discover(work.path().to_path_buf())?),
    };

    let mut store = FrequencyStore::open_or_create(config.store_path.clone())?;
    tracing::info!(
        path = %store.path().display(),
        records = store.len(),
        "loaded frequency store"
    );

    // Without a token no frequency rule was requested, so the oracle stays idle.
    let search = GithubCodeSearch::new(
        config.token.clone().unwrap_or_default(),
        config.language.clone(),
    )?;
    let mut oracle = RetryingOracle::new(search, config.retry);

    let identifiers = match &config.input {
        IdentifierInput::List(path) => read_identifier_list(path)?,
        IdentifierInput::SourceTree(root) => scan_source_tree(root)?,
    };
    let words = classifier.words(&identifiers)?;

    let classification =
        Pipeline::new(config, &mut store, &mut oracle, today).run(&identifiers, &words)?;

    let artifacts =
        ArtifactWriter::new(config.output_dir.clone()).write_all(&classification, &config.rules)?;

    if !classification.failures.is_empty() {
        tracing::warn!(
            failures = classification.failures.len(),
            "some identifiers could not be resolved and were left out of 933150/933151"
        );
        if config.verbose {
            for failure in &classification.failures {
                tracing::warn!(
                    identifier = %failure.identifier,
                    kind = ?failure.kind,
                    reason = %failure.reason,
                    "unresolved"
                );
            }
        }
    }

    Ok(RunSummary {
        identifiers: identifiers.len(),
        words: classification.words.len(),
        frequent: classification.frequent.len(),
        rare: classification.rare.len(),
        failures: classification.failures.len(),
        failed: if config.verbose {
            classification.failures.clone()
        } else {
            Vec::new()
        },
        resolution: classification.stats.clone(),
        oracle_requests: oracle.queries(),
        store_path: store.path().to_string_lossy().to_string(),
        store_records: store.len(),
        artifacts,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
