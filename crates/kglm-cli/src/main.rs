//! KGLM CLI - Command-line interface
//!
//! Usage:
//!   kglm encode <input> [--mode <mode>] [--alias-db <path>] [--max-parents <n>]
//!   kglm stats <input>
//!   kglm score <input> [--knowledge-graph <path>] [--vocab <path>] [--save-vocab <path>]
//!
//! Every command accepts `--config <path>`; `KGLM_*` environment variables
//! override the file.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use kglm_core::{
    EncodingMode, KglmConfig, KnowledgeGraph, LoggingConfig, MentionType, Vocabularies,
};
use kglm_data::{
    build_vocabularies, normalize_entity_id, read_documents, AliasDatabase, AnnotationEncoder,
    ChunkedBatcher,
};
use kglm_graph::InMemoryKnowledgeGraph;
use kglm_model::{KglmModel, Phase};

#[derive(Parser)]
#[command(name = "kglm")]
#[command(about = "Knowledge graph language model annotation encoder and scorer")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode annotated documents to JSON lines on stdout
    Encode {
        /// JSON lines documents
        input: PathBuf,
        /// generative or discriminative
        #[arg(long)]
        mode: Option<EncodingMode>,
        /// Alias database (JSON)
        #[arg(long)]
        alias_db: Option<PathBuf>,
        /// Maximum parents kept per derived mention
        #[arg(long)]
        max_parents: Option<usize>,
    },
    /// Count documents, tokens and mentions
    Stats {
        /// JSON lines documents
        input: PathBuf,
    },
    /// Encode, batch and score documents; prints metrics as JSON
    Score {
        /// JSON lines documents
        input: PathBuf,
        /// Alias database (JSON)
        #[arg(long)]
        alias_db: Option<PathBuf>,
        /// Knowledge graph (JSON lines)
        #[arg(long)]
        knowledge_graph: Option<PathBuf>,
        /// Index with these vocabularies instead of building them from the input
        #[arg(long)]
        vocab: Option<PathBuf>,
        /// Write the vocabularies used for scoring
        #[arg(long)]
        save_vocab: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => KglmConfig::from_file(path)?,
        None => KglmConfig::default(),
    }
    .with_env_override()?;

    init_tracing(&config.logging);

    match cli.command {
        Commands::Encode {
            input,
            mode,
            alias_db,
            max_parents,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.data.mode = mode;
            }
            if let Some(max_parents) = max_parents {
                config.data.max_parents = max_parents;
            }
            if alias_db.is_some() {
                config.data.alias_database_path = alias_db;
            }
            encode(&config, &input)
        }
        Commands::Stats { input } => stats(&input),
        Commands::Score {
            input,
            alias_db,
            knowledge_graph,
            vocab,
            save_vocab,
        } => {
            let mut config = config;
            if alias_db.is_some() {
                config.data.alias_database_path = alias_db;
            }
            if knowledge_graph.is_some() {
                config.data.knowledge_graph_path = knowledge_graph;
            }
            score(&config, &input, vocab.as_deref(), save_vocab.as_deref())
        }
    }
}

/// Log to stderr so stdout carries only command output
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn annotation_encoder(config: &KglmConfig) -> anyhow::Result<AnnotationEncoder> {
    config.validate()?;
    let path = config
        .data
        .require_alias_database()
        .context("pass --alias-db or set KGLM_ALIAS_DB")?;
    let aliases = AliasDatabase::load(path)?;
    Ok(AnnotationEncoder::from_config(&config.data, Arc::new(aliases))?)
}

fn encode(config: &KglmConfig, input: &Path) -> anyhow::Result<()> {
    let encoder = annotation_encoder(config)?;
    let documents = read_documents(input)?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for document in &documents {
        serde_json::to_writer(&mut out, &encoder.encode(document))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    tracing::info!("Encoded {} documents ({})", documents.len(), encoder.mode());
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct Stats {
    documents: usize,
    annotated_documents: usize,
    tokens: usize,
    mentions: usize,
    new_mentions: usize,
    derived_mentions: usize,
    untrackable_mentions: usize,
}

fn stats(input: &Path) -> anyhow::Result<()> {
    let mut stats = Stats::default();
    for document in read_documents(input)? {
        stats.documents += 1;
        stats.tokens += document.num_tokens();
        let Some(annotations) = &document.annotations else {
            continue;
        };
        stats.annotated_documents += 1;
        for annotation in annotations {
            stats.mentions += 1;
            if normalize_entity_id(&annotation.id).is_none() {
                stats.untrackable_mentions += 1;
            } else if annotation.is_new() {
                stats.new_mentions += 1;
            } else {
                stats.derived_mentions += 1;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn score(
    config: &KglmConfig,
    input: &Path,
    vocab: Option<&Path>,
    save_vocab: Option<&Path>,
) -> anyhow::Result<()> {
    let encoder = annotation_encoder(config)?;
    let graph = match &config.data.knowledge_graph_path {
        Some(path) => InMemoryKnowledgeGraph::load(path)?,
        None => {
            tracing::warn!("No knowledge graph configured; every relation scores at the floor");
            InMemoryKnowledgeGraph::new()
        }
    };

    let instances: Vec<_> = read_documents(input)?
        .iter()
        .map(|document| encoder.encode(document))
        .collect();
    let labelled = instances
        .iter()
        .filter_map(|i| i.labels.as_ref())
        .flat_map(|l| l.mention_type.iter())
        .filter(|kind| **kind != MentionType::None)
        .count();
    tracing::info!(
        "Scoring {} documents ({} mention positions)",
        instances.len(),
        labelled
    );

    let vocabs = match vocab {
        Some(path) => Vocabularies::load(path)?,
        None => {
            let mut vocabs = build_vocabularies(&instances);
            graph.extend_vocabularies(&mut vocabs);
            vocabs
        }
    };
    if let Some(path) = save_vocab {
        vocabs.save(path)?;
        tracing::info!("Saved vocabularies to {}", path.display());
    }
    let vocabs = Arc::new(vocabs);
    let graph: Arc<dyn KnowledgeGraph> = Arc::new(graph);

    let mut model = KglmModel::from_config(&config.model, Arc::clone(&vocabs), graph)?;
    let mut session = model.session();
    session.enter_phase(Phase::Evaluation);

    let batcher = ChunkedBatcher::new(config.data.batch_size, config.data.chunk_length);
    let mut num_batches = 0;
    for batch in batcher.batches(instances, &vocabs) {
        model.forward(&mut session, &batch?)?;
        num_batches += 1;
    }
    tracing::info!("Scored {} batches", num_batches);

    println!("{}", serde_json::to_string_pretty(&model.metrics(true))?);
    Ok(())
}
