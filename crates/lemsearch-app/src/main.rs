//! lemsearch binary - composition root.
//!
//! 1. Parse the CLI and load configuration from TOML
//! 2. Initialize tracing (stderr, so stdout stays the result surface)
//! 3. Build the embedding backend (ONNX model or mock)
//! 4. Dispatch the subcommand

mod cli;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::io::AsyncBufReadExt;

use lemsearch_bridge::{BridgeOptions, ChildProcessChannel, EngineCommand, QueryBridge};
use lemsearch_core::config::LemConfig;
use lemsearch_core::error::{LemError, Result};
use lemsearch_vector::codec;
use lemsearch_vector::corpus::simplify_dump;
use lemsearch_vector::embedding::{EmbeddingService, MockEmbedding, OnnxEmbeddingService};
use lemsearch_vector::{load_index_file, CorpusVectorizer, VectorizeOptions};

use cli::{CliArgs, Command};

/// The embedding backend chosen at startup.
enum Embedder {
    Onnx(OnnxEmbeddingService),
    Mock(MockEmbedding),
}

impl Embedder {
    fn build(args: &CliArgs, config: &LemConfig) -> Result<Self> {
        if args.mock_embedder {
            tracing::info!(
                dimensions = config.model.embedding_dim,
                "Using mock embedder"
            );
            return Ok(Embedder::Mock(MockEmbedding::with_dimensions(
                config.model.embedding_dim,
            )));
        }
        let model_dir = args.resolve_model_dir(&config.model.model_dir);
        let service = OnnxEmbeddingService::from_directory(&model_dir, config.model.intra_threads)?;
        tracing::info!(path = %model_dir.display(), "Embedding model loaded");
        Ok(Embedder::Onnx(service))
    }
}

impl EmbeddingService for Embedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, LemError> {
        match self {
            Embedder::Onnx(service) => service.embed(text).await,
            Embedder::Mock(service) => service.embed(text).await,
        }
    }

    fn dimensions(&self) -> usize {
        match self {
            Embedder::Onnx(service) => service.dimensions(),
            Embedder::Mock(service) => service.dimensions(),
        }
    }
}

fn run_simplify(input: &Path, output: &Path, language: &str) -> Result<()> {
    let reader = BufReader::new(File::open(input)?);
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output)?);
    simplify_dump(reader, &mut writer, language)?;
    writer.flush()?;
    tracing::info!(output = %output.display(), "Simplified corpus written");
    Ok(())
}

async fn run_vectorize(
    embedder: Embedder,
    config: &LemConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    raw: bool,
) -> Result<()> {
    let input = input.unwrap_or_else(|| PathBuf::from(&config.vectorize.input));
    let output = output.unwrap_or_else(|| PathBuf::from(&config.vectorize.output));
    let options = VectorizeOptions {
        normalize: config.vectorize.normalize && !raw,
        progress_every: config.vectorize.progress_every,
    };
    CorpusVectorizer::new(embedder, options)
        .run_files(&input, &output)
        .await?;
    Ok(())
}

async fn run_embed(embedder: Embedder, text: Option<String>) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(LemError::Embedder("no text to embed".to_string()));
    }

    let embedding = codec::normalize(&embedder.embed(text).await?);
    println!("{}", codec::encode_csv(&embedding));
    Ok(())
}

fn run_inspect(path: &Path, dim: usize, limit: usize) -> Result<()> {
    let loaded = load_index_file(path, Some(dim))?;

    println!("Index: {}", path.display());
    println!("Records: {}", loaded.records.len());
    println!("Rejected lines: {}", loaded.rejected.len());
    for (line_no, reason) in loaded.rejected.iter().take(limit) {
        println!("  line {}: {}", line_no, reason);
    }
    for record in loaded.records.iter().take(limit) {
        println!(
            "{}\t{}\tnorm={:.4}",
            record.id,
            record.lemma,
            codec::l2_norm(&record.embedding)
        );
    }
    Ok(())
}

async fn run_query(
    embedder: Embedder,
    config: &LemConfig,
    engine: Option<PathBuf>,
    engine_args: Vec<String>,
) -> Result<()> {
    let mut command = EngineCommand::from_config(&config.engine);
    if let Some(program) = engine {
        command.program = program;
    }
    if !engine_args.is_empty() {
        command.args = engine_args;
    }

    let channel = ChildProcessChannel::spawn(&command)?;
    let mut bridge = QueryBridge::new(channel, embedder, BridgeOptions::from(&config.engine));

    println!("Initialization output:");
    bridge.initialize_with(|line| println!("{}", line)).await?;

    let outcome = query_console(&mut bridge).await;
    bridge.close().await?;
    outcome
}

/// What the console does with one line of user input.
#[derive(Debug, PartialEq, Eq)]
enum ConsoleInput<'a> {
    Skip,
    Quit,
    /// Sent to the engine as typed.
    Query(&'a str),
}

fn classify_input(line: &str) -> ConsoleInput<'_> {
    match line.trim() {
        "" => ConsoleInput::Skip,
        "quit" | "exit" => ConsoleInput::Quit,
        _ => ConsoleInput::Query(line),
    }
}

/// Read queries from stdin until EOF or `quit`, printing each response.
async fn query_console(bridge: &mut QueryBridge<ChildProcessChannel, Embedder>) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Search text: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        let text = match classify_input(&line) {
            ConsoleInput::Skip => continue,
            ConsoleInput::Quit => return Ok(()),
            ConsoleInput::Query(text) => text,
        };

        match bridge.query(text).await {
            Ok(result) => {
                println!("Search results:");
                println!("{}", result);
            }
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => tracing::warn!(error = %e, "Query failed"),
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = if config_file.exists() {
        LemConfig::load(&config_file)?
    } else {
        LemConfig::default()
    };

    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    match args.command {
        Command::Simplify {
            ref input,
            ref output,
            ref language,
        } => run_simplify(input, output, language)?,
        Command::Vectorize {
            ref input,
            ref output,
            raw,
        } => {
            let embedder = Embedder::build(&args, &config)?;
            run_vectorize(embedder, &config, input.clone(), output.clone(), raw).await?
        }
        Command::Embed { ref text } => {
            let embedder = Embedder::build(&args, &config)?;
            run_embed(embedder, text.clone()).await?
        }
        Command::Inspect {
            ref index,
            dim,
            limit,
        } => {
            let path = index
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.vectorize.output));
            run_inspect(&path, dim.unwrap_or(config.model.embedding_dim), limit)?
        }
        Command::Query {
            ref engine,
            ref engine_args,
        } => {
            let embedder = Embedder::build(&args, &config)?;
            run_query(embedder, &config, engine.clone(), engine_args.clone()).await?
        }
    }

    Ok(())
}
