//! CLI entry point for the Recall backend (for dev and testing).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use recall_core::{
    app_data_dir, chunk_text, config::config_path, load_config, load_documents, scan_documents,
    set_documents_root, shutdown_channel, status, Assistant, ChatEvent, Config, Embedder,
    LoadOutcome, OllamaClient, SharedStore, Shutdown,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const DEFAULT_LOG_FILTER: &str = "warn,recall_core=info";

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Recall: chat with your local text documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status and the active configuration.
    Status,
    /// Show where Recall stores its config (app data directory).
    DataDir,
    /// Remember a documents directory for later `load`, `ask` and `chat`.
    SetRoot {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// List the .txt documents a load would pick up.
    Scan {
        /// Directory to scan. Defaults to the configured documents root.
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Show how a file would be chunked with the configured strategy.
    Chunk {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Load (chunk and embed) a documents directory and report the result.
    Load {
        /// Directory to load. Defaults to the configured documents root.
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load documents, then answer one question.
    Ask {
        /// Directory to load. Defaults to the configured documents root.
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,
        /// Print chat events as JSON lines.
        #[arg(long)]
        json: bool,
        question: String,
    },
    /// Interactive chat. `:load PATH`, `:reload` and `:quit` are available at the prompt.
    Chat {
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, shutting down...");
            trigger.trigger();
        }
    });

    let config = load_config();
    let result = match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            print_status(&config);
            Ok(())
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => {
                println!("{}", p.display());
                Ok(())
            }
            None => Err("could not determine app data directory".into()),
        },
        Commands::SetRoot { path } => set_documents_root(&path)
            .map(|root| println!("Documents root set to {}", root.display()))
            .map_err(Into::into),
        Commands::Scan { path } => run_scan(path, &config),
        Commands::Chunk { file } => run_chunk(&file, &config),
        Commands::Load { path, json } => run_load(path, json, &config, &shutdown).await,
        Commands::Ask { dir, json, question } => {
            run_ask(dir, &question, json, &config, &shutdown).await
        }
        Commands::Chat { dir } => run_chat(dir, &config, &shutdown).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_status(config: &Config) {
    println!("Recall backend");
    println!("  core: {}", status());
    match config_path() {
        Some(p) => println!("  config: {}", p.display()),
        None => println!("  config: (no app data directory)"),
    }
    match config.documents_root() {
        Some(root) => println!("  documents: {}", root.display()),
        None => println!("  documents: (not set)"),
    }
    println!(
        "  ollama: {} (embed: {}, chat: {})",
        config.ollama.url, config.ollama.embed_model, config.ollama.chat_model
    );
    let threshold = match config.retrieval.relevance_threshold {
        Some(t) => format!("{t:.2}"),
        None => "off".to_string(),
    };
    println!(
        "  retrieval: top {} chunks, relevance threshold {}",
        config.retrieval.top_n, threshold
    );
}

fn run_scan(path: Option<PathBuf>, config: &Config) -> CliResult {
    let root = path
        .or_else(|| config.documents_root())
        .ok_or("no directory given and no documents root configured")?;
    let docs = scan_documents(&root)?;
    println!("Found {} document(s) in {}", docs.len(), root.display());
    for doc in docs {
        let text = std::fs::read_to_string(&doc.path).unwrap_or_default();
        let first = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        let preview: String = first.chars().take(60).collect();
        let ellipsis = if first.chars().count() > 60 { "..." } else { "" };
        println!("  {}  {}{}", doc.name, preview, ellipsis);
    }
    Ok(())
}

fn run_chunk(file: &Path, config: &Config) -> CliResult {
    let text = std::fs::read_to_string(file)?;
    let chunks = chunk_text(&text, &config.chunking);
    println!(
        "{} chunk(s) from {} ({:?}, target {}, overlap {})",
        chunks.len(),
        file.display(),
        config.chunking.strategy,
        config.chunking.target_size(),
        config.chunking.overlap()
    );
    for (i, chunk) in chunks.iter().enumerate() {
        println!("--- chunk {} ({} chars) ---", i + 1, chunk.chars().count());
        println!("{chunk}");
    }
    Ok(())
}

fn ollama_client(config: &Config, shutdown: &Shutdown) -> CliResult<Arc<OllamaClient>> {
    let client = OllamaClient::from_config(&config.ollama)?.with_shutdown(shutdown.clone());
    Ok(Arc::new(client))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadReport<'a> {
    cancelled: bool,
    files_processed: usize,
    chunks_loaded: usize,
    interrupted: bool,
    skipped: Vec<SkippedReport<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SkippedReport<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_index: Option<usize>,
    reason: &'a str,
}

impl<'a> From<&'a LoadOutcome> for LoadReport<'a> {
    fn from(outcome: &'a LoadOutcome) -> Self {
        match outcome {
            LoadOutcome::Cancelled => Self {
                cancelled: true,
                files_processed: 0,
                chunks_loaded: 0,
                interrupted: false,
                skipped: Vec::new(),
            },
            LoadOutcome::Loaded(summary) => Self {
                cancelled: false,
                files_processed: summary.files_processed,
                chunks_loaded: summary.chunks_loaded,
                interrupted: summary.interrupted,
                skipped: summary
                    .skipped
                    .iter()
                    .map(|item| SkippedReport {
                        source: &item.source,
                        chunk_index: item.chunk_index,
                        reason: &item.reason,
                    })
                    .collect(),
            },
        }
    }
}

/// Loads `dir` into `store` and reports the outcome. Output goes to stderr
/// unless `json` is set, so answers on stdout stay clean.
async fn load_into(
    dir: Option<&Path>,
    store: &SharedStore,
    embedder: &dyn Embedder,
    config: &Config,
    json: bool,
) -> CliResult {
    let outcome = load_documents(dir, store, embedder, &config.chunking).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&LoadReport::from(&outcome))?);
        return Ok(());
    }
    match &outcome {
        LoadOutcome::Cancelled => eprintln!("{outcome}"),
        LoadOutcome::Loaded(summary) => {
            eprintln!("Loaded documents: {summary}");
            if summary.interrupted {
                eprintln!("  (stopped early by shutdown)");
            }
            for item in &summary.skipped {
                match item.chunk_index {
                    Some(i) => eprintln!("  skipped {} chunk #{}: {}", item.source, i, item.reason),
                    None => eprintln!("  skipped {}: {}", item.source, item.reason),
                }
            }
        }
    }
    Ok(())
}

async fn run_load(path: Option<PathBuf>, json: bool, config: &Config, shutdown: &Shutdown) -> CliResult {
    let client = ollama_client(config, shutdown)?;
    let store = SharedStore::new();
    let dir = path.or_else(|| config.documents_root());
    load_into(dir.as_deref(), &store, &*client, config, json).await
}

async fn run_ask(
    dir: Option<PathBuf>,
    question: &str,
    json: bool,
    config: &Config,
    shutdown: &Shutdown,
) -> CliResult {
    let client = ollama_client(config, shutdown)?;
    let store = SharedStore::new();
    if let Some(root) = dir.or_else(|| config.documents_root()) {
        load_into(Some(&root), &store, &*client, config, false).await?;
    }
    if shutdown.is_triggered() {
        return Ok(());
    }
    let assistant = Assistant::new(store, client.clone(), client, config.retrieval.clone())
        .with_shutdown(shutdown.clone());
    ask_once(&assistant, question, json).await
}

/// Runs one turn and renders its events as they arrive.
async fn ask_once(assistant: &Assistant, question: &str, json: bool) -> CliResult {
    let (tx, mut rx) = mpsc::unbounded_channel();
    // On failure the turn has already sent a Done event carrying the error.
    let handle = assistant.handle_message(question, tx).await.ok();

    let mut error = None;
    while let Some(event) = rx.recv().await {
        render(&event, json)?;
        if let ChatEvent::Done(stats) = event {
            error = stats.error;
        }
    }
    if let Some(handle) = handle {
        handle.await?;
    }
    match error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn render(event: &ChatEvent, json: bool) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
        return Ok(());
    }
    match event {
        ChatEvent::Sources(sources) if sources.is_empty() => {}
        ChatEvent::Sources(sources) => {
            writeln!(out, "Sources:")?;
            for s in sources {
                writeln!(out, "  {} (chunk {}, relevance {:.2})", s.file_name, s.chunk_id, s.score)?;
            }
            writeln!(out)?;
        }
        ChatEvent::Token(text) => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        ChatEvent::Done(stats) => {
            writeln!(out)?;
            if stats.error.is_none() {
                eprintln!("[{} ms, {:.1} chars/s]", stats.elapsed_ms, stats.chars_per_second);
            }
        }
    }
    Ok(())
}

async fn run_chat(dir: Option<PathBuf>, config: &Config, shutdown: &Shutdown) -> CliResult {
    let client = ollama_client(config, shutdown)?;
    let mut root = dir.or_else(|| config.documents_root());
    let store = SharedStore::new();
    if root.is_some() {
        load_into(root.as_deref(), &store, &*client, config, false).await?;
    }
    let assistant = Assistant::new(store, client.clone(), client.clone(), config.retrieval.clone())
        .with_shutdown(shutdown.clone());

    println!("Ask a question. Commands: :load PATH, :reload, :quit");
    let mut lines = spawn_stdin_reader();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Skip => continue,
            ReplCommand::Quit => break,
            ReplCommand::Load(picked) => {
                let dir = pick_directory(&mut root, picked);
                if let Err(e) = load_into(dir.as_deref(), assistant.store(), &*client, config, false).await {
                    eprintln!("Error: {e}");
                }
            }
            ReplCommand::Reload => {
                if let Err(e) = load_into(root.as_deref(), assistant.store(), &*client, config, false).await {
                    eprintln!("Error: {e}");
                }
            }
            ReplCommand::Ask(question) => {
                if let Err(e) = ask_once(&assistant, question, false).await {
                    eprintln!("Error: {e}");
                }
            }
        }
    }
    Ok(())
}

/// One line typed at the chat prompt.
#[derive(Debug, PartialEq)]
enum ReplCommand<'a> {
    Skip,
    Quit,
    /// `:load PATH`; a bare `:load` is a dismissed picker.
    Load(Option<PathBuf>),
    Reload,
    Ask(&'a str),
}

impl<'a> ReplCommand<'a> {
    fn parse(line: &'a str) -> Self {
        let input = line.trim();
        match input {
            "" => Self::Skip,
            ":quit" | ":q" => Self::Quit,
            ":reload" => Self::Reload,
            _ => match input.strip_prefix(":load") {
                Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                    let rest = rest.trim();
                    Self::Load((!rest.is_empty()).then(|| PathBuf::from(rest)))
                }
                _ => Self::Ask(input),
            },
        }
    }
}

/// Returns the directory a `:load` should read. A picked directory becomes
/// the one `:reload` uses; a dismissed pick loads nothing and keeps it.
fn pick_directory(root: &mut Option<PathBuf>, picked: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(dir) = &picked {
        *root = Some(dir.clone());
    }
    picked
}

/// Reads stdin lines on a plain thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
