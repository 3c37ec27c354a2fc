//! Agora CLI
//!
//! Chat with several philosopher agents at once, with live web-search context.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use agora_agents::{
    create_anthropic_backend, create_backend, AgentRegistry, AnthropicConfig, OpenAIBackendConfig,
    SharedBackend,
};
use agora_core::{default_engine, find_engine, DEFAULT_SEARCH_ENGINES};
use agora_runtime::{ChatEvent, ConversationOrchestrator, OrchestratorConfig};
use agora_search::{BrowserConfig, RuntimeState, SearchAcquirer, SearchConfig};

#[derive(Parser)]
#[command(name = "agora")]
#[command(author, version, about = "Agora: talk to several philosophers at once", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    /// Directory of persona TOML files (default: built-in philosophers)
    #[arg(long, global = true)]
    personas: Option<PathBuf>,

    /// Search engine to drive (Baidu, Bing, DuckDuckGo)
    #[arg(long, global = true)]
    engine: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive group conversation
    Chat {
        #[command(flatten)]
        backend: BackendArgs,

        /// Stored messages replayed per request (default: whole conversation)
        #[arg(long)]
        max_history: Option<usize>,
    },

    /// List the available agents
    Agents,

    /// Run a single web search and print the snippets
    Search {
        /// The search query
        #[arg(short, long)]
        query: String,
    },

    /// Check whether the browser runtime is usable
    Status,
}

#[derive(Args)]
struct BackendArgs {
    /// LLM model to use (default depends on provider)
    #[arg(short, long, env = "AGORA_MODEL")]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[arg(long, env = "AGORA_API_BASE")]
    base_url: Option<String>,

    /// API key for the OpenAI-compatible endpoint (optional for local servers)
    #[arg(long, env = "AGORA_API_KEY")]
    api_key: Option<String>,

    /// Use OpenRouter instead of the default endpoint
    #[arg(long)]
    openrouter: bool,

    /// OpenRouter API key (or set OPENROUTER_API_KEY env var)
    #[arg(long, env = "OPENROUTER_API_KEY")]
    openrouter_key: Option<String>,

    /// Use Anthropic instead of an OpenAI-compatible endpoint
    #[arg(long)]
    anthropic: bool,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_key: Option<String>,
}

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

#[tokio::main]
async fn main() -> Result<()> {
    // Values from .env feed the clap env fallbacks
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to read .env: {}", e);
        }
    }

    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let registry = load_registry(cli.personas.as_ref())?;
    let search_config = search_config(cli.engine.as_deref())?;

    match cli.command {
        Commands::Chat {
            backend,
            max_history,
        } => {
            run_chat(registry, backend, max_history, search_config).await?;
        }
        Commands::Agents => {
            for agent in registry.list() {
                println!("{:<12} {}", agent.id, agent.display_name);
            }
        }
        Commands::Search { query } => {
            run_search(&query, search_config).await?;
        }
        Commands::Status => {
            check_status(search_config).await;
        }
    }

    Ok(())
}

fn load_registry(personas: Option<&PathBuf>) -> Result<AgentRegistry> {
    let registry = match personas {
        Some(dir) => AgentRegistry::load_from_dir(dir).map_err(|e| {
            anyhow::anyhow!("Failed to read personas from {}: {}", dir.display(), e)
        })?,
        None => AgentRegistry::load_embedded(),
    };

    if registry.is_empty() {
        anyhow::bail!("No enabled personas found");
    }

    Ok(registry)
}

fn search_config(engine: Option<&str>) -> Result<SearchConfig> {
    let engine = match engine {
        Some(name) => find_engine(name).ok_or_else(|| {
            let known: Vec<&str> = DEFAULT_SEARCH_ENGINES.iter().map(|e| e.name).collect();
            anyhow::anyhow!("Unknown search engine '{}'. Available: {}", name, known.join(", "))
        })?,
        None => default_engine(),
    };

    Ok(SearchConfig {
        engine,
        ..Default::default()
    })
}

fn build_backend(args: BackendArgs) -> Result<SharedBackend> {
    let backend = if args.anthropic {
        let key = args.anthropic_key.ok_or_else(|| {
            anyhow::anyhow!("Anthropic API key required. Set ANTHROPIC_API_KEY or use --anthropic-key")
        })?;
        let model = args.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);
        create_anthropic_backend(AnthropicConfig::new(&key, model))?
    } else {
        create_backend(openai_config(&args)?)?
    };

    Ok(backend)
}

/// Pick the OpenAI-compatible endpoint from the backend flags
fn openai_config(args: &BackendArgs) -> Result<OpenAIBackendConfig> {
    let model = args.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);

    if args.openrouter {
        let key = args.openrouter_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("OpenRouter API key required. Set OPENROUTER_API_KEY or use --openrouter-key")
        })?;
        return Ok(OpenAIBackendConfig::openrouter(key, model));
    }

    let config = match (args.base_url.as_deref(), args.api_key.as_deref()) {
        (Some(base_url), Some(key)) => OpenAIBackendConfig::compatible(base_url, key, model),
        // Local servers usually ignore the key
        (Some(base_url), None) => OpenAIBackendConfig::local(base_url, model),
        (None, Some(key)) => OpenAIBackendConfig::openai(key, model),
        (None, None) => anyhow::bail!("API key required. Set AGORA_API_KEY or use --api-key"),
    };

    Ok(config)
}

async fn run_chat(
    registry: AgentRegistry,
    backend_args: BackendArgs,
    max_history: Option<usize>,
    search_config: SearchConfig,
) -> Result<()> {
    let backend = build_backend(backend_args)?;
    println!("Agora | Model: {}", backend.model_name());

    let config = OrchestratorConfig {
        max_history_messages: max_history,
        ..Default::default()
    };
    let acquirer = Arc::new(SearchAcquirer::with_webdriver(
        BrowserConfig::default(),
        search_config,
    ));

    let (orchestrator, events) = ConversationOrchestrator::new(Arc::new(registry), backend, config);
    let orchestrator = orchestrator.with_search(acquirer);

    let names: HashMap<String, String> = orchestrator
        .list_agents()
        .into_iter()
        .map(|a| (a.id, a.display_name))
        .collect();
    let renderer = spawn_renderer(events, names);

    let mut selected: Vec<String> = orchestrator
        .list_agents()
        .into_iter()
        .map(|a| a.id)
        .collect();

    print_help();
    println!("Talking to: {}\n", selected.join(", "));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        let Some(command) = line.strip_prefix('/') else {
            if let Err(e) = orchestrator.send_user_message(line, selected.as_slice()) {
                println!("{}", e);
            }
            continue;
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((command, ""));

        match name {
            "quit" | "exit" => break,
            "help" => print_help(),
            "agents" => {
                for agent in orchestrator.list_agents() {
                    let mark = if selected.contains(&agent.id) { "*" } else { " " };
                    println!("{} {:<12} {}", mark, agent.id, agent.display_name);
                }
            }
            "select" => match parse_selection(rest, &orchestrator) {
                Ok(ids) => {
                    selected = ids;
                    println!("Talking to: {}", selected.join(", "));
                }
                Err(e) => println!("{}", e),
            },
            "search" => {
                if let Err(e) = orchestrator.perform_search(rest) {
                    println!("{}", e);
                }
            }
            "history" => match orchestrator.history(rest) {
                Some(history) => {
                    for message in history {
                        println!("[{}] {}", message.role, message.content);
                    }
                }
                None => println!("Unknown agent: {}", rest),
            },
            other => println!("Unknown command /{}. Type /help for commands.", other),
        }
    }

    // Dropping the orchestrator cancels in-flight replies and searches
    drop(orchestrator);
    if let Err(e) = renderer.await {
        warn!("Renderer stopped abnormally: {}", e);
    }

    println!("\nGoodbye.");
    Ok(())
}

/// Resolve a `/select` argument into agent ids, in registry order
fn parse_selection(arg: &str, orchestrator: &ConversationOrchestrator) -> Result<Vec<String>> {
    let agents = orchestrator.list_agents();

    if arg.eq_ignore_ascii_case("all") {
        return Ok(agents.into_iter().map(|a| a.id).collect());
    }

    let wanted: Vec<&str> = arg
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();

    if wanted.is_empty() {
        anyhow::bail!("Please select at least one agent");
    }
    if let Some(unknown) = wanted.iter().find(|id| orchestrator.registry().get(id).is_none()) {
        anyhow::bail!("Unknown agent: {}", unknown);
    }

    Ok(agents
        .into_iter()
        .map(|a| a.id)
        .filter(|id| wanted.contains(&id.as_str()))
        .collect())
}

fn print_help() {
    println!("Type a message to send it to the selected agents.");
    println!("  /agents              list agents (* = selected)");
    println!("  /select <ids|all>    choose who receives your messages");
    println!("  /search <query>      share web search results with every agent");
    println!("  /history <id>        show one agent's conversation");
    println!("  /help                show this help");
    println!("  /quit                leave");
}

/// Print events as they arrive, labelling output whenever the speaker changes
fn spawn_renderer(
    mut events: mpsc::UnboundedReceiver<ChatEvent>,
    names: HashMap<String, String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut speaker: Option<String> = None;
        let mut stdout = std::io::stdout();

        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Started { .. } => {}
                ChatEvent::Chunk { agent_id, text, .. } => {
                    if speaker.as_deref() != Some(agent_id.as_str()) {
                        let name = names.get(&agent_id).unwrap_or(&agent_id);
                        print!("\n\n{}: ", name);
                        speaker = Some(agent_id);
                    }
                    print!("{}", text);
                }
                ChatEvent::Completed { .. } => {}
                ChatEvent::Failed { agent_id, error, .. } => {
                    let name = names.get(&agent_id).unwrap_or(&agent_id);
                    print!("\n\n[{}] Error: {}", name, error);
                    speaker = None;
                }
                ChatEvent::SearchStarted { query } => {
                    print!("\n\nSearching: {} ...", query);
                    speaker = None;
                }
                ChatEvent::SearchCompleted {
                    query,
                    snippet_text,
                    agents_updated,
                } => {
                    print!(
                        "\n\nSearch results for '{}' shared with {} agents:\n{}",
                        query, agents_updated, snippet_text
                    );
                    speaker = None;
                }
                ChatEvent::SearchFailed { message } => {
                    print!("\n\n{}", message);
                    speaker = None;
                }
            }
            let _ = stdout.flush();
        }
        println!();
    })
}

async fn run_search(query: &str, search_config: SearchConfig) -> Result<()> {
    let acquirer = SearchAcquirer::with_webdriver(BrowserConfig::default(), search_config);

    println!("Searching {} for: {}\n", acquirer.engine().name, query);

    let hit = acquirer.acquire(query).await?;
    println!("{}", hit.snippet_text);

    Ok(())
}

async fn check_status(search_config: SearchConfig) {
    let acquirer = SearchAcquirer::with_webdriver(BrowserConfig::default(), search_config);

    println!("Checking browser runtime...\n");

    match acquirer.check_runtime().await {
        RuntimeState::Ready => {
            println!("Browser runtime is ready");
            println!("   Engine: {} ({})", acquirer.engine().name, acquirer.engine().home_url);
        }
        state => {
            println!("Browser runtime is not usable ({:?})", state);
            println!("\n   To install it, run:");
            println!("   {}", acquirer.remediation_command());
        }
    }
}
