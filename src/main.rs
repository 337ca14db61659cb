//! `lw`, the Loreweave command-line client.
//!
//! ```sh
//! lw init
//! lw add Aria --type Character --content "A wandering mage."
//! lw search "Who is the traveling sorcerer?"
//! lw ask "Where did Aria learn magic?"
//! lw import chapter-one.txt
//! ```

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{error::Error, fs};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use loreweave::commands::{Cli, Commands};
use loreweave::config::{self, LoreConfig};
use loreweave::display;
use loreweave::entries::{EntryUpdate, NewEntry};
use loreweave::generation::{OpenAiChat, Orchestrator};
use loreweave::session::VaultSession;
use loreweave::sweep::SweepReport;
use loreweave::template::{self, PromptTemplate};
use loreweave::{LoreError, config_dir};

static TRACING: OnceCell<()> = OnceCell::new();

/// How long a write command waits for its embedding before exiting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

fn config_path(cli: &Cli) -> Result<PathBuf, Box<dyn Error>> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(config_dir()?.join("config.yaml")),
    }
}

fn load(path: &Path) -> Result<LoreConfig, Box<dyn Error>> {
    if !path.exists() {
        return Err(LoreError::Configuration(format!(
            "no configuration at {}; run `lw init` first",
            path.display()
        ))
        .into());
    }
    let config = config::load_config(path)?;
    debug!("Config loaded: {:?}", config.db_url);
    Ok(config)
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let path = config_path(&cli)?;

    match cli.command {
        Commands::Init => init(&path),
        command => execute(command, &path).await,
    }
}

async fn execute(command: Commands, path: &Path) -> Result<(), Box<dyn Error>> {
    let config = load(path)?;
    let session = VaultSession::open(&config)?;
    let mut out = io::stdout();

    match command {
        // Needs no vault; dispatched by `run`.
        Commands::Init => {}
        Commands::Add {
            name,
            entry_type,
            content,
        } => {
            let entry = session.create_entry(&NewEntry::new(name, entry_type, content))?;
            display::print_entry(&mut out, &entry)?;
            drain(&session).await;
        }
        Commands::Update {
            id,
            name,
            entry_type,
            content,
        } => {
            let update = EntryUpdate {
                name,
                entry_type,
                content,
            };
            if update.is_empty() {
                return Err(LoreError::InvalidInput(
                    "nothing to update; pass --name, --type or --content".into(),
                )
                .into());
            }
            let entry = session.update_entry(id, &update).await?;
            display::print_entry(&mut out, &entry)?;
            drain(&session).await;
        }
        Commands::Delete { id } => {
            session.delete_entry(id).await?;
            writeln!(out, "Deleted entry {id}")?;
        }
        Commands::List => {
            display::print_entry_list(&mut out, &session.entries().list_entries()?)?;
        }
        Commands::Search { query, limit } => {
            let results = session.search(&query, limit).await?;
            display::print_search_results(&mut out, &results)?;
        }
        Commands::Context { query } => {
            let context = session.build_context(&query).await?;
            display::print_context(&mut out, &context)?;
        }
        Commands::Ask {
            question,
            template: template_name,
            show_context,
        } => {
            let name = template_name.unwrap_or_else(|| config.generation.template.clone());
            let template = match template::load_template(&name) {
                Ok(template) => template,
                Err(e) => {
                    warn!("Template {} unavailable ({}); using the default", name, e);
                    PromptTemplate::default()
                }
            };
            let orchestrator = Orchestrator::new(
                session.context_builder(),
                Arc::new(OpenAiChat::new(&config.generation)),
                template,
            );
            let answer = orchestrator.answer(&question).await?;
            display::print_answer(&mut out, &answer, show_context)?;
        }
        Commands::Import { source } => {
            let text = read_source(&source)?;
            let generator = OpenAiChat::new(&config.generation);
            let report = session.import_narrative(&generator, &text).await?;
            display::print_import_report(&mut out, &report)?;
            drain(&session).await;
        }
        Commands::Reindex => {
            let report = reindex(&session).await?;
            display::print_sweep_report(&mut out, &report)?;
        }
        Commands::Embedding { id } => {
            display::print_embedding(&mut out, &session.embedding(id)?)?;
        }
    }

    Ok(())
}

fn read_source(source: &str) -> Result<String, Box<dyn Error>> {
    if source == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    Ok(fs::read_to_string(source)?)
}

async fn drain(session: &VaultSession) {
    if !session.embeddings().is_configured() {
        return;
    }
    if !session.wait_for_idle(DRAIN_TIMEOUT).await {
        warn!("Embedding still pending; `lw reindex` will pick it up");
    }
    let stats = session.worker_stats();
    if stats.failed > 0 || stats.dropped > 0 {
        warn!(
            "Embedding not stored ({} failed, {} dropped); `lw reindex` will retry",
            stats.failed, stats.dropped
        );
    }
}

async fn reindex(session: &VaultSession) -> Result<SweepReport, Box<dyn Error>> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let mut tick = |report: &SweepReport| {
        bar.set_length(report.total as u64);
        bar.set_position(report.done() as u64);
        if report.failed > 0 {
            bar.set_message(format!("{} failed", report.failed));
        }
    };
    let report = session.reindex(Some(&mut tick)).await?;
    bar.finish_and_clear();
    Ok(report)
}

/// Write a default configuration and the question template, keeping any that
/// already exist.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let dir = config_dir()?;
    let templates = dir.join("templates");
    info!("Creating template directory: {}", templates.display());
    fs::create_dir_all(&templates)?;

    let mut config = LoreConfig::default();
    let template_path = templates.join(format!("{}.yaml", config.generation.template));
    if template_path.exists() {
        println!("Keeping {}", template_path.display());
    } else {
        let template = PromptTemplate {
            post_user_message_content: Some(
                "If the codex entries above do not answer the question, say so.".to_string(),
            ),
            ..PromptTemplate::default()
        };
        fs::write(&template_path, serde_yaml::to_string(&template)?)?;
        println!("Wrote {}", template_path.display());
    }

    if config_path.exists() {
        println!("Keeping {}", config_path.display());
    } else {
        config.db_url = dir.join("loreweave.db").to_string_lossy().into_owned();
        config::save_config(&config, config_path)?;
        println!("Wrote {}", config_path.display());
    }
    Ok(())
}
