//! codeagent CLI entry point

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use codeagent::agent::llm::OllamaClient;
use codeagent::agent::{
    build_system_prompt, AgentLoop, LlmClient, LoopOutcome, LoopState, ProviderClient, Session,
};
use codeagent::config::{self, Config, FileConfigProvider, ProviderConfig, ProviderKind};
use codeagent::tools::{AutoApprove, ToolRunner, Workspace};
use codeagent::ui::{self, ConsoleConfirm, ConsoleSink};

#[derive(Parser)]
#[command(name = "codeagent")]
#[command(about = "A coding agent for your terminal, backed by local or hosted models")]
#[command(version)]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (the default)
    Run(RunArgs),

    /// Choose provider, credentials and model interactively
    Setup,

    /// Show or change the stored configuration
    Config {
        /// Print the configuration
        #[arg(long)]
        show: bool,

        /// Switch provider (ollama, openrouter, huggingface)
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// Set the model
        #[arg(short, long)]
        model: Option<String>,

        /// Set the API key for the current provider; prompts when no value is given
        #[arg(long, num_args = 0..=1)]
        api_key: Option<Option<String>>,

        /// Restore defaults
        #[arg(long)]
        reset: bool,
    },

    /// List recommended (and for Ollama, installed) models
    Models {
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },

    /// Download a model into the local Ollama server
    Pull { model: String },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Run a single instruction and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// Working directory the agent is confined to
    #[arg(short = 'C', long)]
    workdir: Option<PathBuf>,

    #[arg(long)]
    provider: Option<ProviderKind>,

    #[arg(short, long)]
    model: Option<String>,

    /// Wait for whole replies instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// Run destructive tools without asking
    #[arg(short, long)]
    yes: bool,

    /// Save the conversation as JSON when the session ends
    #[arg(long)]
    transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "codeagent=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await,
        Commands::Setup => {
            config::setup()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            show,
            provider,
            model,
            api_key,
            reset,
        } => {
            config_cmd(show, provider, model, api_key, reset)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models { provider } => {
            models(provider).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Pull { model } => pull(&model).await,
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = Config::load()?;

    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    let workspace = Workspace::new(&workdir)
        .with_context(|| format!("cannot use {} as working directory", workdir.display()))?;

    let source = FileConfigProvider::default().with_overrides(args.provider, args.model.clone());
    let client = match ProviderClient::from_config_provider(&source) {
        Ok(client) => client,
        Err(codeagent::Error::Provider(err)) => {
            ui::print_error(&err.to_string());
            if let Some(hint) = err.hint() {
                ui::print_step(&hint);
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(err) => return Err(err.into()),
    };

    let mut tools = ToolRunner::new_with_defaults(&workspace, &config.tool_settings());
    if args.yes {
        tools = tools.with_confirmation(Box::new(AutoApprove));
    } else if config.confirm_destructive {
        tools = tools.with_confirmation(Box::new(ConsoleConfirm));
    }
    let system_prompt = build_system_prompt(workspace.root(), &tools.tool_names());
    let mut session = Session::new(system_prompt, config.max_iterations);
    install_interrupt_handler(&session);

    let agent = AgentLoop::new(client, tools).streaming(!args.no_stream);
    let mut sink = ConsoleSink::new();

    let code = match &args.prompt {
        Some(prompt) => {
            let outcome = agent.run(&mut session, prompt, &mut sink).await;
            if matches!(outcome, LoopOutcome::Completed { .. }) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            ui::print_header(agent.client().model(), agent.client().name(), workspace.root());
            println!("  Type {} for commands.\n", "help".cyan());
            repl(&agent, &mut session, &mut sink).await?;
            ExitCode::SUCCESS
        }
    };

    if let Some(path) = &args.transcript {
        std::fs::write(path, session.transcript_json()?)
            .with_context(|| format!("cannot write transcript to {}", path.display()))?;
        ui::print_step(&format!("Transcript saved to {}", path.display()));
    }
    Ok(code)
}

async fn repl(agent: &AgentLoop<ProviderClient>, session: &mut Session, sink: &mut ConsoleSink) -> Result<()> {
    let stdin = io::stdin();
    loop {
        print!("{} ", ">".blue().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" | "q" => break,
            "help" => {
                ui::print_help();
                continue;
            }
            "clear" => {
                session.clear();
                ui::print_success("Conversation cleared.");
                continue;
            }
            "continue" => {
                if agent.resume(session, sink).await.is_none() {
                    ui::print_step("Nothing to continue.");
                }
                continue;
            }
            _ => {}
        }

        let outcome = agent.run(session, input, sink).await;
        if outcome.state() != LoopState::Completed {
            ui::print_step(&format!("Type {} to pick up where it stopped.", "continue".cyan()));
        }
    }
    let usage = session.usage();
    if usage.total_tokens > 0 {
        ui::print_step(&format!(
            "Tokens used: {} ({} prompt, {} completion)",
            usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
        ));
    }
    println!("  Bye!");
    Ok(())
}

/// First Ctrl+C cancels the running turn; a second one within two seconds exits.
fn install_interrupt_handler(session: &Session) {
    let cancel = session.cancel_flag();
    let armed = Arc::new(AtomicBool::new(false));

    let result = ctrlc::set_handler(move || {
        if armed.swap(true, Ordering::SeqCst) {
            println!("\n  Bye!");
            std::process::exit(130);
        }
        cancel.cancel();
        eprintln!("\n  Stopping... (press Ctrl+C again to quit)");

        let armed = armed.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(2));
            armed.store(false, Ordering::SeqCst);
        });
    });
    if let Err(e) = result {
        tracing::warn!("could not install Ctrl+C handler: {e}");
    }
}

fn config_cmd(
    show: bool,
    provider: Option<ProviderKind>,
    model: Option<String>,
    api_key: Option<Option<String>>,
    reset: bool,
) -> Result<()> {
    if reset {
        config::reset()?;
        ui::print_success("Configuration reset to defaults.");
        return Ok(());
    }

    let path = config::config_path();
    let mut config = Config::load_from(&path)?;
    let changing = provider.is_some() || model.is_some() || api_key.is_some();

    if let Some(kind) = provider {
        config.set_provider(kind);
        ui::print_success(&format!("Provider: {kind} (model {})", config.effective_model()));
        if kind.requires_api_key() && config.api_key_for(kind).is_none() && api_key.is_none() {
            ui::print_warning(&format!("{kind} needs an API key: codeagent config --api-key"));
        }
    }
    if let Some(model) = model {
        ui::print_success(&format!("Model: {model}"));
        config.model = Some(model);
    }
    if let Some(key) = api_key {
        let kind = config.provider;
        if !kind.requires_api_key() {
            anyhow::bail!("{kind} does not use an API key");
        }
        let key = match key {
            Some(key) => key,
            None => inquire::Password::new(&format!("API key for {kind}:"))
                .with_display_mode(inquire::PasswordDisplayMode::Masked)
                .without_confirmation()
                .prompt()?,
        };
        config.set_api_key(kind, Some(key.trim().to_string()).filter(|k| !k.is_empty()));
        ui::print_success(&format!("API key for {kind} updated."));
    }

    if changing {
        config.save_to(&path)?;
    }
    if show || !changing {
        println!("  {}", path.display().to_string().black().bold());
        println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    }
    Ok(())
}

async fn models(provider: Option<ProviderKind>) -> Result<()> {
    let config = Config::load()?;
    let kind = provider.unwrap_or(config.provider);
    let current = config.effective_model();

    println!("  {} {}", "Recommended models for".bold(), kind.to_string().cyan());
    for model in kind.recommended_models() {
        let marker = if kind == config.provider && *model == current { "*" } else { " " };
        println!("  {marker} {model}");
    }

    if kind == ProviderKind::Ollama {
        let client = OllamaClient::new(ollama_config(&config))?;
        match client.list_models().await {
            Ok(local) if local.is_empty() => ui::print_step("No models installed. Try: codeagent pull <model>"),
            Ok(local) => {
                println!("\n  {}", "Installed".bold());
                for model in local {
                    println!("    {:<40} {:>8.1} GB", model.name, model.size as f64 / 1e9);
                }
            }
            Err(err) => {
                ui::print_warning(&format!("Could not list installed models: {err}"));
                if let Some(hint) = err.hint() {
                    ui::print_step(&hint);
                }
            }
        }
    }
    Ok(())
}

fn ollama_config(config: &Config) -> ProviderConfig {
    ProviderConfig {
        endpoint: config.ollama_host.clone(),
        ..ProviderConfig::for_kind(ProviderKind::Ollama)
    }
}

async fn pull(model: &str) -> Result<ExitCode> {
    let config = Config::load()?;
    let client = OllamaClient::new(ollama_config(&config))?;

    let bar = indicatif::ProgressBar::new(0);
    bar.set_style(
        indicatif::ProgressStyle::with_template("  {msg:30} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
    );
    let result = client
        .pull(model, |progress| {
            if let Some(total) = progress.total {
                bar.set_length(total);
            }
            if let Some(done) = progress.completed {
                bar.set_position(done);
            }
            bar.set_message(progress.status.clone());
        })
        .await;
    bar.finish_and_clear();

    match result {
        Ok(()) => {
            ui::print_success(&format!("Pulled {model}"));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            ui::print_error(&err.to_string());
            if let Some(hint) = err.hint() {
                ui::print_step(&hint);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
