//! skillforge CLI
//!
//! A command-line interface for the skillforge agent with REPL support.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use skillforge::agent::{SessionManager, SqliteStore};
use skillforge::telemetry::default_data_dir;
use skillforge::{
    Config, HttpClientFactory, Logging, ModelRouter, TurnEvent, TurnMachine, TurnOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "skillforge")]
#[command(about = "skillforge - an agent that learns new skills at runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Model configuration file (default: ./config/models.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skills directory (overrides the config file)
    #[arg(long)]
    skills_dir: Option<PathBuf>,

    /// Model id to make active for this session
    #[arg(short, long)]
    model: Option<String>,

    /// Session id to resume (default: a new session)
    #[arg(short, long)]
    session: Option<String>,

    /// Data directory (default: ~/.skillforge or $XDG_DATA_HOME/skillforge)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// OpenTelemetry collector endpoint (e.g., http://localhost:4318)
    #[arg(long)]
    otel_endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive REPL session
    Repl,

    /// Run a single prompt
    Prompt {
        /// The prompt to send to the agent
        message: String,
    },
}

struct App {
    machine: TurnMachine,
    sessions: SessionManager,
    session_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let _logging = Logging::init(&data_dir.join("logs"), cli.verbose, cli.otel_endpoint.as_deref())?;

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    config.check_startup_model(cli.model.as_deref())?;
    if let Some(dir) = &cli.skills_dir {
        config.agent.skills_dir = dir.clone();
    }

    let router = ModelRouter::new(config.profiles(), Arc::new(HttpClientFactory))?;
    let machine = TurnMachine::from_settings(Arc::new(router), &config.agent)?;
    let store = SqliteStore::open(&data_dir.join("sessions.db"))?;
    let sessions = SessionManager::new(Arc::new(store));

    let app = App {
        machine,
        sessions,
        session_id: cli.session.clone().unwrap_or_else(SessionManager::new_session_id),
    };

    if let Some(model) = &cli.model {
        app.use_model(model).await?;
    }

    match cli.command {
        Some(Commands::Prompt { message }) => run_single_prompt(&app, &message).await?,
        Some(Commands::Repl) | None => run_repl(&app, &data_dir).await?,
    }

    Ok(())
}

impl App {
    async fn use_model(&self, model_id: &str) -> Result<String> {
        let shared = self.sessions.session(&self.session_id)?;
        let mut state = shared.lock().await;
        let id = self.machine.switch_model(&mut state, model_id)?;
        self.sessions.save(&state)?;
        Ok(id)
    }

    /// Run one request, streaming events to the terminal as they arrive
    async fn ask(&self, input: &str) -> Result<TurnOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(rx));

        let outcome = self
            .sessions
            .handle(&self.machine, &self.session_id, input, Some(&tx))
            .await;

        drop(tx);
        let _ = printer.await;
        Ok(outcome?)
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<TurnEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::AgentTurnStart { model } => eprintln!("[{}] thinking...", model),
            TurnEvent::CapabilityStart { action } => eprintln!("  -> {}", action),
            TurnEvent::CapabilityEnd {
                action,
                is_error,
                duration_ms,
            } => {
                let status = if is_error { "failed" } else { "ok" };
                eprintln!("  <- {} ({}, {}ms)", action, status, duration_ms);
            }
            TurnEvent::RegistryReloaded { packages } => {
                let names: Vec<String> = packages.into_iter().collect();
                eprintln!("  [skills reloaded: {}]", names.join(", "));
            }
            TurnEvent::AssistantMessage { .. } | TurnEvent::Done => {}
        }
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Answer { text, .. } => println!("\n{}\n", text),
        TurnOutcome::IterationLimitExceeded { iterations } => {
            eprintln!("\nStopped after {} agent turns without a final answer.\n", iterations)
        }
    }
}

async fn run_single_prompt(app: &App, message: &str) -> Result<()> {
    let outcome = app.ask(message).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  /models       - List configured models");
    println!("  /use <id>     - Switch the active model");
    println!("  /skills       - List discovered skill packages");
    println!("  /reload       - Rescan the skills directory");
    println!("  /sessions     - List saved sessions");
    println!("  /quit, /exit  - Exit the REPL");
    println!("  /help         - Show this help");
}

async fn run_repl(app: &App, data_dir: &std::path::Path) -> Result<()> {
    println!("skillforge REPL");
    println!("Session: {} (resume with --session {})", app.session_id, app.session_id);
    println!("Skills: {}", app.machine.registry().root().display());
    println!();
    print_help();
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_path = data_dir.join("history.txt");
    let _ = rl.load_history(&history_path);

    loop {
        let readline = rl.readline("skillforge> ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if line.starts_with('/') {
                    let mut parts = line.splitn(2, ' ');
                    let cmd = parts.next().unwrap_or_default();
                    let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

                    match cmd {
                        "/quit" | "/exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        "/models" => print!("{}", app.machine.router().menu()),
                        "/use" => match arg {
                            Some(id) => match app.use_model(id).await {
                                Ok(id) => println!("Active model: {}", id),
                                Err(e) => eprintln!("Error: {}", e),
                            },
                            None => println!("Usage: /use <id>"),
                        },
                        "/skills" => {
                            let packages = app.machine.registry().packages();
                            if packages.is_empty() {
                                println!("No skill packages found.");
                            }
                            for p in packages {
                                let mut notes = Vec::new();
                                if p.has_doc {
                                    notes.push("doc".to_string());
                                }
                                if p.has_logic {
                                    notes.push("logic".to_string());
                                }
                                if let Some(model) = &p.preferred_model_id {
                                    notes.push(format!("prefers {}", model));
                                }
                                println!("  {:20} {}", p.name, notes.join(", "));
                            }
                        }
                        "/reload" => {
                            let documented = app.machine.registry().scan();
                            println!(
                                "Rescanned: {} packages, {} documented",
                                app.machine.registry().packages().len(),
                                documented.len()
                            );
                        }
                        "/sessions" => match app.sessions.known_sessions() {
                            Ok(ids) => {
                                for id in ids {
                                    let marker = if id == app.session_id { " *" } else { "" };
                                    println!("  {}{}", id, marker);
                                }
                            }
                            Err(e) => eprintln!("Error: {}", e),
                        },
                        "/help" => print_help(),
                        _ => println!("Unknown command: {}", cmd),
                    }
                    continue;
                }

                // Ctrl-C abandons the request; the conversation keeps every completed step
                tokio::select! {
                    result = app.ask(line) => match result {
                        Ok(outcome) => print_outcome(&outcome),
                        Err(e) => eprintln!("Error: {}\n", e),
                    },
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n^C (request cancelled)\n");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}
