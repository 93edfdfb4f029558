//! CLI module
//!
//! This module provides the command-line interface for taskchat: it starts the
//! server, and talks to a running server for everything else.

use std::io;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;

use crate::{
    api::{serve, Client, ClientConfig, ServerConfig},
    bridge::ConversationBridge,
    llm::{LlmConfig, DEFAULT_BASE_URL, DEFAULT_MODEL},
    models::{format_index, parse_index, walk, Index, Priority, TaskNode},
    session::{SessionId, SessionView, StatusLevel, StatusNote, SubmitOutcome},
    Core,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API server URL
    #[arg(short, long, env = "TASKCHAT_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Session to operate on (defaults to the only session, if there is one)
    #[arg(long, env = "TASKCHAT_SESSION", global = true)]
    session: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the taskchat server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Start with a session holding an example list
        #[arg(long)]
        example: bool,

        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Model to chat with
        #[arg(long, env = "TASKCHAT_MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        /// Sampling temperature
        #[arg(long, env = "TASKCHAT_TEMPERATURE", default_value_t = 0.8)]
        temperature: f32,

        /// Seconds to wait for the provider before giving up
        #[arg(long, env = "TASKCHAT_TIMEOUT_SECS", default_value_t = 60)]
        timeout_secs: u64,

        /// Provider base URL
        #[arg(long, env = "TASKCHAT_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },

    /// Start a new, empty list
    New,

    /// List all sessions
    Sessions,

    /// Show the list, the assistant's last answer and the progress
    Show,

    /// Ask the assistant to create or change the list, or ask a question about it
    Ask {
        /// What you want, in plain words
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Mark a task as completed
    Check {
        /// Task path (e.g., 0 or 0,1,2 for nested tasks)
        path: String,
    },

    /// Mark a task as not completed
    Uncheck {
        /// Task path (e.g., 0 or 0,1,2 for nested tasks)
        path: String,
    },

    /// Add a subtask under a task
    Add {
        /// Path of the parent task
        path: String,

        /// Subtask description
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Remove a task and all of its subtasks
    Rm {
        /// Task path
        path: String,
    },

    /// Clear the list and the conversation
    Reset,

    /// Delete the session
    Delete,

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            port,
            example,
            api_key,
            model,
            temperature,
            timeout_secs,
            base_url,
        } => {
            let llm_config = LlmConfig {
                api_key: api_key.clone(),
                model: model.clone(),
                base_url: base_url.clone(),
                temperature: *temperature,
                timeout: Duration::from_secs(*timeout_secs),
            };
            let bridge = ConversationBridge::from_config(&llm_config)?;
            let core = Core::new(bridge);

            if *example {
                let id = core.create_session();
                core.replace_forest(id, example_forest())?;
                println!("Example list loaded into session {}", id.to_string().bold());
            }

            println!(
                "Starting taskchat on port {} (model {})...",
                port,
                llm_config.model.cyan()
            );
            println!("Open {}", format!("http://localhost:{}/ui", port).underline());

            let config = ServerConfig {
                address: ([127, 0, 0, 1], *port).into(),
            };
            serve(core, config).await?;
            Ok(())
        }

        Commands::New => {
            let client = create_client(&cli.server);
            let view = client.create_session().await?;
            println!("Created session {}", view.id.to_string().bold());
            println!(
                "{}",
                format!("Use it with: export TASKCHAT_SESSION={}", view.id).dimmed()
            );
            Ok(())
        }

        Commands::Sessions => {
            let client = create_client(&cli.server);
            let sessions = client.list_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions yet. Start one with 'taskchat new'");
            }
            for summary in sessions {
                let title = summary.title.as_deref().unwrap_or("(empty)");
                let busy = if summary.busy { " [thinking]".yellow().to_string() } else { String::new() };
                println!(
                    "{:>10}  {}  {}{}",
                    summary.id.to_string().bold(),
                    title,
                    summary.progress.to_string().dimmed(),
                    busy
                );
            }
            Ok(())
        }

        Commands::Show => {
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            print_view(&client.get_session(id).await?);
            Ok(())
        }

        Commands::Ask { text } => {
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            println!("{}", "AI is thinking...".dimmed());
            let response = client.submit(id, text.join(" ")).await?;
            match response.outcome {
                SubmitOutcome::Replaced { .. } => print_view(&response.session),
                SubmitOutcome::Answered { message } => {
                    println!("{}", "AI Assistant:".bright_cyan().bold());
                    println!("{}", message);
                }
            }
            Ok(())
        }

        Commands::Check { path } | Commands::Uncheck { path } => {
            let completed = matches!(cli.command, Commands::Check { .. });
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            let view = client
                .set_completed(id, parse_path(path)?, completed)
                .await?;
            print_view(&view);
            Ok(())
        }

        Commands::Add { path, text } => {
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            let view = client
                .add_subtask(id, parse_path(path)?, text.join(" "))
                .await?;
            print_view(&view);
            Ok(())
        }

        Commands::Rm { path } => {
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            let view = client.delete_task(id, &parse_path(path)?).await?;
            print_view(&view);
            Ok(())
        }

        Commands::Reset => {
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            client.reset(id).await?;
            println!("Session {} cleared", id);
            Ok(())
        }

        Commands::Delete => {
            let client = create_client(&cli.server);
            let id = resolve_session(&client, cli.session).await?;
            client.delete_session(id).await?;
            println!("Session {} deleted", id);
            Ok(())
        }

        Commands::Completions { shell } => {
            // Generate completions for the specified shell
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn create_client(server_url: &str) -> Client {
    let config = ClientConfig {
        base_url: server_url.to_string(),
    };

    Client::with_config(config)
}

fn parse_path(path: &str) -> Result<Index, String> {
    parse_index(path).map_err(|e| format!("Invalid task path '{}': {}", path, e))
}

/// Uses the requested session, or the only one the server has
async fn resolve_session(
    client: &Client,
    requested: Option<u32>,
) -> Result<SessionId, Box<dyn std::error::Error>> {
    if let Some(id) = requested {
        return Ok(SessionId::new(id));
    }

    let sessions = client.list_sessions().await?;
    match sessions.as_slice() {
        [only] => Ok(only.id),
        [] => Err("No sessions yet. Start one with 'taskchat new'".into()),
        _ => Err("Several sessions exist; pick one with --session or TASKCHAT_SESSION".into()),
    }
}

fn print_view(view: &SessionView) {
    println!("{}", format!("Session {}", view.id).bright_cyan().bold());

    if view.forest.is_empty() {
        println!("  No tasks yet. Describe your plans with 'taskchat ask'");
    } else {
        print_tree(&view.forest);
        println!("\n{}", view.progress);
    }

    if let Some(message) = &view.message {
        println!("\n{}", "AI Assistant:".bright_cyan().bold());
        println!("{}", message);
    }

    if let Some(status) = &view.status {
        println!("\n{}", status_line(status));
    }
}

fn status_line(status: &StatusNote) -> String {
    match status.level {
        StatusLevel::Success => status.text.green().to_string(),
        StatusLevel::Warning => status.text.yellow().to_string(),
        StatusLevel::Error => status.text.red().to_string(),
    }
}

fn print_tree(forest: &[TaskNode]) {
    for (index, task) in walk(forest) {
        println!("{}", tree_line(&index, task));
    }
}

fn tree_line(index: &[usize], task: &TaskNode) -> String {
    let indent = "  ".repeat(index.len().saturating_sub(1));
    let marker = if task.is_completed() {
        "[✓]".green().to_string()
    } else {
        "[ ]".to_string()
    };
    let priority = match task.priority() {
        Priority::High => task.priority().as_str().red().to_string(),
        Priority::Medium => task.priority().as_str().yellow().to_string(),
        Priority::Low => task.priority().as_str().dimmed().to_string(),
    };
    let description = if task.is_completed() {
        task.description().strikethrough().to_string()
    } else {
        task.description().to_string()
    };

    format!(
        "{}{} {} {} ({})",
        indent,
        marker,
        format_index(index).dimmed(),
        description,
        priority
    )
}

/// Example list for trying out the UI
fn example_forest() -> Vec<TaskNode> {
    vec![
        TaskNode::new("Prepare the project launch")
            .with_priority(Priority::High)
            .with_subtasks(vec![
                TaskNode::new("Create the presentation")
                    .with_priority(Priority::High)
                    .with_subtasks(vec![
                        TaskNode::new("Outline the slides").with_completed(true),
                        TaskNode::new("Design the charts"),
                    ]),
                TaskNode::new("Finish the report").with_subtasks(vec![
                    TaskNode::new("Collect the metrics").with_completed(true),
                    TaskNode::new("Write the summary"),
                ]),
            ]),
        TaskNode::new("Book a venue for the launch party").with_priority(Priority::Low),
        TaskNode::new("Send the invitations"),
    ]
}
