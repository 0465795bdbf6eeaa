use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use wayfinder_agents::{
    GeminiClient, GeminiConfig, NominatimClient, NominatimConfig, TripPlanner,
    DEFAULT_SESSION_TTL_SECONDS,
};
use wayfinder_core::{parse_itinerary, ConversationStep, MapView, Message, UserInput};
use wayfinder_observability::{init_tracing, AppMetrics};
use wayfinder_storage::MemoryStore;

type Planner = TripPlanner<GeminiClient, NominatimClient, MemoryStore>;

#[derive(Debug, Parser)]
#[command(name = "wayfinder")]
#[command(about = "Wayfinder trip planner CLI")]
struct Cli {
    /// Overrides WAYFINDER_GEMINI_MODEL.
    #[arg(long)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plan a trip interactively.
    Chat,
    /// Parse an itinerary text file and print its structure as JSON.
    Parse { file: PathBuf },
    Places {
        #[command(subcommand)]
        command: PlacesCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PlacesCommand {
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Center the map on the n-th result (1-based).
        #[arg(long)]
        focus: Option<usize>,
    },
    /// Type-ahead suggestions; every stdin line is a new input value.
    Suggest {
        #[arg(long, default_value_t = 15)]
        wait_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("wayfinder_cli");
    let cli = Cli::parse();

    match cli.command {
        Command::Parse { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed reading {}", file.display()))?;
            let itinerary = parse_itinerary(&raw);
            if let Some(mismatch) = itinerary.day_count_mismatch() {
                eprintln!(
                    "warning: header declares {} days but {} day sections were found",
                    mismatch.declared, mismatch.found
                );
            }
            println!("{}", serde_json::to_string_pretty(&itinerary)?);
        }
        Command::Chat => run_chat(build_planner(cli.model)?).await?,
        Command::Places { command } => {
            let planner = build_planner(cli.model)?;
            match command {
                PlacesCommand::Search {
                    query,
                    limit,
                    focus,
                } => {
                    let places = planner.search_places(&query, limit).await;
                    let mut map = MapView::with_places(&places);
                    if let Some(index) = focus {
                        let Some(place) = index.checked_sub(1).and_then(|index| places.get(index))
                        else {
                            bail!("--focus {index} is outside the {} results", places.len());
                        };
                        map.focus_on(place);
                    }
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({ "places": places, "map": map }))?
                    );
                }
                PlacesCommand::Suggest { wait_seconds } => {
                    run_suggest(&planner, Duration::from_secs(wait_seconds)).await?
                }
            }
        }
    }

    Ok(())
}

fn build_planner(model: Option<String>) -> Result<Planner> {
    let mut gemini = GeminiConfig::from_env();
    if let Some(model) = model {
        gemini.model = model;
    }

    Ok(TripPlanner::new(
        GeminiClient::new(gemini)?,
        Arc::new(NominatimClient::new(NominatimConfig::from_env())?),
        Arc::new(MemoryStore::new()),
        AppMetrics::shared(),
        chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
    ))
}

async fn run_chat(planner: Planner) -> Result<()> {
    if !planner.generation_service().is_configured() {
        eprintln!("note: WAYFINDER_GEMINI_API_KEY is not set, itinerary generation will fail");
    }

    let session = planner.start_session().await?;
    let session_id = session.session_id.clone();
    let mut last_reply = session
        .last_assistant_message()
        .cloned()
        .context("new session has no greeting")?;

    println!("Wayfinder chat mode. type 'exit' to quit.");
    print_reply(&last_reply);

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        let turn = planner
            .handle_turn(&session_id, chat_input(&last_reply, message))
            .await?;
        print_reply(&turn.reply);

        if turn.session.step == ConversationStep::Terminal {
            let export = planner.export_document(&session_id).await?;
            println!("---- {} ----\n{}\n", export.file_name, export.document);
        }
        last_reply = turn.reply;
    }

    Ok(())
}

/// A bare number picks the matching option, unless the options are numeric themselves.
fn chat_input(last_reply: &Message, typed: &str) -> UserInput {
    let numeric_options = last_reply
        .options
        .iter()
        .any(|option| option.value.parse::<u32>().is_ok());

    if !numeric_options {
        if let Some(option) = typed
            .parse::<usize>()
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| last_reply.options.get(index))
        {
            return UserInput::Option(option.value.clone());
        }
    }

    match last_reply.options.iter().find(|option| option.value == typed) {
        Some(option) => UserInput::Option(option.value.clone()),
        None => UserInput::Text(typed.to_string()),
    }
}

fn print_reply(reply: &Message) {
    println!("\n{}\n", reply.text);
    for (index, option) in reply.options.iter().enumerate() {
        println!("  {}. {}", index + 1, option.label);
    }
    if !reply.options.is_empty() {
        println!();
    }
}

async fn run_suggest(planner: &Planner, wait: Duration) -> Result<()> {
    let suggestions = planner.suggestion_search();
    let mut updates = suggestions.subscribe();
    let mut settled = suggestions.subscribe();

    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let current = updates.borrow_and_update().clone();
            if let Ok(line) = serde_json::to_string(&current) {
                println!("{line}");
            }
        }
    });

    let mut last = 0;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        last = suggestions.input(&line);
    }

    if last > 0
        && tokio::time::timeout(wait, settled.wait_for(|current| current.sequence >= last))
            .await
            .is_err()
    {
        eprintln!("gave up waiting for the last suggestion lookup");
    }

    drop(suggestions);
    printer.await.context("suggestion printer stopped unexpectedly")?;
    Ok(())
}
