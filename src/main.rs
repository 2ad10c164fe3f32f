// Defensive programming lints - prevent panics and unsafe patterns
#![deny(clippy::indexing_slicing)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::fallible_impl_from)]
#![warn(clippy::wildcard_enum_match_arm)]
#![warn(clippy::fn_params_excessive_bools)]
// Idiomatic Rust lints
#![warn(clippy::needless_return)]
#![warn(clippy::let_and_return)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::redundant_closure_for_method_calls)]
#![warn(clippy::map_unwrap_or)]
#![warn(clippy::explicit_iter_loop)]

mod agents;
mod app;
mod clock;
mod config;
mod error;
mod logging;
mod services;
mod storage;
#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use app::chat::response::SessionEvent;
use app::history::{render_listing, render_transcript};
use app::{ChatEngine, TurnRequest};
use services::scent::render_report;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init();

    let config = config::Config::load()?;
    let args: Vec<String> = std::env::args().collect();
    let program_name = args.first().map_or("nez", String::as_str);
    let command = args.get(1).map_or("chat", String::as_str);

    match command {
        "--help" | "-h" | "help" => {
            print_help(program_name);
            return Ok(());
        }
        "--version" | "-v" => {
            println!("nez v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let argument = args
        .get(2..)
        .map(|rest| rest.join(" "))
        .filter(|joined| !joined.trim().is_empty());
    runtime.block_on(run_command(config, command, argument.as_deref()))
}

async fn run_command(config: config::Config, command: &str, argument: Option<&str>) -> Result<()> {
    let store = Arc::new(storage::SurrealConversationStore::open(config.database_path()?).await?);
    let generator = agents::build_generator(&config)?;
    let search = agents::build_search_provider(&config)?;
    let (engine, _timers) =
        ChatEngine::new(config, store, generator, search, Arc::new(clock::SystemClock));
    let locale = engine.config().locale;

    match command {
        "chat" => run_chat(&engine, argument.map(str::to_string)).await?,
        "list" => println!("{}", render_listing(&engine.list_conversations().await?, locale)),
        "show" => {
            let conversation = engine.open_conversation(required(argument, "show")?).await?;
            println!(
                "{}",
                render_transcript(&conversation, locale, &engine.config().persona.name)
            );
        }
        "memo" => {
            let id = required(argument, "memo")?;
            let outcome = engine.write_memo_now(id).await?;
            tracing::info!(conversation_id = id, ?outcome, "memo pass finished");
            println!("{}", engine.open_conversation(id).await?.memo.render());
        }
        "scent" => {
            let name = required(argument, "scent")?;
            let report = engine.analyze_scent(name).await?;
            println!("{}", render_report(&report, locale));
        }
        "import" => {
            let dir = required(argument, "import")?;
            let report = engine.import_legacy(Path::new(dir)).await?;
            println!("Imported {}, skipped {}", report.imported, report.skipped);
        }
        unknown => {
            eprintln!("Unknown command: {}", unknown);
            eprintln!("Run with --help for available commands.");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn required<'a>(argument: Option<&'a str>, command: &str) -> Result<&'a str> {
    argument.ok_or_else(|| eyre!("`{}` is missing its argument, see --help", command))
}

/// Reads one turn per stdin line and streams each reply to stdout.
async fn run_chat(engine: &ChatEngine, mut conversation_id: Option<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" || text == "/exit" {
            break;
        }

        let (id, mut events) = engine
            .submit_turn(TurnRequest {
                conversation_id: conversation_id.clone(),
                text: text.to_string(),
                display_name: None,
            })
            .await;
        conversation_id = Some(id);

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Fragment(fragment) => {
                    stdout.write_all(fragment.as_bytes()).await?;
                    stdout.flush().await?;
                }
                SessionEvent::Completed { .. } => stdout.write_all(b"\n").await?,
                SessionEvent::Failed(error) => {
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                    eprintln!("Error: {}", error);
                }
            }
        }
    }

    // Pending inactivity timers die with the process, so close the journal now
    if let Some(id) = conversation_id {
        match engine.write_memo_now(&id).await {
            Ok(outcome) => tracing::info!(conversation_id = %id, ?outcome, "journal closed"),
            Err(error) => tracing::warn!(conversation_id = %id, %error, "could not close journal"),
        }
        println!("{}", id);
    }
    Ok(())
}

fn print_help(program_name: &str) {
    println!("nez - persona chat with grounded answers and a journal");
    println!();
    println!("Usage: {} [command]", program_name);
    println!();
    println!("Commands:");
    println!("  chat [id]    - Chat on stdin, continuing conversation <id> if given");
    println!("  list         - List saved conversations");
    println!("  show <id>    - Print a conversation and its journal");
    println!("  memo <id>    - Write the journal for unsummarized turns now");
    println!("  scent <name> - Look up a perfume's notes and profile on the web");
    println!("  import <dir> - Import legacy JSON conversations from <dir>");
    println!("  --help       - Show this help");
    println!("  --version    - Show version");
    println!();
    println!("Run without arguments to start chatting.");
}
