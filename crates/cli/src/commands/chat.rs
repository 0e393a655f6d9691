//! `kbchat chat` — Interactive chat in the terminal.
//!
//! Runs a single [`ConversationSession`] against the configured backend.
//! Lines starting with `/` are commands: `/clear`, `/category <name>`,
//! `/exit`.

use kbchat_knowledge::{JsonFileStore, KnowledgeManager};
use kbchat_providers::BackendRouter;
use kbchat_session::{ConversationSession, SessionConfig};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// What a line of terminal input asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Message(&'a str),
    Clear,
    Category(Option<&'a str>),
    Exit,
    Empty,
    Unknown(&'a str),
}

pub fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line == "exit" || line == "quit" {
        return Input::Exit;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "clear" => Input::Clear,
        "category" => Input::Category(Some(arg).filter(|a| !a.is_empty())),
        "exit" | "quit" => Input::Exit,
        _ => Input::Unknown(name),
    }
}

pub async fn run(
    config_path: Option<&Path>,
    category: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    let store = Arc::new(JsonFileStore::new(&config.knowledge.path));
    let knowledge = Arc::new(KnowledgeManager::open(store).await?);
    let router = Arc::new(BackendRouter::build(&config)?);
    let session_config = SessionConfig::from_chat(&config.chat);
    let mut session = ConversationSession::new(session_config, knowledge, router.clone()).await;

    println!();
    println!("  kbchat — Interactive Mode");
    println!();
    println!("  Backend:   {}", router.kind());
    println!("  Model:     {}", router.name());

    eprint!("  Loading model...");
    let probe = session.initialize().await;
    eprint!("\r                  \r");
    if probe.ready {
        println!("  Status:    {}", probe.message);
    } else {
        println!("  Status:    not ready: {}", probe.message);
    }

    if category.is_some() {
        session.set_system_prompt(category.as_deref()).await;
    }
    println!(
        "  Category:  {}",
        session.active_category().unwrap_or("(all knowledge)")
    );
    println!();
    println!("  Type your message and press Enter.");
    println!("  Commands: /clear, /category <name>, /exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Empty => {}
            Input::Exit => break,
            Input::Clear => {
                session.clear().await;
                println!("  Chat history cleared");
            }
            Input::Category(name) => {
                session.set_system_prompt(name).await;
                println!(
                    "  Category: {}",
                    session.active_category().unwrap_or("(all knowledge)")
                );
            }
            Input::Unknown(name) => eprintln!("  Unknown command: /{name}"),
            Input::Message(text) => {
                eprint!("  ...");
                let reply = session.turn(text, None).await;
                eprint!("\r     \r");
                println!();
                for line in reply.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
        }
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
