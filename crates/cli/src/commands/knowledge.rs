//! `kbchat knowledge` — Knowledge base management.
//!
//! Works directly on the knowledge file. A running server only sees entries
//! added through its own API until it restarts.

use kbchat_core::knowledge::GENERAL_BUCKET;
use kbchat_knowledge::{JsonFileStore, KnowledgeManager};
use std::path::Path;
use std::sync::Arc;

async fn open(config_path: Option<&Path>) -> Result<KnowledgeManager, Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let store = Arc::new(JsonFileStore::new(&config.knowledge.path));
    Ok(KnowledgeManager::open(store).await?)
}

pub async fn add(
    config_path: Option<&Path>,
    content: &str,
    category: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    if content.trim().is_empty() {
        return Err("content must not be empty".into());
    }

    let knowledge = open(config_path).await?;
    let id = knowledge.add(content, category.filter(|c| !c.is_empty())).await?;
    println!("Added knowledge entry {id}");

    Ok(())
}

pub async fn list(
    config_path: Option<&Path>,
    category: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let knowledge = open(config_path).await?;

    if let Some(category) = category.filter(|c| !c.is_empty()) {
        let items = knowledge.get(Some(category)).await;
        print_category(category, &items);
        return Ok(());
    }

    let snapshot = knowledge.snapshot().await;
    if snapshot.is_empty() {
        println!("Knowledge base is empty. Add entries with `kbchat knowledge add`.");
        return Ok(());
    }
    if !snapshot.general.is_empty() {
        print_category(GENERAL_BUCKET, &snapshot.general);
    }
    for (name, items) in snapshot.categories.iter() {
        print_category(name, items);
    }

    Ok(())
}

fn print_category(name: &str, items: &[String]) {
    println!("[{name}] {} item(s)", items.len());
    for (i, item) in items.iter().enumerate() {
        println!("  {:>3}. {item}", i + 1);
    }
}
