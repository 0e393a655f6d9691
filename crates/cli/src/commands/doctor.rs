//! `kbchat doctor` — Diagnose configuration and backend health.

use kbchat_config::AppConfig;
use kbchat_knowledge::{JsonFileStore, KnowledgeManager};
use kbchat_providers::BackendRouter;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("kbchat doctor — System Diagnostics");
    println!("==================================\n");

    let mut issues = 0;

    let path = super::config_path(config_path);
    if path.exists() {
        println!("  ✅ Config file found: {}", path.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults (run `kbchat init`)", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  1 issue found. Fix the config file and re-run.");
            return Ok(());
        }
    };

    println!(
        "  ℹ️  Environment: {}",
        if config.production { "production" } else { "local" }
    );

    issues += check_knowledge(&config).await;
    issues += check_backend(&config).await;

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

async fn check_knowledge(config: &AppConfig) -> usize {
    let store = Arc::new(JsonFileStore::new(&config.knowledge.path));
    match KnowledgeManager::open(store).await {
        Ok(knowledge) => {
            let snapshot = knowledge.snapshot().await;
            println!(
                "  ✅ Knowledge base: {} entries in {} categories ({})",
                snapshot.len(),
                snapshot.categories.names().count(),
                config.knowledge.path.display()
            );
            0
        }
        Err(e) => {
            println!("  ❌ Knowledge base unreadable: {e}");
            1
        }
    }
}

async fn check_backend(config: &AppConfig) -> usize {
    let router = match BackendRouter::build(config) {
        Ok(router) => router,
        Err(e) => {
            println!("  ❌ Backend {}: {e}", config.backend.kind());
            return 1;
        }
    };

    println!("  ✅ Backend configured: {} ({})", router.kind(), router.name());
    let probe = router.probe().await;
    if probe.ready {
        println!("  ✅ Backend reachable: {}", probe.message);
        0
    } else {
        println!("  ❌ Backend not ready: {}", probe.message);
        1
    }
}
