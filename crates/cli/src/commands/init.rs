//! `kbchat init` — Write a default config file.

use kbchat_config::AppConfig;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_path(config_path);

    println!("kbchat — First-Time Setup");
    println!("=========================\n");

    if path.exists() && !force {
        println!("⚠️  Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force to overwrite.\n");
        return Ok(());
    }

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("✅ Created config directory: {}", dir.display());
    }

    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote config.toml to: {}", path.display());
    println!("\n📝 Next steps:");
    println!("   1. Pick a backend in the [backend] section");
    println!("   2. Run: kbchat doctor");
    println!("   3. Run: kbchat serve  (or kbchat chat)\n");

    Ok(())
}
