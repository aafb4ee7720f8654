//! `cronbot init`: write the default config and create directories.

use std::path::Path;

use cronbot_config::AppConfig;

pub async fn run(explicit: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::config_path(explicit);

    println!("🤖 CronBot: First-Time Setup");
    println!("============================\n");

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        tokio::fs::create_dir_all(dir).await?;
        println!("✅ Created config directory: {}", dir.display());
    }

    if config_path.exists() && !force {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.\n");
    } else {
        tokio::fs::write(&config_path, AppConfig::default_toml()).await?;
        println!("✅ Created config at: {}", config_path.display());
    }

    let config = AppConfig::load_from(&config_path)?;
    for dir in [&config.worker.state_path, &config.worker.workspace_path] {
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await?;
            println!("✅ Created {}", dir.display());
        }
    }

    println!("\n📝 Next steps:");
    println!("   1. Set AGENT_ID, PROJECT_ID and ANTHROPIC_API_KEY (or edit the config)");
    println!("   2. Point KANBAN_URL at your board");
    println!("   3. Run: cronbot daemon\n");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_a_loadable_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        // Keep state and workspace inside the temp dir
        let mut seeded = AppConfig::default();
        seeded.worker.state_path = dir.path().join("state");
        seeded.worker.workspace_path = dir.path().join("workspace");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, toml::to_string_pretty(&seeded).unwrap()).unwrap();

        run(Some(&path), false).await.unwrap();
        let kept = std::fs::read_to_string(&path).unwrap();
        assert!(kept.contains(&dir.path().join("state").display().to_string()));
        assert!(dir.path().join("state").is_dir());
        assert!(dir.path().join("workspace").is_dir());
    }
}
