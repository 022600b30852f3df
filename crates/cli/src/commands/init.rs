//! `agrag init`: Write a default configuration file.

use std::path::Path;

use agrag_config::AppConfig;

pub fn run(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);

    if path.exists() && !force {
        println!("Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force.");
        return Ok(());
    }

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, AppConfig::default_toml()?)?;

    println!("Created config at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("   1. Set OPENAI_API_KEY (and PINECONE_API_KEY / TAVILY_API_KEY for search)");
    println!("      in the environment or a .env file");
    println!("   2. Run: agrag agents");
    println!("   3. Run: agrag serve");

    Ok(())
}
