use std::path::Path;

use vcd_engine::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env();

    println!(
        "vcd-selfcheck: starting with data_dir={} tools_dir={}",
        config.data_dir.display(),
        config.tools_dir.display()
    );
    ensure_dir(&config.data_dir).await?;
    ensure_dir(&config.databases_dir).await?;

    config
        .toolbox()
        .check_tools()
        .await
        .map_err(|e| anyhow::anyhow!("tool check failed: {}", e))?;

    println!("vcd-selfcheck: ok");
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))
}
