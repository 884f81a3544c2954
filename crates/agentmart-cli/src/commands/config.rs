//! Print the effective configuration

use agentmart_engine::EngineConfig;

pub fn print_config(config: &EngineConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
