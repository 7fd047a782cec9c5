use crate::config::{self, Overrides};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Write the resolved configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn handle_config_command(cmd: ConfigCommands, overrides: &Overrides) -> anyhow::Result<()> {
    let path = overrides.config_path();
    let resolved = config::resolve(overrides).await?;

    match cmd {
        ConfigCommands::Show => {
            println!("Config file: {}", path.display());
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            match resolved.contract_address() {
                Ok(address) => println!("Contract: {}", address),
                Err(e) => println!("Contract: not set ({})", e),
            }
        }

        ConfigCommands::Init { force } => {
            if tokio::fs::try_exists(&path).await? && !force {
                anyhow::bail!(
                    "{} already exists. Use --force to overwrite it.",
                    path.display()
                );
            }
            resolved.validate()?;
            resolved.save(&path).await?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
