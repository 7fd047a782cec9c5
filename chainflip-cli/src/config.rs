use chainflip_core::{Address, Chain, ClientConfig};
use std::path::{Path, PathBuf};

pub const RPC_URL_VAR: &str = "CHAINFLIP_RPC_URL";
pub const ACCOUNT_VAR: &str = "CHAINFLIP_ACCOUNT";

/// Values from the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub path: Option<PathBuf>,
    pub chain: Option<Chain>,
    pub rpc_url: Option<String>,
    pub contract: Option<Address>,
}

impl Overrides {
    pub fn config_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_config_path)
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chainflip")
        .join("config.json")
}

/// File, then environment, then flags.
pub async fn resolve(overrides: &Overrides) -> anyhow::Result<ClientConfig> {
    let path = overrides.config_path();
    let file = load_if_present(&path).await?;
    let env_rpc = std::env::var(RPC_URL_VAR).ok();
    Ok(merge(file, env_rpc, overrides))
}

async fn load_if_present(path: &Path) -> anyhow::Result<Option<ClientConfig>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let config = ClientConfig::load(path).await?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(Some(config))
}

fn merge(file: Option<ClientConfig>, env_rpc: Option<String>, overrides: &Overrides) -> ClientConfig {
    let mut config = match (file, overrides.chain) {
        // switching chains starts from that chain's presets
        (Some(config), Some(chain)) if config.chain != chain => ClientConfig::new(chain),
        (Some(config), _) => config,
        (None, chain) => ClientConfig::new(chain.unwrap_or(Chain::PolygonAmoy)),
    };

    if let Some(rpc_url) = env_rpc.filter(|u| !u.is_empty()) {
        config.rpc_url = rpc_url;
    }
    if let Some(rpc_url) = &overrides.rpc_url {
        config.rpc_url = rpc_url.clone();
    }
    if let Some(contract) = overrides.contract {
        config.contract_address = Some(contract);
    }
    config
}

pub fn account(flag: Option<Address>) -> anyhow::Result<Option<Address>> {
    if flag.is_some() {
        return Ok(flag);
    }
    match std::env::var(ACCOUNT_VAR) {
        Ok(value) if !value.is_empty() => Ok(Some(value.parse()?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_flags_win_over_file_and_env() {
        let mut file = ClientConfig::new(Chain::Sepolia);
        file.rpc_url = "http://file".to_string();

        let overrides = Overrides {
            rpc_url: Some("http://flag".to_string()),
            ..Default::default()
        };
        let merged = merge(Some(file.clone()), Some("http://env".to_string()), &overrides);
        assert_eq!(merged.rpc_url, "http://flag");
        assert_eq!(merged.chain, Chain::Sepolia);

        let merged = merge(Some(file), Some("http://env".to_string()), &Overrides::default());
        assert_eq!(merged.rpc_url, "http://env");
    }

    #[test]
    fn test_switching_chain_uses_presets() {
        let file = ClientConfig::new(Chain::Sepolia);
        let overrides = Overrides {
            chain: Some(Chain::Anvil),
            ..Default::default()
        };
        let merged = merge(Some(file), None, &overrides);
        assert_eq!(merged.chain, Chain::Anvil);
        assert_eq!(merged.rpc_url, Chain::Anvil.default_rpc_url());
    }

    #[tokio::test]
    async fn test_resolve_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut saved = ClientConfig::new(Chain::BnbTestnet);
        saved.page_size = 20;
        saved.save(&path).await.unwrap();

        let file = load_if_present(&path).await.unwrap().unwrap();
        assert_eq!(file.chain, Chain::BnbTestnet);
        assert_eq!(file.page_size, 20);

        assert!(load_if_present(&dir.path().join("missing.json"))
            .await
            .unwrap()
            .is_none());
    }
}
