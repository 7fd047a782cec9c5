use crate::error::{ChainFlipError, Result};
use crate::types::{Address, Wei};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Networks the contract is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Chain {
    PolygonAmoy,
    Sepolia,
    BnbTestnet,
    Anvil,
}

impl Chain {
    pub fn id(&self) -> u64 {
        match self {
            Self::PolygonAmoy => 80002,
            Self::Sepolia => 11155111,
            Self::BnbTestnet => 97,
            Self::Anvil => 31337,
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        [Self::PolygonAmoy, Self::Sepolia, Self::BnbTestnet, Self::Anvil]
            .into_iter()
            .find(|c| c.id() == id)
    }

    pub fn native_currency(&self) -> &'static str {
        match self {
            Self::PolygonAmoy => "POL",
            Self::Sepolia | Self::Anvil => "ETH",
            Self::BnbTestnet => "tBNB",
        }
    }

    /// Suggested wager before the contract's own minimum has been read.
    pub fn default_min_bet(&self) -> Wei {
        match self {
            Self::Sepolia => Wei::from_wei(1_000_000_000_000_000), // 0.001
            Self::BnbTestnet => Wei::from_wei(5_000_000_000_000_000), // 0.005
            Self::PolygonAmoy | Self::Anvil => Wei::from_wei(100_000_000_000_000_000), // 0.1
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Self::PolygonAmoy => "https://rpc-amoy.polygon.technology",
            Self::Sepolia => "https://rpc.sepolia.org",
            Self::BnbTestnet => "https://data-seed-prebsc-1-s1.binance.org:8545",
            Self::Anvil => "http://127.0.0.1:8545",
        }
    }

    /// Environment variable holding the deployed contract address.
    pub fn contract_env_var(&self) -> &'static str {
        match self {
            Self::PolygonAmoy => "CHAINFLIP_AMOY_CONTRACT_ADDRESS",
            Self::Sepolia => "CHAINFLIP_SEPOLIA_CONTRACT_ADDRESS",
            Self::BnbTestnet => "CHAINFLIP_BNBTESTNET_CONTRACT_ADDRESS",
            Self::Anvil => "CHAINFLIP_ANVIL_CONTRACT_ADDRESS",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PolygonAmoy => "Polygon Amoy",
            Self::Sepolia => "Sepolia",
            Self::BnbTestnet => "BNB Testnet",
            Self::Anvil => "Anvil",
        };
        f.write_str(name)
    }
}

impl FromStr for Chain {
    type Err = ChainFlipError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(id) = s.parse::<u64>() {
            return Self::from_id(id)
                .ok_or_else(|| ChainFlipError::config(format!("unsupported chain id {}", id)));
        }

        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "amoy" | "polygon-amoy" => Ok(Self::PolygonAmoy),
            "sepolia" => Ok(Self::Sepolia),
            "bnb" | "bnbtestnet" | "bnb-testnet" => Ok(Self::BnbTestnet),
            "anvil" | "local" => Ok(Self::Anvil),
            other => Err(ChainFlipError::config(format!("unknown chain: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub chain: Chain,
    pub rpc_url: String,
    /// Falls back to the chain's environment variable when unset.
    pub contract_address: Option<Address>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Window used for the paginated match listing.
    pub page_size: u64,
    /// Drop pending overlay entries older than this. Disabled by default.
    pub overlay_expiry: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Chain::PolygonAmoy)
    }
}

impl ClientConfig {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            rpc_url: chain.default_rpc_url().to_string(),
            contract_address: None,
            poll_interval: Duration::from_secs(4),
            request_timeout: Duration::from_secs(20),
            page_size: 50,
            overlay_expiry: None,
        }
    }

    pub fn contract_address(&self) -> Result<Address> {
        if let Some(address) = self.contract_address {
            return Ok(address);
        }

        let var = self.chain.contract_env_var();
        let value = std::env::var(var).map_err(|_| {
            ChainFlipError::config(format!(
                "no contract address configured for {} (set {})",
                self.chain, var
            ))
        })?;
        value.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(ChainFlipError::config("RPC URL cannot be empty"));
        }

        if self.poll_interval.is_zero() {
            return Err(ChainFlipError::config(
                "Poll interval must be greater than 0",
            ));
        }

        if self.page_size == 0 {
            return Err(ChainFlipError::config("Page size must be greater than 0"));
        }

        if matches!(self.contract_address, Some(a) if a.is_zero()) {
            return Err(ChainFlipError::config(
                "Contract address cannot be the zero address",
            ));
        }

        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_chain_parsing() {
        assert_eq!("amoy".parse::<Chain>().unwrap(), Chain::PolygonAmoy);
        assert_eq!("11155111".parse::<Chain>().unwrap(), Chain::Sepolia);
        assert_eq!("bnb_testnet".parse::<Chain>().unwrap(), Chain::BnbTestnet);
        assert!("mainnet".parse::<Chain>().is_err());
        assert!("1".parse::<Chain>().is_err());
    }

    #[test]
    fn test_chain_min_bet_presets() {
        assert_eq!(Chain::Sepolia.default_min_bet().format_ether(), "0.001");
        assert_eq!(Chain::BnbTestnet.default_min_bet().format_ether(), "0.005");
        assert_eq!(Chain::PolygonAmoy.default_min_bet().format_ether(), "0.1");
    }

    #[test]
    fn test_validate() {
        let mut config = ClientConfig::new(Chain::Anvil);
        assert!(config.validate().is_ok());

        config.page_size = 0;
        assert!(config.validate().is_err());

        config.page_size = 50;
        config.contract_address = Some(Address::ZERO);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = ClientConfig::new(Chain::Sepolia);
        config.contract_address = Some(
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                .parse()
                .unwrap(),
        );
        config.overlay_expiry = Some(Duration::from_secs(600));
        config.save(&path).await.unwrap();

        let loaded = ClientConfig::load(&path).await.unwrap();
        assert_eq!(loaded.chain, Chain::Sepolia);
        assert_eq!(loaded.contract_address, config.contract_address);
        assert_eq!(loaded.overlay_expiry, Some(Duration::from_secs(600)));
        assert_eq!(loaded.contract_address().unwrap(), config.contract_address.unwrap());
    }
}
