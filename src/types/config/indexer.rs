use std::path::Path;

use serde::Deserialize;

use crate::types::config::chain::{resolve_chain_config, ChainConfig, ChainConfigRaw};
use crate::types::config::contract::{BlockSources, Contracts, Source};

pub const DEFAULT_MAX_HEALTHCHECK_DURATION_SECS: u64 = 240;

/// Which storage engine backs the sync store.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { filename: String },
    Postgres { connection_string: String },
}

#[derive(Debug, Deserialize)]
pub struct OptionsConfigRaw {
    pub max_healthcheck_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct IndexerConfigRaw {
    pub database: DatabaseConfig,
    pub networks: Vec<ChainConfigRaw>,
    pub contracts: Contracts,
    #[serde(default)]
    pub blocks: BlockSources,
    pub options: Option<OptionsConfigRaw>,
}

#[derive(Debug)]
pub struct IndexerConfig {
    pub database: DatabaseConfig,
    pub networks: Vec<ChainConfig>,
    pub contracts: Contracts,
    pub blocks: BlockSources,
    pub max_healthcheck_duration: u64,
}

impl IndexerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let raw: IndexerConfigRaw = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

        Ok(IndexerConfig {
            database: raw.database,
            networks: raw.networks.into_iter().map(resolve_chain_config).collect(),
            contracts: raw.contracts,
            blocks: raw.blocks,
            max_healthcheck_duration: raw
                .options
                .and_then(|o| o.max_healthcheck_duration)
                .unwrap_or(DEFAULT_MAX_HEALTHCHECK_DURATION_SECS),
        })
    }

    pub fn network(&self, name: &str) -> Option<&ChainConfig> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Lower the contract and block declarations into per-network sources,
    /// in declaration order. The position of a source in the returned list
    /// is its `filter_index`, the deterministic tiebreaker in event order.
    pub fn sources_for_network(&self, network: &ChainConfig) -> anyhow::Result<Vec<Source>> {
        let mut sources = Vec::new();

        let mut contract_names: Vec<&String> = self.contracts.keys().collect();
        contract_names.sort();
        for name in contract_names {
            let contract = &self.contracts[name];
            if contract.networks.iter().any(|n| n == &network.name) {
                sources.extend(contract.to_sources(name, network.chain_id)?);
            }
        }

        let mut block_names: Vec<&String> = self.blocks.keys().collect();
        block_names.sort();
        for name in block_names {
            let block = &self.blocks[name];
            if block.interval == 0 {
                anyhow::bail!("block source '{name}' has interval 0");
            }
            if block.networks.iter().any(|n| n == &network.name) {
                sources.push(block.to_source(name, network.chain_id));
            }
        }

        Ok(sources)
    }
}
