use serde::Deserialize;

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_RPC_REQUEST_CONCURRENCY: usize = 10;
pub const DEFAULT_FINALITY_DEPTH: u64 = 64;

#[derive(Debug, Deserialize)]
pub struct ChainConfigRaw {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url_env_var: String,
    pub polling_interval: Option<u64>,
    pub max_rpc_request_concurrency: Option<usize>,
    pub finality_depth: Option<u64>,
    pub requests_per_second: Option<u32>,
}

/// Resolved per-network settings. The RPC URL itself stays in the
/// environment; config files only name the variable.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url_env_var: String,
    /// Head poll period for realtime sync, in milliseconds.
    pub polling_interval: u64,
    /// Bound on in-flight RPC requests for this network.
    pub max_rpc_request_concurrency: usize,
    /// Blocks behind head past which reorgs are not tolerated.
    pub finality_depth: u64,
    /// Optional requests-per-second ceiling for rate-limited providers.
    pub requests_per_second: Option<u32>,
}

pub fn resolve_chain_config(raw: ChainConfigRaw) -> ChainConfig {
    ChainConfig {
        name: raw.name,
        chain_id: raw.chain_id,
        rpc_url_env_var: raw.rpc_url_env_var,
        polling_interval: raw.polling_interval.unwrap_or(DEFAULT_POLLING_INTERVAL_MS),
        max_rpc_request_concurrency: raw
            .max_rpc_request_concurrency
            .unwrap_or(DEFAULT_MAX_RPC_REQUEST_CONCURRENCY),
        finality_depth: raw.finality_depth.unwrap_or(DEFAULT_FINALITY_DEPTH),
        requests_per_second: raw.requests_per_second,
    }
}
