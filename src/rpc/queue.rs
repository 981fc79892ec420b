use std::sync::Arc;

use alloy::network::Ethereum;
use alloy::primitives::{Address, BlockNumber, Bytes, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Block, BlockId, BlockNumberOrTag, Filter, Log, TransactionReceipt};
use governor::Jitter;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::store::SyncStore;

use super::rpc::{
    build_rate_limiter, with_retry, RpcClientConfig, RpcError, StandardRateLimiter,
};

/// One frame of a `trace_filter` response (parity trace format).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTraceFrame {
    pub action: RpcTraceAction,
    pub block_hash: B256,
    pub block_number: u64,
    pub result: Option<RpcTraceResult>,
    pub subtraces: u64,
    pub trace_address: Vec<u64>,
    pub transaction_hash: Option<B256>,
    pub transaction_position: Option<u64>,
    #[serde(rename = "type")]
    pub trace_type: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTraceAction {
    pub call_type: Option<String>,
    pub from: Address,
    pub to: Option<Address>,
    pub gas: U256,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub value: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTraceResult {
    pub gas_used: U256,
    #[serde(default)]
    pub output: Bytes,
}

/// Per-network RPC dispatcher: bounded concurrency, retry with backoff, an
/// optional requests-per-second limit, and block-number-keyed response
/// memoization in the sync store (pruned with the chain on reorg).
pub struct RequestQueue {
    provider: RootProvider<Ethereum>,
    config: RpcClientConfig,
    chain_id: u64,
    semaphore: Arc<Semaphore>,
    rate_limiter: Option<StandardRateLimiter>,
    jitter: Option<Jitter>,
    store: Option<SyncStore>,
}

impl RequestQueue {
    pub fn new(
        config: RpcClientConfig,
        chain_id: u64,
        store: Option<SyncStore>,
    ) -> Result<Self, RpcError> {
        let provider = RootProvider::<Ethereum>::new_http(config.url.clone());

        let (rate_limiter, jitter) = match &config.rate_limit {
            Some(rate_config) => {
                let (limiter, jitter) = build_rate_limiter(rate_config);
                (Some(limiter), Some(jitter))
            }
            None => (None, None),
        };

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));

        Ok(Self {
            provider,
            config,
            chain_id,
            semaphore,
            rate_limiter,
            jitter,
            store,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Stop accepting requests. In-flight requests complete; subsequent
    /// dispatches fail with `RpcError::Killed`.
    pub fn kill(&self) {
        self.semaphore.close();
    }

    async fn wait_for_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>, RpcError> {
        let permit = self.semaphore.acquire().await.map_err(|_| RpcError::Killed)?;
        if let (Some(limiter), Some(jitter)) = (&self.rate_limiter, &self.jitter) {
            limiter.until_ready_with_jitter(*jitter).await;
        }
        Ok(permit)
    }

    pub async fn get_block_number(&self) -> Result<BlockNumber, RpcError> {
        with_retry(&self.config.retry, "eth_blockNumber", || async {
            let _permit = self.wait_for_slot().await?;
            self.provider
                .get_block_number()
                .await
                .map_err(|e| RpcError::ProviderError(e.to_string()))
        })
        .await
    }

    pub async fn get_block_by_number(
        &self,
        number: BlockNumberOrTag,
        full_transactions: bool,
    ) -> Result<Option<Block>, RpcError> {
        let op_name = format!("eth_getBlockByNumber({:?})", number);
        with_retry(&self.config.retry, &op_name, || async {
            let _permit = self.wait_for_slot().await?;
            let builder = self.provider.get_block(BlockId::Number(number));
            if full_transactions {
                builder
                    .full()
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            } else {
                builder
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            }
        })
        .await
    }

    pub async fn get_block_by_hash(
        &self,
        hash: B256,
        full_transactions: bool,
    ) -> Result<Option<Block>, RpcError> {
        let op_name = format!("eth_getBlockByHash({:?})", hash);
        with_retry(&self.config.retry, &op_name, || async {
            let _permit = self.wait_for_slot().await?;
            let builder = self.provider.get_block(BlockId::Hash(hash.into()));
            if full_transactions {
                builder
                    .full()
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            } else {
                builder
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            }
        })
        .await
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        let op_name = format!(
            "eth_getLogs(blocks {:?}-{:?})",
            filter.get_from_block(),
            filter.get_to_block()
        );
        with_retry(&self.config.retry, &op_name, || async {
            let _permit = self.wait_for_slot().await?;
            self.provider
                .get_logs(filter)
                .await
                .map_err(|e| RpcError::ProviderError(e.to_string()))
        })
        .await
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let op_name = format!("eth_getTransactionReceipt({:?})", hash);
        with_retry(&self.config.retry, &op_name, || async {
            let _permit = self.wait_for_slot().await?;
            self.provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| RpcError::ProviderError(e.to_string()))
        })
        .await
    }

    /// `trace_filter` over a block range, memoized by the range's end block
    /// so a resumed sync skips the (expensive) call entirely.
    pub async fn trace_filter(
        &self,
        from_block: u64,
        to_block: u64,
        from_addresses: Option<&[Address]>,
        to_addresses: Option<&[Address]>,
    ) -> Result<Vec<RpcTraceFrame>, RpcError> {
        let mut filter = serde_json::json!({
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
        });
        if let Some(from_addresses) = from_addresses {
            filter["fromAddress"] = serde_json::json!(from_addresses);
        }
        if let Some(to_addresses) = to_addresses {
            filter["toAddress"] = serde_json::json!(to_addresses);
        }

        let params = serde_json::Value::Array(vec![filter]);
        let raw = self
            .send_memoized("trace_filter", params, Some(to_block))
            .await?;
        serde_json::from_value(raw).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Generic JSON-RPC dispatch with retry and concurrency bounds.
    pub async fn send(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let method_owned = method.to_string();
        with_retry(&self.config.retry, method, || {
            let method = method_owned.clone();
            let params = params.clone();
            async move {
                let _permit = self.wait_for_slot().await?;
                self.provider
                    .client()
                    .request::<_, serde_json::Value>(method, params)
                    .await
                    .map_err(|e| RpcError::ProviderError(e.to_string()))
            }
        })
        .await
    }

    /// `send`, but consulting the store's `(request, chain_id, block_number)`
    /// memo table first. Only block-number-keyed requests are memoized: the
    /// key is pruned with the chain on reorg, so a cached response can never
    /// outlive the blocks it describes.
    pub async fn send_memoized(
        &self,
        method: &str,
        params: serde_json::Value,
        block_number: Option<u64>,
    ) -> Result<serde_json::Value, RpcError> {
        let (Some(store), Some(block_number)) = (&self.store, block_number) else {
            return self.send(method, params).await;
        };

        let request_key = format!("{method}:{params}");
        if let Ok(Some(cached)) = store
            .get_rpc_request_result(&request_key, self.chain_id, block_number)
            .await
        {
            match serde_json::from_str(&cached) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!("Discarding invalid cached RPC result: {}", e);
                }
            }
        }

        let result = self.send(method, params).await?;

        if let Err(e) = store
            .insert_rpc_request_result(
                &request_key,
                self.chain_id,
                block_number,
                &result.to_string(),
            )
            .await
        {
            // The memo table is an optimization; a failed write is not.
            tracing::warn!("Failed to memoize RPC result: {}", e);
        }

        Ok(result)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("chain_id", &self.chain_id)
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_frame_deserializes_parity_format() {
        let raw = serde_json::json!({
            "action": {
                "callType": "call",
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x2222222222222222222222222222222222222222",
                "gas": "0x30d40",
                "input": "0xa9059cbb",
                "value": "0x0"
            },
            "blockHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "blockNumber": 1234,
            "result": { "gasUsed": "0x5208", "output": "0x" },
            "subtraces": 0,
            "traceAddress": [0, 1],
            "transactionHash": "0x4444444444444444444444444444444444444444444444444444444444444444",
            "transactionPosition": 2,
            "type": "call"
        });

        let frame: RpcTraceFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.trace_type, "call");
        assert_eq!(frame.action.call_type.as_deref(), Some("call"));
        assert_eq!(frame.block_number, 1234);
        assert_eq!(frame.trace_address, vec![0, 1]);
        assert_eq!(frame.transaction_position, Some(2));
        assert!(frame.error.is_none());
    }

    #[test]
    fn reverted_trace_frame_carries_error() {
        let raw = serde_json::json!({
            "action": {
                "callType": "call",
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x2222222222222222222222222222222222222222",
                "gas": "0x30d40",
                "input": "0x",
                "value": "0x0"
            },
            "blockHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "blockNumber": 1,
            "subtraces": 0,
            "traceAddress": [],
            "transactionHash": "0x4444444444444444444444444444444444444444444444444444444444444444",
            "transactionPosition": 0,
            "type": "call",
            "error": "Reverted"
        });

        let frame: RpcTraceFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.error.as_deref(), Some("Reverted"));
        assert!(frame.result.is_none());
    }
}
