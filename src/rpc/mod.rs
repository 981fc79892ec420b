mod queue;
mod rpc;

pub use queue::{RequestQueue, RpcTraceAction, RpcTraceFrame, RpcTraceResult};
pub use rpc::{RateLimitConfig, RetryConfig, RpcClientConfig, RpcError};
