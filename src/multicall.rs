use crate::errors::{classify_provider_error, TradeError};
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::prelude::*;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// A single contract read to be batched into one RPC round trip.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Call {
    /// Target contract address
    pub target: Address,
    /// Encoded function call data
    pub call_data: Bytes,
}

/// Multicall3 `aggregate3` batch executor.
///
/// Batches multiple contract reads into a single RPC request to reduce
/// latency and provider load. Every call is submitted with
/// `allowFailure = true`, so one broken target (an uninitialized pool, a
/// token with a quirky ABI) cannot poison the batch; failed slots come back
/// as `None` and the caller decides what that means.
#[derive(Clone)]
pub struct Multicall<M: Middleware> {
    pub provider: Arc<M>,
    multicall_address: Address,
    batch_size: usize,
    timeout: Duration,
    max_retries: u32,
}

impl<M: Middleware + 'static> Multicall<M> {
    pub fn new(provider: Arc<M>, multicall_address: Address, batch_size: usize) -> Self {
        // RPC providers start rejecting batches somewhere above ~200 calls.
        let batch_size = batch_size.clamp(50, 200);
        Self {
            provider,
            multicall_address,
            batch_size,
            timeout: Duration::from_secs(8),
            max_retries: 1,
        }
    }

    /// Per-batch timeout. Elapsing counts as a transient failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts after a transient failure or timeout.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Runs a batch of calls, optionally pinned to a block. Results line up
    /// with the input order; a `None` slot means that call reverted.
    pub async fn run(
        &self,
        calls: Vec<Call>,
        block: Option<BlockId>,
    ) -> Result<Vec<Option<Bytes>>, TradeError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let (unique_calls, original_indices) = coalesce(&calls);
        debug!(
            "Multicall coalesced {} calls into {}",
            calls.len(),
            unique_calls.len()
        );

        let mut unique_results: Vec<Option<Bytes>> = Vec::with_capacity(unique_calls.len());
        for chunk in unique_calls.chunks(self.batch_size) {
            let chunk_results = self.execute_with_retry(chunk, block).await?;
            unique_results.extend(chunk_results);
        }

        // Reconstruct the full result set in the original order
        Ok(original_indices
            .into_iter()
            .map(|index| unique_results[index].clone())
            .collect())
    }

    async fn execute_with_retry(
        &self,
        calls: &[Call],
        block: Option<BlockId>,
    ) -> Result<Vec<Option<Bytes>>, TradeError> {
        let mut attempt: u32 = 0;
        loop {
            let outcome =
                tokio::time::timeout(self.timeout, self.execute_aggregate3(calls, block)).await;
            match outcome {
                Ok(Ok(results)) => return Ok(results),
                Ok(Err(err)) => {
                    if !(err.is_retryable() && attempt < self.max_retries) {
                        return Err(err);
                    }
                    warn!("Multicall attempt {} failed: {}", attempt + 1, err);
                }
                Err(_elapsed) => {
                    if attempt >= self.max_retries {
                        return Err(TradeError::NetworkTransient(format!(
                            "multicall timed out after {:?}",
                            self.timeout
                        )));
                    }
                    warn!("Multicall attempt {} timed out", attempt + 1);
                }
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
        }
    }

    async fn execute_aggregate3(
        &self,
        calls: &[Call],
        block: Option<BlockId>,
    ) -> Result<Vec<Option<Bytes>>, TradeError> {
        // function aggregate3(Call3[] calldata calls) payable returns (Result[] returnData)
        // Call3: (address target, bool allowFailure, bytes callData)
        // Result: (bool success, bytes returnData)
        let call_tokens: Vec<Token> = calls
            .iter()
            .map(|call| {
                Token::Tuple(vec![
                    Token::Address(call.target),
                    Token::Bool(true),
                    Token::Bytes(call.call_data.to_vec()),
                ])
            })
            .collect();

        #[allow(deprecated)]
        let function = Function {
            name: "aggregate3".to_string(),
            inputs: vec![Param {
                name: "calls".to_string(),
                kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                    ParamType::Address,
                    ParamType::Bool,
                    ParamType::Bytes,
                ]))),
                internal_type: None,
            }],
            outputs: vec![Param {
                name: "returnData".to_string(),
                kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                    ParamType::Bool,
                    ParamType::Bytes,
                ]))),
                internal_type: None,
            }],
            constant: None,
            state_mutability: StateMutability::Payable,
        };

        let calldata = function
            .encode_input(&[Token::Array(call_tokens)])
            .map_err(|e| TradeError::Rpc(format!("aggregate3 encoding failed: {e}")))?;

        let tx_request = TransactionRequest::new()
            .to(self.multicall_address)
            .data(calldata);
        let typed_tx: ethers::types::transaction::eip2718::TypedTransaction = tx_request.into();
        let response = self
            .provider
            .call(&typed_tx, block)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        let decoded = ethers::abi::decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bool,
                ParamType::Bytes,
            ])))],
            &response,
        )
        .map_err(|e| TradeError::Rpc(format!("aggregate3 decoding failed: {e}")))?;

        let results_array = decoded
            .into_iter()
            .next()
            .and_then(|t| t.into_array())
            .ok_or_else(|| TradeError::Rpc("invalid multicall response format".to_string()))?;

        let mut return_data = Vec::with_capacity(results_array.len());
        for result_token in results_array {
            match result_token {
                Token::Tuple(mut tuple) if tuple.len() == 2 => {
                    let data = match tuple.remove(1) {
                        Token::Bytes(data) => Bytes::from(data),
                        _ => {
                            return Err(TradeError::Rpc(
                                "invalid multicall result tuple".to_string(),
                            ))
                        }
                    };
                    let success = matches!(tuple.remove(0), Token::Bool(true));
                    return_data.push(success.then_some(data));
                }
                _ => {
                    return Err(TradeError::Rpc(
                        "invalid multicall result tuple".to_string(),
                    ))
                }
            }
        }

        Ok(return_data)
    }
}

/// Coalesces identical calls so duplicates cost one slot, returning the
/// unique calls plus a mapping from original position to unique index.
fn coalesce(calls: &[Call]) -> (Vec<Call>, Vec<usize>) {
    let mut unique = indexmap::IndexMap::new();
    let mut original_indices = vec![0; calls.len()];
    for (i, call) in calls.iter().enumerate() {
        let (index, _) = unique.insert_full((call.target, call.call_data.clone()), ());
        original_indices[i] = index;
    }
    let unique_calls = unique
        .into_keys()
        .map(|(target, call_data)| Call { target, call_data })
        .collect();
    (unique_calls, original_indices)
}
