//! Trade execution: balance pre-checks, approval sequencing, dry-run
//! simulation with a padded gas estimate, and retried submission.
//!
//! Execution is planned before anything is sent. `build_execution_plan`
//! turns a prepared call plus the current allowance snapshot into an
//! ordered step list (approvals strictly first), and the executor then
//! walks that list, awaiting each approval's confirmation before moving on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ethers::prelude::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionReceipt, TransactionRequest, TxHash, U256};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::instrument;

use crate::contracts::{Erc20, IPermit2};
use crate::errors::{classify_provider_error, TradeError};
use crate::protocol::{ApprovalNeed, PreparedCall, ProtocolAdapter, SwapCallParams, TradeRoute};
use crate::quote::{format_amount, min_received, DEFAULT_DEADLINE_SECS};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Seconds from submission until the on-chain deadline.
    pub deadline_secs: u64,
    /// Percentage padding applied to the simulated gas estimate.
    pub gas_buffer_pct: u64,
    /// Attempt count for transient-failure retries.
    pub max_retries: usize,
    /// Submit missing approvals automatically. When false, a missing
    /// allowance surfaces as `ApprovalRequired` instead.
    pub auto_approve: bool,
    /// Native balance held back for gas when the input is the native
    /// currency.
    pub native_gas_reserve: U256,
    /// How long to wait for a transaction receipt.
    pub confirm_timeout: Duration,
    /// Lifetime of a Permit2 allowance grant.
    pub permit2_validity_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            deadline_secs: DEFAULT_DEADLINE_SECS,
            gas_buffer_pct: 20,
            max_retries: 3,
            auto_approve: true,
            // 0.005 native units of gas headroom.
            native_gas_reserve: U256::exp10(15) * 5u64,
            confirm_timeout: Duration::from_secs(180),
            permit2_validity_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Allowance state read before planning. `permit2` is only populated for
/// Permit2-gated spenders.
#[derive(Debug, Clone, Default)]
pub struct AllowanceSnapshot {
    pub erc20_allowance: U256,
    /// Permit2's own (amount, expiration) grant for the final spender.
    pub permit2: Option<(U256, u64)>,
}

/// One approval transaction that must confirm before the swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStep {
    /// Exact-amount ERC-20 approval for a direct spender, or a max approval
    /// when Permit2 is the spender (one-time setup).
    Erc20Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    /// Permit2's bounded, expiring grant to the actual router.
    Permit2Approve {
        token: Address,
        permit2: Address,
        spender: Address,
        amount: U256,
        expiration: u64,
    },
}

#[derive(Debug, Clone)]
pub enum ExecutionStep {
    Approve(ApprovalStep),
    Swap(PreparedCall),
}

/// Orders everything a trade needs: missing approvals first, then the swap
/// itself. Pure; network state comes in through the snapshot.
pub fn build_execution_plan(
    prepared: PreparedCall,
    snapshot: &AllowanceSnapshot,
    now_ts: u64,
    permit2_validity_secs: u64,
) -> Vec<ExecutionStep> {
    let mut steps = Vec::new();

    for need in &prepared.approvals {
        match need {
            ApprovalNeed::Erc20 {
                token,
                spender,
                amount,
            } => {
                if snapshot.erc20_allowance < *amount {
                    steps.push(ExecutionStep::Approve(ApprovalStep::Erc20Approve {
                        token: *token,
                        spender: *spender,
                        amount: *amount,
                    }));
                }
            }
            ApprovalNeed::Permit2 {
                token,
                permit2,
                spender,
                amount,
            } => {
                // Step one: the token must allow Permit2 itself. Done once
                // with an unlimited amount, since Permit2 enforces the
                // per-spender bounds.
                if snapshot.erc20_allowance < *amount {
                    steps.push(ExecutionStep::Approve(ApprovalStep::Erc20Approve {
                        token: *token,
                        spender: *permit2,
                        amount: U256::MAX,
                    }));
                }
                // Step two: Permit2's bounded grant to the router, refreshed
                // when missing, short, or expired.
                let granted = snapshot
                    .permit2
                    .map(|(granted, expiration)| granted >= *amount && expiration > now_ts)
                    .unwrap_or(false);
                if !granted {
                    steps.push(ExecutionStep::Approve(ApprovalStep::Permit2Approve {
                        token: *token,
                        permit2: *permit2,
                        spender: *spender,
                        amount: *amount,
                        expiration: now_ts + permit2_validity_secs,
                    }));
                }
            }
        }
    }

    steps.push(ExecutionStep::Swap(prepared));
    steps
}

/// Gas estimate padded by a percentage.
pub fn padded_gas(estimate: U256, buffer_pct: u64) -> U256 {
    estimate * U256::from(100 + buffer_pct) / U256::from(100u64)
}

/// Absolute Unix deadline, computed at submission time.
pub fn deadline_from_now(deadline_secs: u64) -> U256 {
    U256::from(Utc::now().timestamp().max(0) as u64 + deadline_secs)
}

/// Pulls ABI revert data out of a rendered provider error message, if any
/// hex blob is embedded in it.
pub fn extract_revert_hex(message: &str) -> Option<Vec<u8>> {
    message
        .split(|c: char| c.is_whitespace() || c == '"' || c == ',' || c == ')')
        .filter_map(|word| word.strip_prefix("0x"))
        .filter(|hex| hex.len() >= 8 && hex.len() % 2 == 0)
        .filter_map(|hex| hex::decode(hex).ok())
        .max_by_key(Vec::len)
}

/// A submitted swap: the transaction hash immediately, the receipt on await.
pub struct PendingTrade {
    tx_hash: TxHash,
    task: JoinHandle<Result<TransactionReceipt, TradeError>>,
}

impl PendingTrade {
    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Waits for the transaction to be mined and checks its status.
    pub async fn confirmed(self) -> Result<TransactionReceipt, TradeError> {
        self.task
            .await
            .map_err(|e| TradeError::Rpc(format!("confirmation task failed: {e}")))?
    }
}

/// Drives a priced route through approvals, simulation and submission.
/// The provider must be a signing middleware; read-only providers can
/// quote but never execute.
pub struct TradeExecutor<M: Middleware> {
    provider: Arc<M>,
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
    config: ExecutionConfig,
}

impl<M: Middleware + 'static> TradeExecutor<M> {
    pub fn new(
        provider: Arc<M>,
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            provider,
            adapters,
            config,
        }
    }

    fn adapter_for(&self, route: &TradeRoute) -> Result<&Arc<dyn ProtocolAdapter>, TradeError> {
        self.adapters
            .iter()
            .find(|a| a.version() == route.version)
            .ok_or_else(|| {
                TradeError::InvalidInput(format!("no adapter registered for {}", route.version))
            })
    }

    /// Executes a route for `account`. Optional overrides replace the
    /// route's slippage and the configured deadline at submission time.
    #[instrument(
        skip_all,
        fields(version = %route.version, hops = route.hops(), account = ?account)
    )]
    pub async fn execute(
        &self,
        route: &TradeRoute,
        account: Address,
        slippage_bps: Option<u32>,
        deadline_secs: Option<u64>,
    ) -> Result<PendingTrade, TradeError> {
        let minimum_received = match slippage_bps {
            Some(bps) => min_received(route.amount_out, bps)?,
            None => route.minimum_received,
        };
        let params = SwapCallParams {
            recipient: account,
            deadline: deadline_from_now(deadline_secs.unwrap_or(self.config.deadline_secs)),
            amount_in: route.amount_in,
            minimum_received,
        };

        let adapter = self.adapter_for(route)?;
        let prepared = adapter.build_swap_call(route, &params)?;

        self.check_balance(route, account).await?;

        let snapshot = self.allowance_snapshot(account, &prepared.approvals).await?;
        let plan = build_execution_plan(
            prepared,
            &snapshot,
            Utc::now().timestamp().max(0) as u64,
            self.config.permit2_validity_secs,
        );

        let needs_approval = plan
            .iter()
            .any(|step| matches!(step, ExecutionStep::Approve(_)));
        if needs_approval && !self.config.auto_approve {
            if let Some((token, spender)) = first_missing_allowance(&plan) {
                return Err(TradeError::ApprovalRequired {
                    token: format!("{token:?}"),
                    spender: format!("{spender:?}"),
                });
            }
        }

        let mut pending = None;
        for step in plan {
            match step {
                ExecutionStep::Approve(approval) => {
                    self.submit_approval(account, &approval).await?;
                }
                ExecutionStep::Swap(call) => {
                    pending = Some(self.submit_swap(account, &call).await?);
                }
            }
        }
        pending.ok_or_else(|| TradeError::Rpc("execution plan had no swap step".to_string()))
    }

    async fn check_balance(&self, route: &TradeRoute, account: Address) -> Result<(), TradeError> {
        let input = route.input();
        let (required, available) = if input.is_native {
            let balance = self
                .provider
                .get_balance(account, None)
                .await
                .map_err(|e| classify_provider_error(&e.to_string()))?;
            (route.amount_in + self.config.native_gas_reserve, balance)
        } else {
            let token = Erc20::new(input.address, self.provider.clone());
            let balance = token
                .balance_of(account)
                .call()
                .await
                .map_err(|e| classify_provider_error(&e.to_string()))?;
            (route.amount_in, balance)
        };

        if available < required {
            return Err(TradeError::InsufficientBalance {
                symbol: input.symbol.clone(),
                required: format_amount(required, input.decimals),
                available: format_amount(available, input.decimals),
                shortfall: format_amount(required - available, input.decimals),
            });
        }
        Ok(())
    }

    async fn allowance_snapshot(
        &self,
        owner: Address,
        needs: &[ApprovalNeed],
    ) -> Result<AllowanceSnapshot, TradeError> {
        let mut snapshot = AllowanceSnapshot::default();
        for need in needs {
            match need {
                ApprovalNeed::Erc20 { token, spender, .. } => {
                    let erc20 = Erc20::new(*token, self.provider.clone());
                    snapshot.erc20_allowance = erc20
                        .allowance(owner, *spender)
                        .call()
                        .await
                        .map_err(|e| classify_provider_error(&e.to_string()))?;
                }
                ApprovalNeed::Permit2 {
                    token,
                    permit2,
                    spender,
                    ..
                } => {
                    let erc20 = Erc20::new(*token, self.provider.clone());
                    snapshot.erc20_allowance = erc20
                        .allowance(owner, *permit2)
                        .call()
                        .await
                        .map_err(|e| classify_provider_error(&e.to_string()))?;

                    let permit = IPermit2::new(*permit2, self.provider.clone());
                    let (amount, expiration, _nonce) = permit
                        .allowance(owner, *token, *spender)
                        .call()
                        .await
                        .map_err(|e| classify_provider_error(&e.to_string()))?;
                    snapshot.permit2 = Some((amount, expiration));
                }
            }
        }
        Ok(snapshot)
    }

    async fn submit_approval(
        &self,
        account: Address,
        step: &ApprovalStep,
    ) -> Result<(), TradeError> {
        let (to, data, label) = match step {
            ApprovalStep::Erc20Approve {
                token,
                spender,
                amount,
            } => {
                let erc20 = Erc20::new(Address::zero(), self.provider.clone());
                let data = erc20
                    .approve(*spender, *amount)
                    .calldata()
                    .ok_or_else(|| TradeError::Rpc("approve calldata was empty".to_string()))?;
                (*token, data, "token approval")
            }
            ApprovalStep::Permit2Approve {
                token,
                permit2,
                spender,
                amount,
                expiration,
            } => {
                let permit = IPermit2::new(Address::zero(), self.provider.clone());
                let data = permit
                    .approve(*token, *spender, *amount, *expiration)
                    .calldata()
                    .ok_or_else(|| TradeError::Rpc("permit2 calldata was empty".to_string()))?;
                (*permit2, data, "permit2 grant")
            }
        };

        info!("Submitting {label} to {to:?}");
        let tx: TypedTransaction = TransactionRequest::new()
            .from(account)
            .to(to)
            .data(data)
            .into();
        let tx_hash = self
            .send_with_retry(tx)
            .await
            .map_err(|e| match e {
                TradeError::UserRejected => TradeError::UserRejected,
                other => TradeError::ApprovalFailed(other.to_string()),
            })?;

        let receipt = self.await_receipt(tx_hash).await?;
        if receipt.status == Some(0u64.into()) {
            return Err(TradeError::ApprovalFailed(format!(
                "{label} transaction {tx_hash:?} reverted"
            )));
        }
        debug!("{label} confirmed in block {:?}", receipt.block_number);
        Ok(())
    }

    #[instrument(skip_all, fields(to = ?call.to, value = %call.value))]
    async fn submit_swap(
        &self,
        account: Address,
        call: &PreparedCall,
    ) -> Result<PendingTrade, TradeError> {
        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(account)
            .to(call.to)
            .data(call.calldata.clone())
            .value(call.value)
            .into();

        // Dry run first: a revert here costs nothing and carries the reason.
        if let Err(error) = self.provider.call(&tx, None).await {
            let message = error.to_string();
            let decoded = extract_revert_hex(&message)
                .and_then(|bytes| crate::encoding::decode_revert_reason(&bytes));
            return Err(TradeError::SimulationFailed(
                decoded.unwrap_or_else(|| format!("transaction would fail: {message}")),
            ));
        }

        let estimate = self
            .provider
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        tx.set_gas(padded_gas(estimate, self.config.gas_buffer_pct));
        debug!(
            "Gas estimate {estimate}, padded to {}",
            tx.gas().map(|g| g.to_string()).unwrap_or_default()
        );

        let tx_hash = self.send_with_retry(tx).await?;
        info!("Swap submitted: {tx_hash:?}");

        let provider = Arc::clone(&self.provider);
        let timeout = self.config.confirm_timeout;
        let task = tokio::spawn(async move {
            let receipt = wait_for_receipt(provider, tx_hash, timeout).await?;
            if receipt.status == Some(0u64.into()) {
                return Err(TradeError::SimulationFailed(format!(
                    "swap transaction {tx_hash:?} reverted on-chain"
                )));
            }
            Ok(receipt)
        });

        Ok(PendingTrade { tx_hash, task })
    }

    /// Sends a transaction, retrying only transient failures with
    /// exponential backoff. A user rejection aborts immediately.
    async fn send_with_retry(&self, tx: TypedTransaction) -> Result<TxHash, TradeError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::start(
            strategy,
            || {
                let tx = tx.clone();
                async move {
                    match self.provider.send_transaction(tx, None).await {
                        Ok(pending) => Ok(*pending),
                        Err(error) => {
                            let classified = classify_provider_error(&error.to_string());
                            if classified.is_retryable() {
                                warn!("transient submission failure, will retry: {error}");
                            }
                            Err(classified)
                        }
                    }
                }
            },
            |error: &TradeError| error.is_retryable(),
        )
        .await
    }

    async fn await_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, TradeError> {
        wait_for_receipt(
            Arc::clone(&self.provider),
            tx_hash,
            self.config.confirm_timeout,
        )
        .await
    }
}

async fn wait_for_receipt<M: Middleware>(
    provider: Arc<M>,
    tx_hash: TxHash,
    timeout: Duration,
) -> Result<TransactionReceipt, TradeError> {
    let deadline = Instant::now() + timeout;
    loop {
        match provider.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(error) => warn!("receipt poll failed for {tx_hash:?}: {error}"),
        }
        if Instant::now() >= deadline {
            return Err(TradeError::NetworkTransient(format!(
                "no receipt for {tx_hash:?} after {timeout:?}"
            )));
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }
}

fn first_missing_allowance(plan: &[ExecutionStep]) -> Option<(Address, Address)> {
    plan.iter().find_map(|step| match step {
        ExecutionStep::Approve(ApprovalStep::Erc20Approve { token, spender, .. }) => {
            Some((*token, *spender))
        }
        ExecutionStep::Approve(ApprovalStep::Permit2Approve { token, spender, .. }) => {
            Some((*token, *spender))
        }
        ExecutionStep::Swap(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token as AbiToken;
    use ethers::types::Bytes;
    use ethers::utils::id;

    fn token_address() -> Address {
        "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap()
    }

    fn spender_address() -> Address {
        "0xE592427A0AEce92De3Edee1F18E0157C05861564".parse().unwrap()
    }

    fn permit2_address() -> Address {
        "0x000000000022D473030F116dDEE9F6B43aC78BA3".parse().unwrap()
    }

    fn prepared(approvals: Vec<ApprovalNeed>) -> PreparedCall {
        PreparedCall {
            to: spender_address(),
            calldata: Bytes::from(vec![0xaa, 0xbb, 0xcc, 0xdd]),
            value: U256::zero(),
            approvals,
        }
    }

    fn swap_position(plan: &[ExecutionStep]) -> usize {
        plan.iter()
            .position(|s| matches!(s, ExecutionStep::Swap(_)))
            .expect("plan always ends with the swap")
    }

    #[test]
    fn test_plan_puts_missing_approval_before_swap() {
        let call = prepared(vec![ApprovalNeed::Erc20 {
            token: token_address(),
            spender: spender_address(),
            amount: U256::from(1_000u64),
        }]);
        let plan = build_execution_plan(call, &AllowanceSnapshot::default(), 1_700_000_000, 3600);

        assert_eq!(plan.len(), 2);
        assert!(matches!(
            &plan[0],
            ExecutionStep::Approve(ApprovalStep::Erc20Approve { amount, .. })
                if *amount == U256::from(1_000u64)
        ));
        assert_eq!(swap_position(&plan), 1);
    }

    #[test]
    fn test_plan_skips_approval_when_allowance_covers() {
        let call = prepared(vec![ApprovalNeed::Erc20 {
            token: token_address(),
            spender: spender_address(),
            amount: U256::from(1_000u64),
        }]);
        let snapshot = AllowanceSnapshot {
            erc20_allowance: U256::from(5_000u64),
            permit2: None,
        };
        let plan = build_execution_plan(call, &snapshot, 1_700_000_000, 3600);

        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0], ExecutionStep::Swap(_)));
    }

    #[test]
    fn test_plan_permit2_cold_start_is_two_approvals() {
        let call = prepared(vec![ApprovalNeed::Permit2 {
            token: token_address(),
            permit2: permit2_address(),
            spender: spender_address(),
            amount: U256::from(1_000u64),
        }]);
        let plan = build_execution_plan(call, &AllowanceSnapshot::default(), 1_700_000_000, 3600);

        assert_eq!(plan.len(), 3);
        // Token -> Permit2 first, unlimited.
        assert!(matches!(
            &plan[0],
            ExecutionStep::Approve(ApprovalStep::Erc20Approve { spender, amount, .. })
                if *spender == permit2_address() && *amount == U256::MAX
        ));
        // Then Permit2 -> router, bounded and expiring.
        assert!(matches!(
            &plan[1],
            ExecutionStep::Approve(ApprovalStep::Permit2Approve { expiration, .. })
                if *expiration == 1_700_000_000 + 3600
        ));
        assert_eq!(swap_position(&plan), 2);
    }

    #[test]
    fn test_plan_refreshes_expired_permit2_grant() {
        let call = prepared(vec![ApprovalNeed::Permit2 {
            token: token_address(),
            permit2: permit2_address(),
            spender: spender_address(),
            amount: U256::from(1_000u64),
        }]);
        let now = 1_700_000_000u64;

        // ERC-20 side already granted, Permit2 grant expired yesterday.
        let stale = AllowanceSnapshot {
            erc20_allowance: U256::MAX,
            permit2: Some((U256::from(2_000u64), now - 86_400)),
        };
        let plan = build_execution_plan(call.clone(), &stale, now, 3600);
        assert_eq!(plan.len(), 2);
        assert!(matches!(
            &plan[0],
            ExecutionStep::Approve(ApprovalStep::Permit2Approve { .. })
        ));

        // Live grant covering the amount: nothing to approve.
        let live = AllowanceSnapshot {
            erc20_allowance: U256::MAX,
            permit2: Some((U256::from(2_000u64), now + 86_400)),
        };
        let plan = build_execution_plan(call, &live, now, 3600);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_padded_gas() {
        assert_eq!(
            padded_gas(U256::from(100_000u64), 20),
            U256::from(120_000u64)
        );
        assert_eq!(padded_gas(U256::from(7u64), 20), U256::from(8u64));
        assert_eq!(padded_gas(U256::zero(), 20), U256::zero());
    }

    #[test]
    fn test_deadline_is_in_the_future() {
        let deadline = deadline_from_now(1200);
        let now = U256::from(Utc::now().timestamp() as u64);
        assert!(deadline > now);
        assert!(deadline <= now + 1201);
    }

    #[test]
    fn test_extract_revert_hex_finds_error_payload() {
        let mut revert = id("Error(string)").to_vec();
        revert.extend(ethers::abi::encode(&[AbiToken::String(
            "Too little received".into(),
        )]));
        let message = format!(
            "(code: 3, message: execution reverted, data: Some(String(\"0x{}\")))",
            hex::encode(&revert)
        );

        let extracted = extract_revert_hex(&message).expect("payload present");
        assert_eq!(extracted, revert);
        assert_eq!(
            crate::encoding::decode_revert_reason(&extracted).as_deref(),
            Some("Too little received")
        );

        assert!(extract_revert_hex("connection refused").is_none());
        // Too short to be a selector.
        assert!(extract_revert_hex("bad 0xdead").is_none());
    }
}
