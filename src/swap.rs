//! Swap orchestrator
//!
//! Drives the quote -> approve(optional) -> execute -> verify machine for
//! exchanging native ETH against FLUX (and back) through the liquidity
//! aggregator, plus plain peer-to-peer transfers. Every wait is bounded:
//! an unconfirmed receipt proceeds optimistically, an explicit revert is
//! fatal to the attempt, and settlement is ultimately judged by the
//! observed balance delta.

use crate::aggregator::{DexApi, SwapQuote};
use crate::balances::BalanceSource;
use crate::chain::{erc20, wait_for_receipt, CallRequest, ChainClient, ReceiptOutcome};
use crate::error::ErrorNotice;
use crate::retry::RetryPolicy;
use crate::tokens::{TokenDescriptor, FLUX, NATIVE};
use crate::verify::{verify_delta, DeltaDirection, SettleOutcome, DELTA_TOLERANCE_PCT};
use crate::{Error, Result};
use alloy::primitives::{Address, U256};

/// Position in the swap flow.
///
/// An error never moves this backwards; it raises a notice and leaves the
/// machine at the same step so the user can retry without re-entering
/// captured inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStep {
    Initial,
    QuoteFetched,
    Approved,
    Completed,
}

/// One operation slot: buy, sell, or any other fixed token pair.
///
/// At most one orchestration is active per slot; a new quote is only
/// accepted from `Initial` (use [`SwapOrchestrator::reset`] after a
/// completed run).
pub struct SwapOrchestrator<C, D, B> {
    chain: C,
    dex: D,
    balances: B,
    account: Address,
    input: TokenDescriptor,
    output: TokenDescriptor,
    step: SwapStep,
    amount_raw: Option<U256>,
    slippage_pct: f64,
    quote: Option<SwapQuote>,
    needs_approval: bool,
    notice: Option<ErrorNotice>,
}

impl<C, D, B> SwapOrchestrator<C, D, B>
where
    C: ChainClient,
    D: DexApi,
    B: BalanceSource,
{
    pub fn new(
        chain: C,
        dex: D,
        balances: B,
        account: Address,
        input: TokenDescriptor,
        output: TokenDescriptor,
    ) -> Self {
        Self {
            chain,
            dex,
            balances,
            account,
            input,
            output,
            step: SwapStep::Initial,
            amount_raw: None,
            slippage_pct: 1.0,
            quote: None,
            needs_approval: false,
            notice: None,
        }
    }

    /// Buy slot: native ETH in, FLUX out.
    pub fn buy(chain: C, dex: D, balances: B, account: Address) -> Self {
        Self::new(chain, dex, balances, account, NATIVE, FLUX)
    }

    /// Sell slot: FLUX in, native ETH out.
    pub fn sell(chain: C, dex: D, balances: B, account: Address) -> Self {
        Self::new(chain, dex, balances, account, FLUX, NATIVE)
    }

    pub fn step(&self) -> SwapStep {
        self.step
    }

    pub fn needs_approval(&self) -> bool {
        self.needs_approval
    }

    pub fn quote(&self) -> Option<&SwapQuote> {
        self.quote.as_ref()
    }

    /// The captured input amount in smallest units. Survives errors so a
    /// retry does not re-enter it.
    pub fn amount_raw(&self) -> Option<U256> {
        self.amount_raw
    }

    /// The currently visible failure notice, if it has not expired.
    pub fn active_notice(&self) -> Option<&ErrorNotice> {
        self.notice.as_ref().filter(|n| n.is_active())
    }

    /// Dismiss a sticky notice.
    pub fn acknowledge_notice(&mut self) {
        self.notice = None;
    }

    /// Tear down to `Initial`, discarding all captured state.
    pub fn reset(&mut self) {
        self.step = SwapStep::Initial;
        self.amount_raw = None;
        self.quote = None;
        self.needs_approval = false;
        self.notice = None;
    }

    fn fail(&mut self, message: String, sticky: bool) {
        tracing::warn!(step = ?self.step, sticky, "{}", message);
        self.notice = Some(if sticky {
            ErrorNotice::sticky(message)
        } else {
            ErrorNotice::transient(message)
        });
    }

    /// Request an executable quote for `amount` of the input token.
    ///
    /// On success the machine advances to `QuoteFetched` and records
    /// whether the aggregator router still needs a spender approval.
    /// Native input never requires approval.
    pub async fn fetch_quote(&mut self, amount: &str, slippage_pct: f64) -> Result<()> {
        if self.step != SwapStep::Initial {
            return Err(Error::InvalidArgument(
                "an operation is already in progress for this slot, reset first".to_string(),
            ));
        }

        let raw = self.input.parse_amount(amount)?;
        if raw.is_zero() {
            return Err(Error::InvalidArgument(
                "amount must be greater than zero".to_string(),
            ));
        }
        // capture inputs before any network call so an error keeps them
        self.amount_raw = Some(raw);
        self.slippage_pct = slippage_pct;

        let quote_result = self
            .dex
            .swap_quote(&self.input, &self.output, raw, self.slippage_pct, self.account)
            .await;
        let quote = match quote_result {
            Ok(quote) => quote,
            Err(e) => {
                self.fail(e.to_string(), false);
                return Err(e);
            }
        };

        self.needs_approval = if self.input.is_native() {
            false
        } else {
            match self.dex.allowance(self.account, &self.input).await {
                Some(allowance) => allowance < raw,
                // unreadable allowance: require approval rather than risk
                // a swap that reverts on transferFrom
                None => true,
            }
        };

        tracing::info!(
            input = self.input.symbol,
            output = self.output.symbol,
            out_amount = %quote.out_amount,
            needs_approval = self.needs_approval,
            "quote fetched"
        );
        self.quote = Some(quote);
        self.step = SwapStep::QuoteFetched;
        Ok(())
    }

    /// Authorize the aggregator router to spend the input token.
    ///
    /// Grants maximal allowance so subsequent sells skip this step. The
    /// receipt wait is bounded; an unconfirmed approval proceeds
    /// optimistically while an explicit revert aborts the attempt and
    /// leaves the machine at `QuoteFetched` for a retry.
    pub async fn approve(&mut self) -> Result<()> {
        if self.step != SwapStep::QuoteFetched || !self.needs_approval {
            return Err(Error::InvalidArgument(
                "approval is not required at this step".to_string(),
            ));
        }
        let spender = self
            .quote
            .as_ref()
            .map(|q| q.spender)
            .ok_or_else(|| Error::InvalidQuote("no stored quote".to_string()))?;

        let call = CallRequest::contract(self.input.address, erc20::approve(spender, U256::MAX));
        let submit_result = self.chain.submit(call).await;
        let hash = match submit_result {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(format!("approval submission failed: {}", e), false);
                return Err(e);
            }
        };

        let receipt = wait_for_receipt(&self.chain, hash, RetryPolicy::approval_receipt()).await;
        match receipt {
            ReceiptOutcome::Reverted => {
                let message = format!("approval reverted on chain ({})", hash);
                self.fail(message.clone(), false);
                Err(Error::Reverted(message))
            }
            outcome => {
                if outcome == ReceiptOutcome::Unknown {
                    tracing::warn!(%hash, "approval unconfirmed within bound, continuing");
                }
                self.needs_approval = false;
                self.step = SwapStep::Approved;
                Ok(())
            }
        }
    }

    /// Submit the stored quote and confirm its economic effect.
    ///
    /// Settlement is judged by the output-token balance rising by at least
    /// 90% of the quoted amount. An exhausted verification budget yields
    /// [`SettleOutcome::Unverified`] — a degraded success the presentation
    /// layer must distinguish from a verified one, never a hard failure.
    pub async fn execute(&mut self) -> Result<SettleOutcome> {
        let ready = self.step == SwapStep::Approved
            || (self.step == SwapStep::QuoteFetched && !self.needs_approval);
        if !ready {
            return Err(Error::InvalidArgument(
                "no executable quote at this step".to_string(),
            ));
        }
        let quote = self
            .quote
            .clone()
            .ok_or_else(|| Error::InvalidQuote("no stored quote".to_string()))?;

        let baseline = self.output_balance().await.unwrap_or(U256::ZERO);

        let call = CallRequest {
            to: quote.to,
            data: quote.data,
            value: quote.value,
        };
        let submit_result = self.chain.submit(call).await;
        let hash = match submit_result {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(format!("swap submission failed: {}", e), true);
                return Err(e);
            }
        };

        if !self.chain.transaction_known(hash).await {
            tracing::warn!(%hash, "transaction not yet visible in the mempool");
        }

        let receipt = wait_for_receipt(&self.chain, hash, RetryPolicy::execution_receipt()).await;
        match receipt {
            ReceiptOutcome::Reverted => {
                let message = format!("swap reverted on chain ({})", hash);
                self.fail(message.clone(), true);
                return Err(Error::Reverted(message));
            }
            ReceiptOutcome::Unknown => {
                tracing::info!(%hash, "no receipt within bound, relying on balance verification");
            }
            ReceiptOutcome::Confirmed => {}
        }

        let verification = {
            let chain = &self.chain;
            let balances = &self.balances;
            let output = self.output;
            let account = self.account;
            verify_delta(
                baseline,
                quote.out_amount,
                DeltaDirection::Increase,
                DELTA_TOLERANCE_PCT,
                RetryPolicy::balance_verify(),
                || async move { token_balance_of(chain, balances, &output, account).await },
            )
            .await
        };

        let outcome = SettleOutcome::from(verification);
        if outcome == SettleOutcome::Unverified {
            tracing::warn!(
                %hash,
                "settlement not confirmed by balance delta, reporting degraded success"
            );
        }
        self.complete();
        Ok(outcome)
    }

    fn complete(&mut self) {
        self.step = SwapStep::Completed;
        self.quote = None;
        self.needs_approval = false;
        self.amount_raw = None;
        self.notice = None;
    }

    async fn output_balance(&self) -> Option<U256> {
        token_balance_of(&self.chain, &self.balances, &self.output, self.account).await
    }
}

async fn token_balance_of<C, B>(
    chain: &C,
    balances: &B,
    token: &TokenDescriptor,
    owner: Address,
) -> Option<U256>
where
    C: ChainClient + ?Sized,
    B: BalanceSource + ?Sized,
{
    if token.is_native() {
        chain.native_balance(owner).await.ok()
    } else {
        balances.raw_balance(token, owner).await.ok()
    }
}

/// Plain peer-to-peer transfer of any supported token.
///
/// Submits the call, waits (bounded) for a receipt, then confirms the
/// sender's balance dropped by at least 90% of the amount.
pub async fn send_transfer<C, B>(
    chain: &C,
    balances: &B,
    account: Address,
    token: &TokenDescriptor,
    recipient: Address,
    amount: &str,
) -> Result<SettleOutcome>
where
    C: ChainClient,
    B: BalanceSource,
{
    let raw = token.parse_amount(amount)?;
    if raw.is_zero() {
        return Err(Error::InvalidArgument(
            "amount must be greater than zero".to_string(),
        ));
    }

    let baseline = token_balance_of(chain, balances, token, account)
        .await
        .unwrap_or(U256::ZERO);
    if raw > baseline {
        return Err(Error::InvalidArgument(format!(
            "insufficient {} balance",
            token.symbol
        )));
    }

    let call = if token.is_native() {
        CallRequest::native_transfer(recipient, raw)
    } else {
        CallRequest::contract(token.address, erc20::transfer(recipient, raw))
    };
    let hash = chain.submit(call).await?;

    match wait_for_receipt(chain, hash, RetryPolicy::execution_receipt()).await {
        ReceiptOutcome::Reverted => {
            return Err(Error::Reverted(format!(
                "transfer reverted on chain ({})",
                hash
            )));
        }
        ReceiptOutcome::Unknown => {
            tracing::info!(%hash, "no receipt within bound, relying on balance verification");
        }
        ReceiptOutcome::Confirmed => {}
    }

    let verification = verify_delta(
        baseline,
        raw,
        DeltaDirection::Decrease,
        DELTA_TOLERANCE_PCT,
        RetryPolicy::balance_verify(),
        || async move { token_balance_of(chain, balances, token, account).await },
    )
    .await;

    Ok(SettleOutcome::from(verification))
}
