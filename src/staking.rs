//! Stake orchestrator
//!
//! Drives approve(optional) -> stake / unstake / claim against the FORGE
//! staking contract. Eligibility windows (minimum hold, claim threshold)
//! are enforced by the contract; this client only reflects them from the
//! consolidated view call and re-fetches that view after every
//! transaction-state change so countdowns never show stale optimistic
//! state. Reward previews mirror the contract's accrual arithmetic
//! exactly.

use crate::balances::BalanceSource;
use crate::chain::{
    address_word, decode_word, encode_call, erc20, wait_for_receipt, CallRequest, ChainClient,
    ReceiptOutcome,
};
use crate::error::ErrorNotice;
use crate::retry::RetryPolicy;
use crate::tokens::{addresses, FLUX, FORGE};
use crate::verify::{verify_delta, DeltaDirection, SettleOutcome, DELTA_TOLERANCE_PCT};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};

pub const SECONDS_PER_WEEK: u64 = 604_800;

/// Stakes so old the contract reports nonsense countdowns; rendered as
/// plainly unavailable instead.
const COUNTDOWN_SANITY_LIMIT: u64 = 10 * 365 * 24 * 60 * 60;

/// Per-user staking state, decoded from the consolidated 7-tuple view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStakeInfo {
    /// Staked FORGE (0 decimals, so raw == display)
    pub staked: u64,
    /// Accrued claimable reward in FLUX smallest units
    pub claimable_raw: U256,
    /// Unix seconds of the active stake
    pub stake_timestamp: u64,
    pub secs_until_unstake: u64,
    pub can_unstake: bool,
    pub secs_until_next_claim: u64,
    pub can_claim: bool,
}

impl UserStakeInfo {
    pub fn decode(data: &[u8]) -> Option<Self> {
        Some(Self {
            staked: to_u64(decode_word(data, 0)?),
            claimable_raw: decode_word(data, 1)?,
            stake_timestamp: to_u64(decode_word(data, 2)?),
            secs_until_unstake: to_u64(decode_word(data, 3)?),
            can_unstake: !decode_word(data, 4)?.is_zero(),
            secs_until_next_claim: to_u64(decode_word(data, 5)?),
            can_claim: !decode_word(data, 6)?.is_zero(),
        })
    }
}

/// Global contract stage, rate, and distribution totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakingStatus {
    pub stage: u8,
    /// Rate as an integer scaled by 100 (10 means 0.10% per week)
    pub reward_rate: u64,
    pub total_distributed_raw: U256,
}

impl StakingStatus {
    pub fn decode(data: &[u8]) -> Option<Self> {
        Some(Self {
            stage: to_u64(decode_word(data, 0)?) as u8,
            reward_rate: to_u64(decode_word(data, 1)?),
            total_distributed_raw: decode_word(data, 2)?,
        })
    }
}

/// Everything the staking screen needs, fetched in one pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct StakingOverview {
    pub user: UserStakeInfo,
    pub status: StakingStatus,
    /// Minimum claimable reward in FLUX smallest units
    pub min_claim_raw: U256,
    pub total_staked: u64,
    pub user_count: u64,
}

fn to_u64(word: U256) -> u64 {
    u64::try_from(word).unwrap_or(u64::MAX)
}

/// Weekly FLUX reward for a staked amount: `staked * rate / 100`.
pub fn weekly_reward(staked: u64, rate: u64) -> f64 {
    (staked as f64 * rate as f64) / 100.0
}

/// Continuous per-second accrual matching the contract.
pub fn reward_per_second(staked: u64, rate: u64) -> f64 {
    weekly_reward(staked, rate) / SECONDS_PER_WEEK as f64
}

/// Projected seconds until the accrued reward reaches the minimum
/// claimable amount: `min_claim * 100 * SECONDS_PER_WEEK / (staked * rate)`.
pub fn seconds_until_min_claim(staked: u64, rate: u64, min_claim: f64) -> Option<f64> {
    if staked == 0 || rate == 0 {
        return None;
    }
    Some(min_claim * 100.0 * SECONDS_PER_WEEK as f64 / (staked as f64 * rate as f64))
}

/// Render the contract's scaled rate for display: 10 -> "0.10".
pub fn format_rate(rate: u64) -> String {
    format!("{:.2}", rate as f64 / 100.0)
}

/// Human-readable countdown for lockup and claim windows.
pub fn format_countdown(seconds: u64) -> String {
    if seconds == 0 {
        return "available now".to_string();
    }
    if seconds > COUNTDOWN_SANITY_LIMIT {
        return "unavailable".to_string();
    }
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days >= 7 {
        let weeks = days / 7;
        let rest = days % 7;
        if rest > 0 {
            return format!("{}w {}d", weeks, rest);
        }
        return format!("{}w", weeks);
    }
    if days > 0 {
        return format!("{}d {}h", days, hours);
    }
    if hours > 0 {
        return format!("{}h {}m", hours, minutes);
    }
    if minutes > 0 {
        return format!("{}m", minutes);
    }
    "less than a minute".to_string()
}

fn user_info_call(account: Address) -> Bytes {
    encode_call("getUserStakeInfo(address)", &[address_word(account)])
}

fn staking_status_call() -> Bytes {
    encode_call("getStakingStatus()", &[])
}

fn min_claim_call() -> Bytes {
    encode_call("getMinClaimAmount()", &[])
}

fn total_staked_call() -> Bytes {
    encode_call("totalStakedTokens()", &[])
}

fn user_count_call() -> Bytes {
    encode_call("userCount()", &[])
}

async fn read_staked<C>(chain: &C, account: Address) -> Option<U256>
where
    C: ChainClient + ?Sized,
{
    let data = chain
        .call(addresses::STAKING_CONTRACT, user_info_call(account))
        .await
        .ok()?;
    decode_word(&data, 0)
}

/// What the orchestrator is currently doing. One operation at a time;
/// everything else is rejected until the slot is idle again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeActivity {
    Idle,
    Approving,
    Staking,
    Unstaking,
    Claiming,
}

pub struct StakeOrchestrator<C, B> {
    chain: C,
    balances: B,
    account: Address,
    overview: Option<StakingOverview>,
    activity: StakeActivity,
    notice: Option<ErrorNotice>,
}

impl<C, B> StakeOrchestrator<C, B>
where
    C: ChainClient,
    B: BalanceSource,
{
    pub fn new(chain: C, balances: B, account: Address) -> Self {
        Self {
            chain,
            balances,
            account,
            overview: None,
            activity: StakeActivity::Idle,
            notice: None,
        }
    }

    pub fn activity(&self) -> StakeActivity {
        self.activity
    }

    pub fn overview(&self) -> Option<&StakingOverview> {
        self.overview.as_ref()
    }

    pub fn active_notice(&self) -> Option<&ErrorNotice> {
        self.notice.as_ref().filter(|n| n.is_active())
    }

    pub fn acknowledge_notice(&mut self) {
        self.notice = None;
    }

    /// Unstaked FORGE available to stake.
    pub async fn available(&self) -> u64 {
        to_u64(self.balances.balance_or_zero(&FORGE, self.account).await)
    }

    /// Re-read the consolidated view and global stats.
    ///
    /// Individual read failures degrade to defaults with a warning; the
    /// screen keeps rendering rather than erroring out.
    pub async fn refresh(&mut self) -> &StakingOverview {
        let user = match self
            .chain
            .call(addresses::STAKING_CONTRACT, user_info_call(self.account))
            .await
        {
            Ok(data) => UserStakeInfo::decode(&data).unwrap_or_else(|| {
                tracing::warn!("malformed user stake info, using defaults");
                UserStakeInfo::default()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "user stake info read failed, using defaults");
                UserStakeInfo::default()
            }
        };

        let status = match self
            .chain
            .call(addresses::STAKING_CONTRACT, staking_status_call())
            .await
        {
            Ok(data) => StakingStatus::decode(&data).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "staking status read failed, using defaults");
                StakingStatus::default()
            }
        };

        let min_claim_raw = self
            .read_word(min_claim_call())
            .await
            // 0.01 FLUX, the contract's documented floor
            .unwrap_or(U256::from(1u64));
        let total_staked = self
            .read_word(total_staked_call())
            .await
            .map(to_u64)
            .unwrap_or(0);
        let user_count = self
            .read_word(user_count_call())
            .await
            .map(to_u64)
            .unwrap_or(0);

        self.overview.insert(StakingOverview {
            user,
            status,
            min_claim_raw,
            total_staked,
            user_count,
        })
    }

    async fn read_word(&self, data: Bytes) -> Option<U256> {
        match self.chain.call(addresses::STAKING_CONTRACT, data).await {
            Ok(returned) => decode_word(&returned, 0),
            Err(e) => {
                tracing::warn!(error = %e, "staking contract read failed");
                None
            }
        }
    }

    fn fail(&mut self, message: String, sticky: bool) {
        tracing::warn!(activity = ?self.activity, sticky, "{}", message);
        self.notice = Some(if sticky {
            ErrorNotice::sticky(message)
        } else {
            ErrorNotice::transient(message)
        });
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.activity != StakeActivity::Idle {
            return Err(Error::InvalidArgument(
                "another staking operation is in progress".to_string(),
            ));
        }
        Ok(())
    }

    /// Stake `amount` FORGE, approving the staking contract first when its
    /// allowance is short. Approvals are granted for twice the amount so
    /// the next stake skips this step.
    pub async fn stake(&mut self, amount: u64) -> Result<SettleOutcome> {
        self.ensure_idle()?;
        if amount < 1 {
            return Err(Error::InvalidArgument(
                "at least 1 FORGE is required to stake".to_string(),
            ));
        }
        let available = self.available().await;
        if amount > available {
            return Err(Error::InvalidArgument(format!(
                "insufficient FORGE: {} available, {} requested",
                available, amount
            )));
        }

        // FORGE has 0 decimals; the scaling is kept explicit so every
        // amount in this crate goes through the same conversion.
        let amount_raw = U256::from(amount) * FORGE.base_units();
        let baseline = U256::from(self.refresh().await.user.staked);

        let allowance = match self
            .chain
            .call(
                FORGE.address,
                erc20::allowance(self.account, addresses::STAKING_CONTRACT),
            )
            .await
        {
            Ok(data) => decode_word(&data, 0).unwrap_or(U256::ZERO),
            Err(e) => {
                tracing::warn!(error = %e, "allowance read failed, assuming approval needed");
                U256::ZERO
            }
        };

        if allowance < amount_raw {
            self.activity = StakeActivity::Approving;
            let approval = amount_raw * U256::from(2u64);
            let call = CallRequest::contract(
                FORGE.address,
                erc20::approve(addresses::STAKING_CONTRACT, approval),
            );
            let submit_result = self.chain.submit(call).await;
            let hash = match submit_result {
                Ok(hash) => hash,
                Err(e) => {
                    self.fail(format!("staking approval submission failed: {}", e), false);
                    self.activity = StakeActivity::Idle;
                    return Err(e);
                }
            };
            let receipt = wait_for_receipt(&self.chain, hash, RetryPolicy::approval_receipt()).await;
            match receipt {
                ReceiptOutcome::Reverted => {
                    let message = format!("staking approval reverted on chain ({})", hash);
                    self.fail(message.clone(), false);
                    self.activity = StakeActivity::Idle;
                    return Err(Error::Reverted(message));
                }
                ReceiptOutcome::Unknown => {
                    tracing::warn!(%hash, "approval unconfirmed within bound, continuing");
                }
                ReceiptOutcome::Confirmed => {}
            }
        }

        self.activity = StakeActivity::Staking;
        let call = CallRequest::contract(
            addresses::STAKING_CONTRACT,
            encode_call("stake(uint256)", &[amount_raw]),
        );
        let submit_result = self.chain.submit(call).await;
        let hash = match submit_result {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(format!("stake submission failed: {}", e), true);
                self.activity = StakeActivity::Idle;
                return Err(e);
            }
        };
        let receipt = wait_for_receipt(&self.chain, hash, RetryPolicy::execution_receipt()).await;
        match receipt {
            ReceiptOutcome::Reverted => {
                let message = format!("stake reverted on chain ({})", hash);
                self.fail(message.clone(), true);
                self.activity = StakeActivity::Idle;
                return Err(Error::Reverted(message));
            }
            ReceiptOutcome::Unknown => {
                tracing::info!(%hash, "no receipt within bound, relying on staked-amount verification");
            }
            ReceiptOutcome::Confirmed => {}
        }

        // The staked amount moves by the literal integer; no tolerance.
        let verification = {
            let chain = &self.chain;
            let account = self.account;
            verify_delta(
                baseline,
                amount_raw,
                DeltaDirection::Increase,
                0,
                RetryPolicy::balance_verify(),
                || async move { read_staked(chain, account).await },
            )
            .await
        };

        self.refresh().await;
        self.activity = StakeActivity::Idle;
        Ok(SettleOutcome::from(verification))
    }

    /// Unstake the entire position. Only available once the contract
    /// reports the minimum holding period as served.
    pub async fn unstake(&mut self) -> Result<SettleOutcome> {
        self.ensure_idle()?;
        let user = self.refresh().await.user;
        if user.staked == 0 {
            return Err(Error::InvalidArgument("nothing is staked".to_string()));
        }
        if !user.can_unstake {
            return Err(Error::InvalidArgument(format!(
                "unstake locked for another {}",
                format_countdown(user.secs_until_unstake)
            )));
        }

        self.activity = StakeActivity::Unstaking;
        let call = CallRequest::contract(addresses::STAKING_CONTRACT, encode_call("unstake()", &[]));
        let submit_result = self.chain.submit(call).await;
        let hash = match submit_result {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(format!("unstake submission failed: {}", e), true);
                self.activity = StakeActivity::Idle;
                return Err(e);
            }
        };
        let receipt = wait_for_receipt(&self.chain, hash, RetryPolicy::execution_receipt()).await;
        match receipt {
            ReceiptOutcome::Reverted => {
                let message = format!("unstake reverted on chain ({})", hash);
                self.fail(message.clone(), true);
                self.activity = StakeActivity::Idle;
                return Err(Error::Reverted(message));
            }
            ReceiptOutcome::Unknown => {
                tracing::info!(%hash, "no receipt within bound, relying on staked-amount verification");
            }
            ReceiptOutcome::Confirmed => {}
        }

        let baseline = U256::from(user.staked);
        let verification = {
            let chain = &self.chain;
            let account = self.account;
            verify_delta(
                baseline,
                baseline,
                DeltaDirection::Decrease,
                0,
                RetryPolicy::balance_verify(),
                || async move { read_staked(chain, account).await },
            )
            .await
        };

        self.refresh().await;
        self.activity = StakeActivity::Idle;
        Ok(SettleOutcome::from(verification))
    }

    /// Claim all accrued FLUX reward, verified by the FLUX balance rising
    /// by at least 90% of the claimable preview.
    pub async fn claim(&mut self) -> Result<SettleOutcome> {
        self.ensure_idle()?;
        let overview = *self.refresh().await;
        let user = overview.user;
        if !user.can_claim {
            let reason = if user.secs_until_next_claim > 0 {
                format!(
                    "next claim available in {}",
                    format_countdown(user.secs_until_next_claim)
                )
            } else {
                format!(
                    "accrued reward below the minimum claim of {} FLUX",
                    FLUX.format_raw(overview.min_claim_raw)
                )
            };
            return Err(Error::InvalidArgument(reason));
        }

        let baseline = self.balances.balance_or_zero(&FLUX, self.account).await;

        self.activity = StakeActivity::Claiming;
        let call =
            CallRequest::contract(addresses::STAKING_CONTRACT, encode_call("claimReward()", &[]));
        let submit_result = self.chain.submit(call).await;
        let hash = match submit_result {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(format!("claim submission failed: {}", e), true);
                self.activity = StakeActivity::Idle;
                return Err(e);
            }
        };
        let receipt = wait_for_receipt(&self.chain, hash, RetryPolicy::execution_receipt()).await;
        match receipt {
            ReceiptOutcome::Reverted => {
                let message = format!("claim reverted on chain ({})", hash);
                self.fail(message.clone(), true);
                self.activity = StakeActivity::Idle;
                return Err(Error::Reverted(message));
            }
            ReceiptOutcome::Unknown => {
                tracing::info!(%hash, "no receipt within bound, relying on balance verification");
            }
            ReceiptOutcome::Confirmed => {}
        }

        let verification = {
            let balances = &self.balances;
            let account = self.account;
            verify_delta(
                baseline,
                user.claimable_raw,
                DeltaDirection::Increase,
                DELTA_TOLERANCE_PCT,
                RetryPolicy::balance_verify(),
                || async move { balances.raw_balance(&FLUX, account).await.ok() },
            )
            .await
        };

        self.refresh().await;
        self.activity = StakeActivity::Idle;
        Ok(SettleOutcome::from(verification))
    }
}
