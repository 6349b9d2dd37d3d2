//! Hearthfire Core Primitives
//!
//! Shared types, reward-math helpers and cross-pallet interfaces for
//! the Hearthfire staking and token-economics engine.

#![cfg_attr(not(feature = "std"), no_std)]

use codec::{Decode, Encode, MaxEncodedLen};
use scale_info::TypeInfo;
use sp_core::U256;
use sp_runtime::{
    traits::{IdentifyAccount, Verify},
    DispatchResult, MultiSignature, RuntimeDebug,
};

/// Token decimals for HEARTH and EMBER (12 decimals like DOT)
pub const DECIMALS: u8 = 12;

/// Primary token symbol
pub const HEARTH_SYMBOL: &str = "HEARTH";

/// Penalty token symbol
pub const EMBER_SYMBOL: &str = "EMBER";

/// 1 HEARTH = 10^12 smallest units
pub const HEARTH: u128 = 1_000_000_000_000;

/// Fixed-point scale for accumulators and penalty rates
pub const PRECISION: u128 = 1_000_000_000_000;

/// Basis-point denominator
pub const BASIS_POINTS: u32 = 10_000;

/// Maximum conversion penalty at 1e12 scale: 30%
pub const MAX_PENALTY: u128 = 300_000_000_000;

/// Block time in milliseconds: 6 seconds
pub const BLOCK_TIME_MS: u64 = 6_000;

/// Blocks per day (86400 / 6 = 14400)
pub const BLOCKS_PER_DAY: u32 = 14_400;

/// Reference penalty decay window: 3 days of blocks
pub const PENALTY_WINDOW: u32 = 3 * BLOCKS_PER_DAY;

/// Hard cap on per-pool deposit fees: 4%
pub const MAX_DEPOSIT_FEE_BP: u32 = 400;

/// Hard cap on harvest lockups: 14 days of blocks
pub const MAX_HARVEST_LOCKUP: u64 = 14 * BLOCKS_PER_DAY as u64;

/// Share of gross emission minted to the operations account: 5%
pub const OPS_SHARE_BP: u32 = 500;

/// Share of gross emission minted to the burn sink: 5%
pub const BURN_SHARE_BP: u32 = 500;

pub type BlockNumber = u32;
pub type Balance = u128;
pub type Nonce = u32;
pub type Hash = sp_core::H256;
pub type Signature = MultiSignature;
pub type AccountId = <<Signature as Verify>::Signer as IdentifyAccount>::AccountId;

/// Which token a farming pool pays its rewards in.
#[derive(
    Encode, Decode, Clone, Copy, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen, Default,
)]
pub enum RewardAsset {
    #[default]
    Hearth,
    Ember,
}

pub fn take_bp(amount: Balance, bp: u32) -> Option<Balance> {
    let cut = U256::from(amount)
        .checked_mul(U256::from(bp))?
        .checked_div(U256::from(BASIS_POINTS))?;
    u128::try_from(cut).ok()
}

/// Gross emission owed to one pool over `elapsed` blocks.
pub fn pool_emission(
    elapsed: u64,
    rate_per_block: Balance,
    alloc_weight: u64,
    total_alloc_weight: u64,
) -> Option<Balance> {
    if total_alloc_weight == 0 {
        return Some(0);
    }
    let gross = U256::from(rate_per_block)
        .checked_mul(U256::from(elapsed))?
        .checked_mul(U256::from(alloc_weight))?
        .checked_div(U256::from(total_alloc_weight))?;
    u128::try_from(gross).ok()
}

/// Fold `reward` into a reward-per-share accumulator.
pub fn accrue_per_share(acc: Balance, reward: Balance, total_staked: Balance) -> Option<Balance> {
    if total_staked == 0 {
        return Some(acc);
    }
    let delta = U256::from(reward)
        .checked_mul(U256::from(PRECISION))?
        .checked_div(U256::from(total_staked))?;
    acc.checked_add(u128::try_from(delta).ok()?)
}

/// `stake * acc / PRECISION`: the reward-debt baseline, also the gross
/// cumulative reward a position has earned under `acc`.
pub fn reward_debt(stake: Balance, acc: Balance) -> Option<Balance> {
    let owed = U256::from(stake).checked_mul(U256::from(acc))? / U256::from(PRECISION);
    u128::try_from(owed).ok()
}

/// Linear penalty decay: MAX_PENALTY at age 0 down to 0 at `window`.
pub fn penalty_rate(age: u64, window: u64) -> u128 {
    if window == 0 || age >= window {
        return 0;
    }
    MAX_PENALTY - MAX_PENALTY * age as u128 / window as u128
}

pub fn apply_penalty(amount: Balance, rate: u128) -> Option<Balance> {
    let cut = U256::from(amount).checked_mul(U256::from(rate))? / U256::from(PRECISION);
    amount.checked_sub(u128::try_from(cut).ok()?)
}

/// Balance-weighted effective acquisition block after receiving tokens.
///
/// The prior stamp never counts for more than `window` blocks of age:
/// it is clamped to `now - window` before averaging, and so is the
/// result.
pub fn blended_acquisition(
    prior_balance: Balance,
    prior_at: u64,
    received: Balance,
    now: u64,
    window: u64,
) -> u64 {
    if prior_balance == 0 {
        return now;
    }
    let floor = now.saturating_sub(window);
    let clamped = prior_at.max(floor);
    let num =
        U256::from(prior_balance) * U256::from(clamped) + U256::from(received) * U256::from(now);
    let den = U256::from(prior_balance) + U256::from(received);
    let blended = u64::try_from(num / den).unwrap_or(now);
    blended.max(floor)
}

/// Blocks of `[last, now]` that fall inside the `[start, end]` emission
/// window. Zero when the ranges do not overlap.
pub fn emission_overlap(last: u64, now: u64, start: u64, end: u64) -> u64 {
    let from = last.max(start);
    let to = now.min(end);
    to.saturating_sub(from)
}

/// Mint/transfer/balance surface of a reward-bearing token ledger.
pub trait TokenLedger<AccountId> {
    fn mint_to(who: &AccountId, amount: Balance) -> DispatchResult;
    fn transfer(from: &AccountId, to: &AccountId, amount: Balance) -> DispatchResult;
    fn balance_of(who: &AccountId) -> Balance;

    /// Tax in basis points the ledger itself deducts from transfers.
    fn transfer_tax_bp() -> u32 {
        0
    }
}

impl<AccountId> TokenLedger<AccountId> for () {
    fn mint_to(_: &AccountId, _: Balance) -> DispatchResult {
        Ok(())
    }
    fn transfer(_: &AccountId, _: &AccountId, _: Balance) -> DispatchResult {
        Ok(())
    }
    fn balance_of(_: &AccountId) -> Balance {
        0
    }
}

/// Checkpoint propagation for holding changes. `None` means the tokens
/// entered or left circulation rather than moving between accounts.
pub trait VoteHook<AccountId> {
    fn on_holding_changed(
        from: Option<&AccountId>,
        to: Option<&AccountId>,
        amount: Balance,
    ) -> DispatchResult;
}

impl<AccountId> VoteHook<AccountId> for () {
    fn on_holding_changed(
        _: Option<&AccountId>,
        _: Option<&AccountId>,
        _: Balance,
    ) -> DispatchResult {
        Ok(())
    }
}

/// Read side of the balance a delegation is weighted by.
pub trait HoldingBalance<AccountId> {
    fn holding(who: &AccountId) -> Balance;
}

impl<AccountId> HoldingBalance<AccountId> for () {
    fn holding(_: &AccountId) -> Balance {
        0
    }
}

/// Forces settlement of an account's secondary-pool position.
pub trait PoolSettlement<AccountId> {
    fn settle(who: &AccountId) -> DispatchResult;
}

impl<AccountId> PoolSettlement<AccountId> for () {
    fn settle(_: &AccountId) -> DispatchResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_boundaries() {
        assert_eq!(penalty_rate(0, 100), MAX_PENALTY);
        assert_eq!(penalty_rate(100, 100), 0);
        assert_eq!(penalty_rate(150, 100), 0);
        assert_eq!(penalty_rate(50, 100), 150_000_000_000);
    }

    #[test]
    fn test_penalty_strictly_decreasing() {
        let mut prev = penalty_rate(0, 100);
        for age in 1..=100 {
            let r = penalty_rate(age, 100);
            assert!(r < prev, "rate must fall at age {}", age);
            prev = r;
        }
    }

    #[test]
    fn test_apply_penalty() {
        // 15% of 1000 burned at the half-way point
        assert_eq!(apply_penalty(1000, 150_000_000_000), Some(850));
        // fully decayed penalty returns the amount untouched
        assert_eq!(apply_penalty(1000, 0), Some(1000));
        assert_eq!(apply_penalty(1000, MAX_PENALTY), Some(700));
    }

    #[test]
    fn test_accrual_scenario() {
        // one pool with full weight, rate 10/block, 5 blocks, 1000 staked
        let gross = pool_emission(5, 10, 100, 100).unwrap();
        assert_eq!(gross, 50);
        let skim = take_bp(gross, OPS_SHARE_BP + BURN_SHARE_BP).unwrap();
        assert_eq!(skim, 5);
        let net = gross - skim;
        let acc = accrue_per_share(0, net, 1000).unwrap();
        assert_eq!(reward_debt(1000, acc).unwrap(), 45);
    }

    #[test]
    fn test_accumulator_untouched_without_stake() {
        assert_eq!(accrue_per_share(77, 1_000, 0), Some(77));
    }

    #[test]
    fn test_blended_acquisition() {
        // first receive stamps now
        assert_eq!(blended_acquisition(0, 0, 500, 40, 100), 40);
        // equal balances average the stamps
        assert_eq!(blended_acquisition(100, 20, 100, 40, 100), 30);
        // stale stamp is clamped to the window floor before averaging
        assert_eq!(blended_acquisition(100, 0, 100, 200, 100), 150);
    }

    #[test]
    fn test_emission_overlap() {
        assert_eq!(emission_overlap(10, 20, 0, 100), 10);
        // nothing accrues before the window opens
        assert_eq!(emission_overlap(10, 20, 50, 100), 0);
        // window opening mid-span gates the lower bound
        assert_eq!(emission_overlap(10, 60, 50, 100), 10);
        // nothing accrues past the window end
        assert_eq!(emission_overlap(110, 120, 0, 100), 0);
        assert_eq!(emission_overlap(90, 120, 0, 100), 10);
    }

    #[test]
    fn test_take_bp() {
        assert_eq!(take_bp(10_000, 400), Some(400));
        assert_eq!(take_bp(10_000, 0), Some(0));
        assert_eq!(take_bp(33, 500), Some(1));
    }
}
