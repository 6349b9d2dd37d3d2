//! # Farming Pallet
//!
//! Multi-pool staking ledger for the Hearthfire reward engine. Each pool
//! stakes one fungible asset and accrues a share of the global per-block
//! emission, split across pools by allocation weight. Accounting follows
//! the accumulator scheme: `acc_reward_per_share` is scaled by `PRECISION`
//! and every position carries a `reward_debt` marker so that
//! `stake * acc / PRECISION - debt` is the reward earned since the last
//! settlement.
//!
//! Rewards are minted on sync: a fixed skim goes to the operations account
//! and the burn sink, the remainder is minted to the pallet account and
//! paid out on settlement. Pools may carry a deposit fee (capped) and a
//! harvest lockup (capped); rewards earned while locked are parked on the
//! position and released in full by the first settlement past the lockup.
//!
//! Payouts are capped by the pallet account balance. A shortfall is logged
//! and dropped rather than kept as a claim.

#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[frame_support::pallet]
pub mod pallet {
    use codec::{Decode, Encode, MaxEncodedLen};
    use frame_support::{
        pallet_prelude::*,
        traits::{fungibles, fungibles::Mutate, tokens::Preservation, EnsureOrigin},
        PalletId,
    };
    use frame_system::pallet_prelude::*;
    use hearthfire_primitives::{
        accrue_per_share, pool_emission, reward_debt, take_bp, Balance, RewardAsset, TokenLedger,
        BURN_SHARE_BP, MAX_DEPOSIT_FEE_BP, MAX_HARVEST_LOCKUP, OPS_SHARE_BP,
    };
    use scale_info::TypeInfo;
    use sp_runtime::{
        traits::{AccountIdConversion, SaturatedConversion, Saturating, Zero},
        RuntimeDebug,
    };

    /// Account seed for the pallet's reward float and staked custody.
    pub const FARM_ID: PalletId = PalletId(*b"hrthfarm");

    pub type AssetIdOf<T> =
        <<T as Config>::Assets as fungibles::Inspect<<T as frame_system::Config>::AccountId>>::AssetId;

    /// Per-pool accounting state.
    #[derive(Clone, Encode, Decode, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct PoolInfo<AssetId, BlockNumber> {
        /// Asset staked into this pool. One pool per asset.
        pub asset: AssetId,
        /// Total stake held by the pool across all positions.
        pub staked: Balance,
        /// Share of the global emission, relative to `TotalAllocWeight`.
        pub alloc_weight: u64,
        /// Last block up to which emission has been accrued.
        pub last_synced: BlockNumber,
        /// Accumulated reward per staked unit, scaled by `PRECISION`.
        pub acc_reward_per_share: Balance,
        /// Fee skimmed from deposits, in basis points.
        pub deposit_fee_bp: u32,
        /// Blocks a position must wait between reward payouts.
        pub harvest_lockup: BlockNumber,
        /// Which token this pool pays rewards in.
        pub reward: RewardAsset,
    }

    /// Per-staker accounting state within one pool.
    #[derive(Clone, Encode, Decode, PartialEq, Eq, Default, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct UserPosition<BlockNumber> {
        /// Staked amount, net of deposit fees.
        pub amount: Balance,
        /// Accumulator marker; earned = amount * acc / PRECISION - debt.
        pub reward_debt: Balance,
        /// Rewards accrued while the harvest lockup was active.
        pub locked_reward: Balance,
        /// First block at which rewards may be paid. Zero until first settle.
        pub next_harvest: BlockNumber,
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Origin allowed to manage pools and emission parameters.
        type AdminOrigin: EnsureOrigin<Self::RuntimeOrigin>;

        /// Fungible assets stakeable into pools.
        type Assets: fungibles::Inspect<Self::AccountId, Balance = Balance>
            + fungibles::Mutate<Self::AccountId>;

        /// Asset id under which HEARTH itself is staked. Deposits of this
        /// asset are credited net of the HEARTH transfer tax.
        #[pallet::constant]
        type HearthAssetId: Get<AssetIdOf<Self>>;

        /// Ledger used to mint and pay HEARTH rewards.
        type HearthLedger: TokenLedger<Self::AccountId>;

        /// Ledger used to mint and pay EMBER rewards.
        type EmberLedger: TokenLedger<Self::AccountId>;
    }

    // ===== STORAGE =====

    /// Pool state by sequential pool id.
    #[pallet::storage]
    #[pallet::getter(fn pools)]
    pub type Pools<T: Config> =
        StorageMap<_, Twox64Concat, u32, PoolInfo<AssetIdOf<T>, BlockNumberFor<T>>, OptionQuery>;

    /// Number of pools ever added. Pool ids are dense in `0..PoolCount`.
    #[pallet::storage]
    #[pallet::getter(fn pool_count)]
    pub type PoolCount<T> = StorageValue<_, u32, ValueQuery>;

    /// Sum of `alloc_weight` over all pools.
    #[pallet::storage]
    #[pallet::getter(fn total_alloc_weight)]
    pub type TotalAllocWeight<T> = StorageValue<_, u64, ValueQuery>;

    /// Staker positions by pool id and account.
    #[pallet::storage]
    #[pallet::getter(fn positions)]
    pub type Positions<T: Config> = StorageDoubleMap<
        _,
        Twox64Concat,
        u32,
        Blake2_128Concat,
        T::AccountId,
        UserPosition<BlockNumberFor<T>>,
        ValueQuery,
    >;

    /// Global reward emission per block, split across pools by weight.
    #[pallet::storage]
    #[pallet::getter(fn emission_rate)]
    pub type EmissionRate<T> = StorageValue<_, Balance, ValueQuery>;

    /// Block before which no pool accrues emission.
    #[pallet::storage]
    #[pallet::getter(fn start_block)]
    pub type StartBlock<T: Config> = StorageValue<_, BlockNumberFor<T>, ValueQuery>;

    /// Assets already bound to a pool, to reject duplicates.
    #[pallet::storage]
    pub type PooledAssets<T: Config> = StorageMap<_, Blake2_128Concat, AssetIdOf<T>, bool, ValueQuery>;

    /// Override for the operations skim destination.
    #[pallet::storage]
    pub type OpsAddress<T: Config> = StorageValue<_, T::AccountId, OptionQuery>;

    /// Override for the deposit fee destination.
    #[pallet::storage]
    pub type FeeAddress<T: Config> = StorageValue<_, T::AccountId, OptionQuery>;

    /// Reentrancy latch for all state-changing entry points.
    #[pallet::storage]
    pub type EntryGuard<T> = StorageValue<_, bool, ValueQuery>;

    // ===== EVENTS =====

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// A new pool was opened for staking.
        PoolAdded { pool_id: u32, asset: AssetIdOf<T>, alloc_weight: u64, reward: RewardAsset },
        /// Pool parameters were changed by the admin.
        PoolUpdated { pool_id: u32, alloc_weight: u64 },
        /// Stake credited to a position, net of fees.
        Deposited { who: T::AccountId, pool_id: u32, amount: Balance },
        /// Stake returned to a staker.
        Withdrawn { who: T::AccountId, pool_id: u32, amount: Balance },
        /// Stake returned with all pending rewards forfeited.
        EmergencyWithdrawn { who: T::AccountId, pool_id: u32, amount: Balance },
        /// Rewards paid out to a staker.
        RewardPaid { who: T::AccountId, pool_id: u32, amount: Balance },
        /// Rewards parked on a position until its lockup expires.
        RewardLocked { who: T::AccountId, pool_id: u32, amount: Balance },
        /// Global emission rate changed.
        EmissionRateChanged { rate: Balance },
        /// Emission start block changed.
        StartBlockChanged { block: BlockNumberFor<T> },
        /// Operations skim destination changed.
        OpsAddressChanged { who: T::AccountId },
        /// Deposit fee destination changed.
        FeeAddressChanged { who: T::AccountId },
    }

    // ===== ERRORS =====

    #[pallet::error]
    pub enum Error<T> {
        /// No pool exists under this id.
        UnknownPool,
        /// The asset is already staked by another pool.
        DuplicateStakeAsset,
        /// Deposit fee above `MAX_DEPOSIT_FEE_BP`.
        ExcessiveDepositFee,
        /// Harvest lockup above `MAX_HARVEST_LOCKUP`.
        ExcessiveLockup,
        /// Withdrawal larger than the staked amount.
        InsufficientStake,
        /// Arithmetic overflow in reward accounting.
        Overflow,
        /// Accumulator fell behind a position's debt marker.
        RewardUnderflow,
        /// Start block can only move while no pools exist.
        PoolsAlreadyOpen,
        /// A state-changing call re-entered the pallet.
        ReentrantCall,
    }

    // ===== CALLS =====

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Open a new pool staking `asset`. The pool starts accruing at the
        /// current block or at `StartBlock`, whichever is later.
        #[pallet::call_index(0)]
        #[pallet::weight(Weight::from_parts(60_000, 0))]
        pub fn add_pool(
            origin: OriginFor<T>,
            asset: AssetIdOf<T>,
            alloc_weight: u64,
            deposit_fee_bp: u32,
            harvest_lockup: BlockNumberFor<T>,
            reward: RewardAsset,
        ) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                ensure!(deposit_fee_bp <= MAX_DEPOSIT_FEE_BP, Error::<T>::ExcessiveDepositFee);
                ensure!(
                    harvest_lockup.saturated_into::<u64>() <= MAX_HARVEST_LOCKUP,
                    Error::<T>::ExcessiveLockup
                );
                ensure!(!PooledAssets::<T>::get(&asset), Error::<T>::DuplicateStakeAsset);

                Self::sync_all()?;

                let pool_id = PoolCount::<T>::get();
                let now = frame_system::Pallet::<T>::block_number();
                let last_synced = now.max(StartBlock::<T>::get());

                Pools::<T>::insert(
                    pool_id,
                    PoolInfo {
                        asset: asset.clone(),
                        staked: 0,
                        alloc_weight,
                        last_synced,
                        acc_reward_per_share: 0,
                        deposit_fee_bp,
                        harvest_lockup,
                        reward,
                    },
                );
                PooledAssets::<T>::insert(&asset, true);
                PoolCount::<T>::put(pool_id.saturating_add(1));
                TotalAllocWeight::<T>::mutate(|w| *w = w.saturating_add(alloc_weight));

                log::info!(
                    target: "runtime::farming",
                    "pool {} opened with weight {} paying {:?}",
                    pool_id,
                    alloc_weight,
                    reward,
                );
                Self::deposit_event(Event::PoolAdded { pool_id, asset, alloc_weight, reward });
                Ok(())
            })
        }

        /// Change the weight, fee, lockup or reward token of a pool. All
        /// pools are synced first so past emission keeps the old split.
        #[pallet::call_index(1)]
        #[pallet::weight(Weight::from_parts(50_000, 0))]
        pub fn set_pool(
            origin: OriginFor<T>,
            pool_id: u32,
            alloc_weight: u64,
            deposit_fee_bp: u32,
            harvest_lockup: BlockNumberFor<T>,
            reward: RewardAsset,
        ) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                ensure!(deposit_fee_bp <= MAX_DEPOSIT_FEE_BP, Error::<T>::ExcessiveDepositFee);
                ensure!(
                    harvest_lockup.saturated_into::<u64>() <= MAX_HARVEST_LOCKUP,
                    Error::<T>::ExcessiveLockup
                );

                Self::sync_all()?;

                let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::UnknownPool)?;
                TotalAllocWeight::<T>::mutate(|w| {
                    *w = w.saturating_sub(pool.alloc_weight).saturating_add(alloc_weight)
                });
                pool.alloc_weight = alloc_weight;
                pool.deposit_fee_bp = deposit_fee_bp;
                pool.harvest_lockup = harvest_lockup;
                pool.reward = reward;
                Pools::<T>::insert(pool_id, pool);

                Self::deposit_event(Event::PoolUpdated { pool_id, alloc_weight });
                Ok(())
            })
        }

        /// Stake `amount` of the pool's asset. Pending rewards are settled
        /// or locked first; the credited stake is net of the HEARTH transfer
        /// tax (if applicable) and the pool's deposit fee.
        #[pallet::call_index(2)]
        #[pallet::weight(Weight::from_parts(80_000, 0))]
        pub fn deposit(origin: OriginFor<T>, pool_id: u32, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_deposit(&who, pool_id, amount))
        }

        /// Withdraw up to the staked amount. Pending rewards are settled or
        /// locked first.
        #[pallet::call_index(3)]
        #[pallet::weight(Weight::from_parts(80_000, 0))]
        pub fn withdraw(origin: OriginFor<T>, pool_id: u32, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_withdraw(&who, pool_id, amount))
        }

        /// Settle rewards without moving stake.
        #[pallet::call_index(4)]
        #[pallet::weight(Weight::from_parts(70_000, 0))]
        pub fn harvest(origin: OriginFor<T>, pool_id: u32) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_deposit(&who, pool_id, 0))
        }

        /// Return the full stake and forfeit all pending and locked rewards.
        /// Skips reward sync entirely.
        #[pallet::call_index(5)]
        #[pallet::weight(Weight::from_parts(50_000, 0))]
        pub fn emergency_withdraw(origin: OriginFor<T>, pool_id: u32) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| {
                let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::UnknownPool)?;
                let pos = Positions::<T>::take(pool_id, &who);
                pool.staked = pool.staked.saturating_sub(pos.amount);
                Pools::<T>::insert(pool_id, pool.clone());
                if pos.amount > 0 {
                    T::Assets::transfer(
                        pool.asset,
                        &Self::farm_account(),
                        &who,
                        pos.amount,
                        Preservation::Expendable,
                    )?;
                }
                Self::deposit_event(Event::EmergencyWithdrawn {
                    who,
                    pool_id,
                    amount: pos.amount,
                });
                Ok(())
            })
        }

        /// Accrue emission for one pool up to the current block.
        #[pallet::call_index(6)]
        #[pallet::weight(Weight::from_parts(40_000, 0))]
        pub fn sync_pool(origin: OriginFor<T>, pool_id: u32) -> DispatchResult {
            ensure_signed(origin)?;
            Self::with_entry_guard(|| {
                let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::UnknownPool)?;
                Self::do_sync(&mut pool)?;
                Pools::<T>::insert(pool_id, pool);
                Ok(())
            })
        }

        /// Accrue emission for every pool up to the current block.
        #[pallet::call_index(7)]
        #[pallet::weight(Weight::from_parts(200_000, 0))]
        pub fn sync_all_pools(origin: OriginFor<T>) -> DispatchResult {
            ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::sync_all())
        }

        /// Change the global per-block emission. All pools are synced first
        /// so the old rate applies up to this block.
        #[pallet::call_index(8)]
        #[pallet::weight(Weight::from_parts(60_000, 0))]
        pub fn set_emission_rate(origin: OriginFor<T>, rate: Balance) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                Self::sync_all()?;
                EmissionRate::<T>::put(rate);
                log::info!(target: "runtime::farming", "emission rate set to {}", rate);
                Self::deposit_event(Event::EmissionRateChanged { rate });
                Ok(())
            })
        }

        /// Delay the start of emission. Only allowed before any pool exists,
        /// since pools anchor their accrual to the start block when added.
        #[pallet::call_index(9)]
        #[pallet::weight(Weight::from_parts(30_000, 0))]
        pub fn set_start_block(origin: OriginFor<T>, block: BlockNumberFor<T>) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                ensure!(PoolCount::<T>::get() == 0, Error::<T>::PoolsAlreadyOpen);
                StartBlock::<T>::put(block);
                Self::deposit_event(Event::StartBlockChanged { block });
                Ok(())
            })
        }

        /// Redirect the operations skim.
        #[pallet::call_index(10)]
        #[pallet::weight(Weight::from_parts(25_000, 0))]
        pub fn set_ops_address(origin: OriginFor<T>, who: T::AccountId) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                OpsAddress::<T>::put(&who);
                Self::deposit_event(Event::OpsAddressChanged { who });
                Ok(())
            })
        }

        /// Redirect deposit fees.
        #[pallet::call_index(11)]
        #[pallet::weight(Weight::from_parts(25_000, 0))]
        pub fn set_fee_address(origin: OriginFor<T>, who: T::AccountId) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                FeeAddress::<T>::put(&who);
                Self::deposit_event(Event::FeeAddressChanged { who });
                Ok(())
            })
        }
    }

    // ===== INTERNAL =====

    impl<T: Config> Pallet<T> {
        /// Custody account for staked assets and the reward float.
        pub fn farm_account() -> T::AccountId {
            FARM_ID.into_account_truncating()
        }

        /// Destination of the operations skim.
        pub fn ops_account() -> T::AccountId {
            OpsAddress::<T>::get().unwrap_or_else(|| FARM_ID.into_sub_account_truncating(b"ops"))
        }

        /// Destination of deposit fees.
        pub fn fee_account() -> T::AccountId {
            FeeAddress::<T>::get().unwrap_or_else(|| FARM_ID.into_sub_account_truncating(b"fee"))
        }

        /// Unspendable sink for the burn share of emission.
        pub fn burn_account() -> T::AccountId {
            FARM_ID.into_sub_account_truncating(b"burn")
        }

        /// Rewards earned by `who` in `pool_id` but not yet settled, as if
        /// the pool were synced at the current block. Locked rewards are not
        /// included.
        pub fn pending_reward(pool_id: u32, who: &T::AccountId) -> Balance {
            let pool = match Pools::<T>::get(pool_id) {
                Some(pool) => pool,
                None => return 0,
            };
            let pos = Positions::<T>::get(pool_id, who);
            let now = frame_system::Pallet::<T>::block_number();
            let mut acc = pool.acc_reward_per_share;
            if now > pool.last_synced && pool.staked > 0 && pool.alloc_weight > 0 {
                let elapsed = now.saturating_sub(pool.last_synced).saturated_into::<u64>();
                let gross = pool_emission(
                    elapsed,
                    EmissionRate::<T>::get(),
                    pool.alloc_weight,
                    TotalAllocWeight::<T>::get(),
                );
                if let Some((net, _, _)) = gross.and_then(Self::split_emission) {
                    acc = accrue_per_share(acc, net, pool.staked).unwrap_or(acc);
                }
            }
            reward_debt(pos.amount, acc)
                .and_then(|earned| earned.checked_sub(pos.reward_debt))
                .unwrap_or(0)
        }

        /// Split gross emission into (net, ops, burn). The skim is taken off
        /// the gross in one cut so net is exactly gross minus the combined
        /// share; the burn sink absorbs the rounding remainder.
        fn split_emission(gross: Balance) -> Option<(Balance, Balance, Balance)> {
            let skim = take_bp(gross, OPS_SHARE_BP.saturating_add(BURN_SHARE_BP))?;
            let ops = take_bp(gross, OPS_SHARE_BP)?;
            Some((gross.checked_sub(skim)?, ops, skim.checked_sub(ops)?))
        }

        fn mint_reward(kind: RewardAsset, to: &T::AccountId, amount: Balance) -> DispatchResult {
            if amount.is_zero() {
                return Ok(());
            }
            match kind {
                RewardAsset::Hearth => T::HearthLedger::mint_to(to, amount),
                RewardAsset::Ember => T::EmberLedger::mint_to(to, amount),
            }
        }

        /// Pay `owed` out of the pallet account, capped by what it holds.
        /// Returns the amount actually paid; the shortfall is dropped.
        fn pay_reward(
            kind: RewardAsset,
            to: &T::AccountId,
            owed: Balance,
        ) -> Result<Balance, DispatchError> {
            let farm = Self::farm_account();
            let held = match kind {
                RewardAsset::Hearth => T::HearthLedger::balance_of(&farm),
                RewardAsset::Ember => T::EmberLedger::balance_of(&farm),
            };
            let paid = owed.min(held);
            if paid > 0 {
                match kind {
                    RewardAsset::Hearth => T::HearthLedger::transfer(&farm, to, paid)?,
                    RewardAsset::Ember => T::EmberLedger::transfer(&farm, to, paid)?,
                }
            }
            if paid < owed {
                log::warn!(
                    target: "runtime::farming",
                    "reward float short: owed {} paid {}",
                    owed,
                    paid,
                );
            }
            Ok(paid)
        }

        /// Accrue emission for one pool up to the current block. Idempotent
        /// within a block. A pool with no stake or no weight only advances
        /// its sync marker.
        fn do_sync(pool: &mut PoolInfo<AssetIdOf<T>, BlockNumberFor<T>>) -> DispatchResult {
            let now = frame_system::Pallet::<T>::block_number();
            if now <= pool.last_synced {
                return Ok(());
            }
            if pool.staked.is_zero() || pool.alloc_weight == 0 {
                pool.last_synced = now;
                return Ok(());
            }
            let elapsed = now.saturating_sub(pool.last_synced).saturated_into::<u64>();
            let gross = pool_emission(
                elapsed,
                EmissionRate::<T>::get(),
                pool.alloc_weight,
                TotalAllocWeight::<T>::get(),
            )
            .ok_or(Error::<T>::Overflow)?;
            if gross > 0 {
                let (net, ops_cut, burn_cut) =
                    Self::split_emission(gross).ok_or(Error::<T>::Overflow)?;
                Self::mint_reward(pool.reward, &Self::ops_account(), ops_cut)?;
                Self::mint_reward(pool.reward, &Self::burn_account(), burn_cut)?;
                Self::mint_reward(pool.reward, &Self::farm_account(), net)?;
                pool.acc_reward_per_share =
                    accrue_per_share(pool.acc_reward_per_share, net, pool.staked)
                        .ok_or(Error::<T>::Overflow)?;
            }
            pool.last_synced = now;
            Ok(())
        }

        fn sync_all() -> DispatchResult {
            for pool_id in 0..PoolCount::<T>::get() {
                if let Some(mut pool) = Pools::<T>::get(pool_id) {
                    Self::do_sync(&mut pool)?;
                    Pools::<T>::insert(pool_id, pool);
                }
            }
            Ok(())
        }

        /// Settle rewards for a position against a synced pool. Past the
        /// lockup, pending plus parked rewards are paid and the lockup
        /// re-arms; inside it, pending rewards are parked on the position.
        fn settle_or_lock(
            pool_id: u32,
            pool: &PoolInfo<AssetIdOf<T>, BlockNumberFor<T>>,
            who: &T::AccountId,
            pos: &mut UserPosition<BlockNumberFor<T>>,
        ) -> DispatchResult {
            let now = frame_system::Pallet::<T>::block_number();
            if pos.next_harvest.is_zero() {
                pos.next_harvest = now.saturating_add(pool.harvest_lockup);
            }
            let earned =
                reward_debt(pos.amount, pool.acc_reward_per_share).ok_or(Error::<T>::Overflow)?;
            let pending = earned.checked_sub(pos.reward_debt).ok_or(Error::<T>::RewardUnderflow)?;
            if now >= pos.next_harvest {
                let owed = pending.checked_add(pos.locked_reward).ok_or(Error::<T>::Overflow)?;
                pos.locked_reward = 0;
                pos.next_harvest = now.saturating_add(pool.harvest_lockup);
                if owed > 0 {
                    let paid = Self::pay_reward(pool.reward, who, owed)?;
                    Self::deposit_event(Event::RewardPaid {
                        who: who.clone(),
                        pool_id,
                        amount: paid,
                    });
                }
            } else if pending > 0 {
                pos.locked_reward =
                    pos.locked_reward.checked_add(pending).ok_or(Error::<T>::Overflow)?;
                Self::deposit_event(Event::RewardLocked {
                    who: who.clone(),
                    pool_id,
                    amount: pending,
                });
            }
            Ok(())
        }

        fn do_deposit(who: &T::AccountId, pool_id: u32, amount: Balance) -> DispatchResult {
            let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::UnknownPool)?;
            Self::do_sync(&mut pool)?;
            let mut pos = Positions::<T>::get(pool_id, who);
            Self::settle_or_lock(pool_id, &pool, who, &mut pos)?;

            let mut credited = 0;
            if amount > 0 {
                T::Assets::transfer(
                    pool.asset.clone(),
                    who,
                    &Self::farm_account(),
                    amount,
                    Preservation::Expendable,
                )?;
                credited = amount;
                if pool.asset == T::HearthAssetId::get() {
                    let tax = take_bp(credited, T::HearthLedger::transfer_tax_bp())
                        .ok_or(Error::<T>::Overflow)?;
                    credited = credited.saturating_sub(tax);
                }
                if pool.deposit_fee_bp > 0 {
                    let fee =
                        take_bp(credited, pool.deposit_fee_bp).ok_or(Error::<T>::Overflow)?;
                    if fee > 0 {
                        T::Assets::transfer(
                            pool.asset.clone(),
                            &Self::farm_account(),
                            &Self::fee_account(),
                            fee,
                            Preservation::Expendable,
                        )?;
                        credited = credited.saturating_sub(fee);
                    }
                }
                pos.amount = pos.amount.checked_add(credited).ok_or(Error::<T>::Overflow)?;
                pool.staked = pool.staked.checked_add(credited).ok_or(Error::<T>::Overflow)?;
            }

            pos.reward_debt =
                reward_debt(pos.amount, pool.acc_reward_per_share).ok_or(Error::<T>::Overflow)?;
            Positions::<T>::insert(pool_id, who, pos);
            Pools::<T>::insert(pool_id, pool);
            if amount > 0 {
                Self::deposit_event(Event::Deposited {
                    who: who.clone(),
                    pool_id,
                    amount: credited,
                });
            }
            Ok(())
        }

        fn do_withdraw(who: &T::AccountId, pool_id: u32, amount: Balance) -> DispatchResult {
            let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::UnknownPool)?;
            let mut pos = Positions::<T>::get(pool_id, who);
            ensure!(amount <= pos.amount, Error::<T>::InsufficientStake);
            Self::do_sync(&mut pool)?;
            Self::settle_or_lock(pool_id, &pool, who, &mut pos)?;

            if amount > 0 {
                pos.amount = pos.amount.saturating_sub(amount);
                pool.staked = pool.staked.saturating_sub(amount);
                T::Assets::transfer(
                    pool.asset.clone(),
                    &Self::farm_account(),
                    who,
                    amount,
                    Preservation::Expendable,
                )?;
            }

            pos.reward_debt =
                reward_debt(pos.amount, pool.acc_reward_per_share).ok_or(Error::<T>::Overflow)?;
            Positions::<T>::insert(pool_id, who, pos);
            Pools::<T>::insert(pool_id, pool);
            if amount > 0 {
                Self::deposit_event(Event::Withdrawn { who: who.clone(), pool_id, amount });
            }
            Ok(())
        }

        fn with_entry_guard<R>(
            f: impl FnOnce() -> Result<R, DispatchError>,
        ) -> Result<R, DispatchError> {
            ensure!(!EntryGuard::<T>::get(), Error::<T>::ReentrantCall);
            EntryGuard::<T>::put(true);
            let res = f();
            EntryGuard::<T>::kill();
            res
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pallet as pallet_farming;
    use frame_support::{
        assert_noop, assert_ok, derive_impl,
        traits::{
            fungibles, fungibles::Mutate, AsEnsureOriginWithArg, ConstU128, ConstU32, ConstU64,
            Currency, ExistenceRequirement,
        },
    };
    use hearthfire_primitives::{Balance, RewardAsset, TokenLedger};
    use sp_runtime::{
        traits::{BadOrigin, IdentityLookup},
        AccountId32, BuildStorage, DispatchResult,
    };

    type Block = frame_system::mocking::MockBlock<Test>;
    type AccountId = AccountId32;

    const HEARTH_ASSET: u32 = 1;
    const LP_A: u32 = 2;
    const LP_B: u32 = 3;

    frame_support::construct_runtime!(
        pub enum Test {
            System: frame_system,
            Balances: pallet_balances,
            Assets: pallet_assets,
            VoteWeight: pallet_vote_weight,
            EmberToken: pallet_ember_token,
            EmberPool: pallet_ember_pool,
            Farming: pallet_farming,
        }
    );

    #[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
    impl frame_system::Config for Test {
        type Block = Block;
        type AccountId = AccountId;
        type Lookup = IdentityLookup<AccountId>;
        type AccountData = pallet_balances::AccountData<u128>;
    }

    #[derive_impl(pallet_balances::config_preludes::TestDefaultConfig)]
    impl pallet_balances::Config for Test {
        type Balance = u128;
        type AccountStore = System;
        type ExistentialDeposit = ConstU128<1>;
    }

    impl pallet_assets::Config for Test {
        type RuntimeEvent = RuntimeEvent;
        type Balance = u128;
        type AssetId = u32;
        type AssetIdParameter = codec::Compact<u32>;
        type Currency = Balances;
        type CreateOrigin = AsEnsureOriginWithArg<frame_system::EnsureSigned<AccountId>>;
        type ForceOrigin = frame_system::EnsureRoot<AccountId>;
        type AssetDeposit = ConstU128<0>;
        type AssetAccountDeposit = ConstU128<0>;
        type MetadataDepositBase = ConstU128<0>;
        type MetadataDepositPerByte = ConstU128<0>;
        type ApprovalDeposit = ConstU128<0>;
        type StringLimit = ConstU32<50>;
        type Freezer = ();
        type Extra = ();
        type CallbackHandle = ();
        type WeightInfo = ();
        type RemoveItemsLimit = ConstU32<5>;
        #[cfg(feature = "runtime-benchmarks")]
        type BenchmarkHelper = ();
    }

    impl pallet_vote_weight::Config for Test {
        type RuntimeEvent = RuntimeEvent;
        type Holdings = EmberToken;
        type OffchainSignature = sp_runtime::MultiSignature;
        type OffchainPublic = sp_runtime::MultiSigner;
    }

    impl pallet_ember_token::Config for Test {
        type RuntimeEvent = RuntimeEvent;
        type AdminOrigin = frame_system::EnsureRoot<AccountId>;
        type HearthLedger = HearthAdapter;
        type Votes = VoteWeight;
        type SecondaryPool = EmberPool;
        type PenaltyWindow = ConstU64<100>;
    }

    impl pallet_ember_pool::Config for Test {
        type RuntimeEvent = RuntimeEvent;
        type AdminOrigin = frame_system::EnsureRoot<AccountId>;
        type StakeLedger = EmberToken;
        type RewardLedger = HearthAdapter;
        type RewardPerBlock = ConstU128<10>;
    }

    impl pallet_farming::Config for Test {
        type RuntimeEvent = RuntimeEvent;
        type AdminOrigin = frame_system::EnsureRoot<AccountId>;
        type Assets = Assets;
        type HearthAssetId = ConstU32<HEARTH_ASSET>;
        type HearthLedger = HearthAdapter;
        type EmberLedger = EmberToken;
    }

    /// HEARTH ledger backed by pallet-balances, with a transfer tax rate
    /// reported for deposit accounting but not levied by the mock currency.
    pub struct HearthAdapter;
    impl TokenLedger<AccountId> for HearthAdapter {
        fn mint_to(who: &AccountId, amount: Balance) -> DispatchResult {
            let _ = Balances::deposit_creating(who, amount);
            Ok(())
        }

        fn transfer(from: &AccountId, to: &AccountId, amount: Balance) -> DispatchResult {
            <Balances as Currency<AccountId>>::transfer(
                from,
                to,
                amount,
                ExistenceRequirement::AllowDeath,
            )
        }

        fn balance_of(who: &AccountId) -> Balance {
            Balances::free_balance(who)
        }

        fn transfer_tax_bp() -> u32 {
            200
        }
    }

    fn acct(n: u8) -> AccountId {
        AccountId32::new([n; 32])
    }

    fn alice() -> AccountId {
        acct(1)
    }

    fn bob() -> AccountId {
        acct(2)
    }

    fn admin() -> AccountId {
        acct(99)
    }

    fn asset_balance(asset: u32, who: &AccountId) -> Balance {
        <Assets as fungibles::Inspect<AccountId>>::balance(asset, who)
    }

    fn give_asset(asset: u32, who: &AccountId, amount: Balance) {
        assert_ok!(<Assets as Mutate<AccountId>>::mint_into(asset, who, amount));
    }

    fn new_test_ext() -> sp_io::TestExternalities {
        let t = frame_system::GenesisConfig::<Test>::default().build_storage().unwrap();
        let mut ext: sp_io::TestExternalities = t.into();
        ext.execute_with(|| {
            System::set_block_number(1);
            for asset in [HEARTH_ASSET, LP_A, LP_B] {
                assert_ok!(Assets::force_create(
                    RuntimeOrigin::root(),
                    asset.into(),
                    admin(),
                    true,
                    1,
                ));
            }
            assert_ok!(Farming::set_emission_rate(RuntimeOrigin::root(), 10));
        });
        ext
    }

    fn add_default_pool(asset: u32, weight: u64) -> u32 {
        let pool_id = Farming::pool_count();
        assert_ok!(Farming::add_pool(
            RuntimeOrigin::root(),
            asset,
            weight,
            0,
            0,
            RewardAsset::Hearth,
        ));
        pool_id
    }

    #[test]
    fn add_pool_enforces_bounds_and_admin() {
        new_test_ext().execute_with(|| {
            assert_noop!(
                Farming::add_pool(
                    RuntimeOrigin::signed(alice()),
                    LP_A,
                    100,
                    0,
                    0,
                    RewardAsset::Hearth,
                ),
                BadOrigin
            );
            assert_noop!(
                Farming::add_pool(RuntimeOrigin::root(), LP_A, 100, 401, 0, RewardAsset::Hearth),
                pallet::Error::<Test>::ExcessiveDepositFee
            );
            assert_noop!(
                Farming::add_pool(
                    RuntimeOrigin::root(),
                    LP_A,
                    100,
                    0,
                    201_601,
                    RewardAsset::Hearth,
                ),
                pallet::Error::<Test>::ExcessiveLockup
            );

            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                LP_A,
                100,
                400,
                201_600,
                RewardAsset::Hearth,
            ));
            assert_eq!(Farming::pool_count(), 1);
            assert_eq!(Farming::total_alloc_weight(), 100);

            assert_noop!(
                Farming::add_pool(RuntimeOrigin::root(), LP_A, 50, 0, 0, RewardAsset::Hearth),
                pallet::Error::<Test>::DuplicateStakeAsset
            );
        });
    }

    #[test]
    fn single_staker_accrues_net_emission() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(6);
            // 5 blocks at rate 10, sole pool: gross 50, skim 5, net 45.
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 45);

            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));
            assert_eq!(Balances::free_balance(alice()), 45);
            assert_eq!(Balances::free_balance(Farming::ops_account()), 2);
            assert_eq!(Balances::free_balance(Farming::burn_account()), 3);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 0);
        });
    }

    #[test]
    fn emission_splits_across_pools_by_weight() {
        new_test_ext().execute_with(|| {
            assert_ok!(Farming::set_emission_rate(RuntimeOrigin::root(), 40));
            let pool_a = add_default_pool(LP_A, 300);
            let pool_b = add_default_pool(LP_B, 100);
            give_asset(LP_A, &alice(), 1_000);
            give_asset(LP_B, &bob(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_a, 1_000));
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(bob()), pool_b, 1_000));

            System::set_block_number(6);
            // Pool A: 5 * 40 * 300/400 = 150 gross, 135 net.
            // Pool B: 5 * 40 * 100/400 = 50 gross, 45 net.
            assert_eq!(Farming::pending_reward(pool_a, &alice()), 135);
            assert_eq!(Farming::pending_reward(pool_b, &bob()), 45);
        });
    }

    #[test]
    fn deposit_fee_goes_to_fee_account() {
        new_test_ext().execute_with(|| {
            let pool_id = Farming::pool_count();
            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                LP_A,
                100,
                400,
                0,
                RewardAsset::Hearth,
            ));
            give_asset(LP_A, &alice(), 10_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 10_000));

            assert_eq!(Farming::positions(pool_id, alice()).amount, 9_600);
            assert_eq!(Farming::pools(pool_id).unwrap().staked, 9_600);
            assert_eq!(asset_balance(LP_A, &Farming::fee_account()), 400);
            assert_eq!(asset_balance(LP_A, &Farming::farm_account()), 9_600);

            let event = System::events().pop().expect("expected event").event;
            assert!(matches!(
                event,
                RuntimeEvent::Farming(pallet::Event::Deposited { amount: 9_600, .. })
            ));
        });
    }

    #[test]
    fn hearth_deposits_credited_net_of_transfer_tax() {
        new_test_ext().execute_with(|| {
            let pool_id = Farming::pool_count();
            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                HEARTH_ASSET,
                100,
                100,
                0,
                RewardAsset::Hearth,
            ));
            give_asset(HEARTH_ASSET, &alice(), 10_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 10_000));

            // Tax 200 bp leaves 9_800, then the 100 bp fee takes 98.
            assert_eq!(Farming::positions(pool_id, alice()).amount, 9_702);
            assert_eq!(Farming::pools(pool_id).unwrap().staked, 9_702);
            assert_eq!(asset_balance(HEARTH_ASSET, &Farming::fee_account()), 98);
        });
    }

    #[test]
    fn lockup_parks_rewards_until_harvestable() {
        new_test_ext().execute_with(|| {
            let pool_id = Farming::pool_count();
            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                LP_A,
                100,
                0,
                10,
                RewardAsset::Hearth,
            ));
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));
            assert_eq!(Farming::positions(pool_id, alice()).next_harvest, 11);

            System::set_block_number(4);
            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));
            assert_eq!(Farming::positions(pool_id, alice()).locked_reward, 27);
            assert_eq!(Balances::free_balance(alice()), 0);

            System::set_block_number(8);
            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));
            assert_eq!(Farming::positions(pool_id, alice()).locked_reward, 63);
            assert_eq!(Balances::free_balance(alice()), 0);

            System::set_block_number(11);
            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));
            let pos = Farming::positions(pool_id, alice());
            assert_eq!(Balances::free_balance(alice()), 90);
            assert_eq!(pos.locked_reward, 0);
            assert_eq!(pos.next_harvest, 21);
        });
    }

    #[test]
    fn payout_capped_by_reward_float() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(11);
            assert_ok!(Farming::sync_pool(RuntimeOrigin::signed(alice()), pool_id));
            // 90 owed, but only 30 left in the float.
            Balances::make_free_balance_be(&Farming::farm_account(), 30);
            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));

            assert_eq!(Balances::free_balance(alice()), 30);
            assert_eq!(Farming::positions(pool_id, alice()).locked_reward, 0);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 0);
            let event = System::events().pop().expect("expected event").event;
            assert!(matches!(
                event,
                RuntimeEvent::Farming(pallet::Event::RewardPaid { amount: 30, .. })
            ));
        });
    }

    #[test]
    fn emergency_withdraw_forfeits_rewards() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(6);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 45);
            assert_ok!(Farming::emergency_withdraw(RuntimeOrigin::signed(alice()), pool_id));

            assert_eq!(asset_balance(LP_A, &alice()), 1_000);
            assert_eq!(Balances::free_balance(alice()), 0);
            assert_eq!(Farming::positions(pool_id, alice()), Default::default());
            assert_eq!(Farming::pools(pool_id).unwrap().staked, 0);
            // Nothing was synced, so nothing was minted either.
            assert_eq!(Balances::free_balance(Farming::farm_account()), 0);
        });
    }

    #[test]
    fn withdraw_returns_stake_and_pays_rewards() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(6);
            assert_noop!(
                Farming::withdraw(RuntimeOrigin::signed(alice()), pool_id, 1_001),
                pallet::Error::<Test>::InsufficientStake
            );
            assert_ok!(Farming::withdraw(RuntimeOrigin::signed(alice()), pool_id, 400));

            assert_eq!(asset_balance(LP_A, &alice()), 400);
            assert_eq!(Balances::free_balance(alice()), 45);
            assert_eq!(Farming::positions(pool_id, alice()).amount, 600);
            assert_eq!(Farming::pools(pool_id).unwrap().staked, 600);

            // Remaining stake keeps accruing on the reduced base.
            System::set_block_number(8);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 18);
        });
    }

    #[test]
    fn unknown_pool_rejected() {
        new_test_ext().execute_with(|| {
            assert_noop!(
                Farming::deposit(RuntimeOrigin::signed(alice()), 7, 100),
                pallet::Error::<Test>::UnknownPool
            );
            assert_noop!(
                Farming::sync_pool(RuntimeOrigin::signed(alice()), 7),
                pallet::Error::<Test>::UnknownPool
            );
        });
    }

    #[test]
    fn set_pool_adjusts_total_weight() {
        new_test_ext().execute_with(|| {
            let pool_a = add_default_pool(LP_A, 100);
            let _pool_b = add_default_pool(LP_B, 300);
            assert_eq!(Farming::total_alloc_weight(), 400);

            assert_ok!(Farming::set_pool(
                RuntimeOrigin::root(),
                pool_a,
                200,
                0,
                0,
                RewardAsset::Hearth,
            ));
            assert_eq!(Farming::total_alloc_weight(), 500);
            assert_eq!(Farming::pools(pool_a).unwrap().alloc_weight, 200);

            assert_noop!(
                Farming::set_pool(RuntimeOrigin::root(), 9, 1, 0, 0, RewardAsset::Hearth),
                pallet::Error::<Test>::UnknownPool
            );
        });
    }

    #[test]
    fn weight_change_syncs_old_split_first() {
        new_test_ext().execute_with(|| {
            assert_ok!(Farming::set_emission_rate(RuntimeOrigin::root(), 40));
            let pool_a = add_default_pool(LP_A, 100);
            let pool_b = add_default_pool(LP_B, 100);
            give_asset(LP_A, &alice(), 1_000);
            give_asset(LP_B, &bob(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_a, 1_000));
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(bob()), pool_b, 1_000));

            // 5 blocks at an even split: 100 gross each, 90 net each.
            System::set_block_number(6);
            assert_ok!(Farming::set_pool(
                RuntimeOrigin::root(),
                pool_a,
                300,
                0,
                0,
                RewardAsset::Hearth,
            ));

            // 5 more blocks at 3:1: pool A 150 gross / 135 net, pool B 50 / 45.
            System::set_block_number(11);
            assert_eq!(Farming::pending_reward(pool_a, &alice()), 90 + 135);
            assert_eq!(Farming::pending_reward(pool_b, &bob()), 90 + 45);
        });
    }

    #[test]
    fn idle_pools_only_advance_their_marker() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);

            // No stake: sync advances the marker without touching the accumulator.
            System::set_block_number(5);
            assert_ok!(Farming::sync_pool(RuntimeOrigin::signed(alice()), pool_id));
            let pool = Farming::pools(pool_id).unwrap();
            assert_eq!(pool.last_synced, 5);
            assert_eq!(pool.acc_reward_per_share, 0);

            // Zero weight: stake present but no emission share.
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));
            assert_ok!(Farming::set_pool(
                RuntimeOrigin::root(),
                pool_id,
                0,
                0,
                0,
                RewardAsset::Hearth,
            ));
            System::set_block_number(10);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 0);
            assert_ok!(Farming::sync_pool(RuntimeOrigin::signed(alice()), pool_id));
            let pool = Farming::pools(pool_id).unwrap();
            assert_eq!(pool.last_synced, 10);
            assert_eq!(pool.acc_reward_per_share, 0);
        });
    }

    #[test]
    fn sync_is_idempotent_within_a_block() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(6);
            assert_ok!(Farming::sync_pool(RuntimeOrigin::signed(alice()), pool_id));
            let acc = Farming::pools(pool_id).unwrap().acc_reward_per_share;
            assert_ok!(Farming::sync_pool(RuntimeOrigin::signed(alice()), pool_id));
            assert_ok!(Farming::sync_all_pools(RuntimeOrigin::signed(alice())));
            assert_eq!(Farming::pools(pool_id).unwrap().acc_reward_per_share, acc);
            assert_eq!(Balances::free_balance(Farming::farm_account()), 45);
        });
    }

    #[test]
    fn start_block_gates_accrual() {
        new_test_ext().execute_with(|| {
            assert_ok!(Farming::set_start_block(RuntimeOrigin::root(), 100));
            let pool_id = add_default_pool(LP_A, 100);
            assert_eq!(Farming::pools(pool_id).unwrap().last_synced, 100);

            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(50);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 0);

            System::set_block_number(110);
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 90);

            assert_noop!(
                Farming::set_start_block(RuntimeOrigin::root(), 200),
                pallet::Error::<Test>::PoolsAlreadyOpen
            );
        });
    }

    #[test]
    fn rate_change_applies_from_its_block() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(6);
            assert_ok!(Farming::set_emission_rate(RuntimeOrigin::root(), 100));
            System::set_block_number(11);

            // 5 blocks at net 9 plus 5 blocks at net 90.
            assert_eq!(Farming::pending_reward(pool_id, &alice()), 45 + 450);
        });
    }

    #[test]
    fn skim_and_fee_destinations_can_be_redirected() {
        new_test_ext().execute_with(|| {
            assert_noop!(
                Farming::set_ops_address(RuntimeOrigin::signed(alice()), acct(50)),
                BadOrigin
            );
            assert_ok!(Farming::set_ops_address(RuntimeOrigin::root(), acct(50)));
            assert_ok!(Farming::set_fee_address(RuntimeOrigin::root(), acct(51)));

            let pool_id = Farming::pool_count();
            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                LP_A,
                100,
                400,
                0,
                RewardAsset::Hearth,
            ));
            give_asset(LP_A, &alice(), 10_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 10_000));

            System::set_block_number(6);
            assert_ok!(Farming::sync_pool(RuntimeOrigin::signed(alice()), pool_id));
            assert_eq!(asset_balance(LP_A, &acct(51)), 400);
            assert_eq!(Balances::free_balance(acct(50)), 2);
        });
    }

    #[test]
    fn ember_pools_mint_through_the_ember_ledger() {
        new_test_ext().execute_with(|| {
            let pool_id = Farming::pool_count();
            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                LP_A,
                100,
                0,
                0,
                RewardAsset::Ember,
            ));
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));
            assert_ok!(VoteWeight::delegate(RuntimeOrigin::signed(alice()), alice()));

            System::set_block_number(6);
            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));

            assert_eq!(pallet_ember_token::Balances::<Test>::get(alice()), 45);
            assert_eq!(Balances::free_balance(alice()), 0);
            // Harvested EMBER lands in the delegate's checkpointed weight.
            assert_eq!(VoteWeight::current_votes(&alice()), 45);
        });
    }

    #[test]
    fn harvested_ember_swaps_and_settles_the_ember_pool() {
        new_test_ext().execute_with(|| {
            let pool_id = Farming::pool_count();
            assert_ok!(Farming::add_pool(
                RuntimeOrigin::root(),
                LP_A,
                100,
                0,
                0,
                RewardAsset::Ember,
            ));
            give_asset(LP_A, &alice(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));

            System::set_block_number(6);
            assert_ok!(Farming::harvest(RuntimeOrigin::signed(alice()), pool_id));
            assert_eq!(pallet_ember_token::Balances::<Test>::get(alice()), 45);

            // Stake the harvested EMBER in the secondary pool, with a funded
            // float and an open window.
            let _ = Balances::deposit_creating(&EmberPool::pool_account(), 1_000);
            assert_ok!(EmberPool::set_emission_window(RuntimeOrigin::root(), 6, 100));
            assert_ok!(EmberPool::deposit(RuntimeOrigin::signed(alice()), 40));

            // Swapping the rest settles the secondary position in passing.
            System::set_block_number(11);
            assert_ok!(EmberToken::swap_to_hearth(RuntimeOrigin::signed(alice()), 5));
            let pos = EmberPool::positions(alice());
            assert_eq!(pos.amount, 40);
            // 4 from the swap (28.5% penalty at age 5 of 100) plus 5 blocks
            // of secondary emission paid by the settlement.
            assert_eq!(Balances::free_balance(alice()), 54);
        });
    }

    #[test]
    fn positions_sum_matches_pool_stake() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 2_000);
            give_asset(LP_A, &bob(), 1_000);
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_500));
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(bob()), pool_id, 700));
            System::set_block_number(4);
            assert_ok!(Farming::withdraw(RuntimeOrigin::signed(alice()), pool_id, 900));

            let total: Balance = [alice(), bob()]
                .iter()
                .map(|who| Farming::positions(pool_id, who).amount)
                .sum();
            assert_eq!(Farming::pools(pool_id).unwrap().staked, total);
            assert_eq!(total, 1_300);
        });
    }

    #[test]
    fn reentrancy_is_rejected() {
        new_test_ext().execute_with(|| {
            let pool_id = add_default_pool(LP_A, 100);
            give_asset(LP_A, &alice(), 1_000);

            pallet::EntryGuard::<Test>::put(true);
            assert_noop!(
                Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000),
                pallet::Error::<Test>::ReentrantCall
            );
            assert_noop!(
                Farming::set_emission_rate(RuntimeOrigin::root(), 1),
                pallet::Error::<Test>::ReentrantCall
            );
            pallet::EntryGuard::<Test>::kill();
            assert_ok!(Farming::deposit(RuntimeOrigin::signed(alice()), pool_id, 1_000));
        });
    }
}
