//! Single-pool EMBER staking paying HEARTH inside a bounded window.
//!
//! Constant per-block emission, gated to `[window_start, window_end]`.
//! Rewards come from the pool account's pre-funded HEARTH balance, so
//! the pallet tracks what it has promised (`AccruedRewards`) and caps
//! admin surplus withdrawals at whatever exceeds that.

#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[frame_support::pallet]
pub mod pallet {
    use frame_support::{pallet_prelude::*, PalletId};
    use frame_system::pallet_prelude::*;
    use hearthfire_primitives::{
        accrue_per_share, emission_overlap, reward_debt, Balance, PoolSettlement, TokenLedger,
    };
    use sp_runtime::traits::{AccountIdConversion, SaturatedConversion};

    /// Custody account for staked EMBER and the HEARTH reward float.
    pub const POOL_ID: PalletId = PalletId(*b"embrpool");

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Origin allowed to move the window and skim surplus.
        type AdminOrigin: EnsureOrigin<Self::RuntimeOrigin>;

        /// The EMBER ledger stake is custodied in.
        type StakeLedger: TokenLedger<Self::AccountId>;

        /// The HEARTH ledger rewards are paid from.
        type RewardLedger: TokenLedger<Self::AccountId>;

        /// HEARTH accrued per block while the window is open.
        #[pallet::constant]
        type RewardPerBlock: Get<Balance>;
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    /// Accrual state of the single pool.
    #[derive(
        Encode, Decode, Clone, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen, Default,
    )]
    pub struct PoolState<BlockNumber> {
        pub staked: Balance,
        pub acc_reward_per_share: Balance,
        pub last_synced: BlockNumber,
        pub window_start: BlockNumber,
        pub window_end: BlockNumber,
    }

    /// One staker's stake and settlement baseline.
    #[derive(
        Encode, Decode, Clone, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen, Default,
    )]
    pub struct PoolPosition {
        pub amount: Balance,
        pub reward_debt: Balance,
    }

    #[pallet::storage]
    #[pallet::getter(fn pool)]
    pub type Pool<T: Config> = StorageValue<_, PoolState<BlockNumberFor<T>>, ValueQuery>;

    #[pallet::storage]
    #[pallet::getter(fn positions)]
    pub type Positions<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AccountId, PoolPosition, ValueQuery>;

    /// HEARTH folded into the accumulator and not yet paid out.
    #[pallet::storage]
    #[pallet::getter(fn accrued_rewards)]
    pub type AccruedRewards<T: Config> = StorageValue<_, Balance, ValueQuery>;

    /// Set while a mutating call is in flight.
    #[pallet::storage]
    pub type EntryGuard<T: Config> = StorageValue<_, bool, ValueQuery>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// Stake entered the pool (zero amount is a pure settlement).
        Deposited { who: T::AccountId, amount: Balance },
        /// Stake left the pool.
        Withdrawn { who: T::AccountId, amount: Balance },
        /// Stake left the pool without settlement, forfeiting rewards.
        EmergencyWithdrawn { who: T::AccountId, amount: Balance },
        /// Pending HEARTH was paid out.
        RewardPaid { who: T::AccountId, amount: Balance },
        /// The emission window moved forward.
        WindowMoved {
            start: BlockNumberFor<T>,
            end: BlockNumberFor<T>,
        },
        /// Un-promised HEARTH left the pool account.
        SurplusWithdrawn { to: T::AccountId, amount: Balance },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// Withdraw amount exceeds the staked balance.
        InsufficientStake,
        /// Window start must not exceed window end.
        InvalidWindow,
        /// The emission window can only move forward.
        WindowMovedBack,
        /// Requested surplus dips into rewards owed to stakers.
        InsufficientSurplus,
        /// Accrual arithmetic overflowed.
        Overflow,
        /// Settlement baseline exceeds earned rewards.
        RewardUnderflow,
        /// A mutating call re-entered the ledger.
        ReentrantCall,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Stake `amount` EMBER. Settles pending HEARTH first; zero is
        /// a pure settlement.
        #[pallet::call_index(0)]
        #[pallet::weight(Weight::from_parts(50_000, 0))]
        pub fn deposit(origin: OriginFor<T>, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_deposit(&who, amount))
        }

        /// Unstake `amount` EMBER, settling pending HEARTH first.
        #[pallet::call_index(1)]
        #[pallet::weight(Weight::from_parts(50_000, 0))]
        pub fn withdraw(origin: OriginFor<T>, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_withdraw(&who, amount))
        }

        /// Recover stake without any reward settlement.
        #[pallet::call_index(2)]
        #[pallet::weight(Weight::from_parts(40_000, 0))]
        pub fn emergency_withdraw(origin: OriginFor<T>) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| {
                let mut pool = Pool::<T>::get();
                let pos = Positions::<T>::take(&who);
                pool.staked = pool.staked.saturating_sub(pos.amount);
                if pos.amount > 0 {
                    T::StakeLedger::transfer(&Self::pool_account(), &who, pos.amount)?;
                }
                Pool::<T>::put(pool);
                Self::deposit_event(Event::EmergencyWithdrawn {
                    who: who.clone(),
                    amount: pos.amount,
                });
                Ok(())
            })
        }

        /// Move the emission window. Forward only, sync first.
        #[pallet::call_index(3)]
        #[pallet::weight(Weight::from_parts(30_000, 0))]
        pub fn set_emission_window(
            origin: OriginFor<T>,
            start: BlockNumberFor<T>,
            end: BlockNumberFor<T>,
        ) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                let mut pool = Pool::<T>::get();
                Self::sync_pool(&mut pool)?;
                ensure!(start <= end, Error::<T>::InvalidWindow);
                ensure!(
                    start >= pool.window_start && end >= pool.window_end,
                    Error::<T>::WindowMovedBack
                );
                pool.window_start = start;
                pool.window_end = end;
                Pool::<T>::put(pool);
                Self::deposit_event(Event::WindowMoved { start, end });
                Ok(())
            })
        }

        /// Withdraw HEARTH the pool holds beyond what it owes stakers.
        #[pallet::call_index(4)]
        #[pallet::weight(Weight::from_parts(40_000, 0))]
        pub fn withdraw_surplus(
            origin: OriginFor<T>,
            to: T::AccountId,
            amount: Balance,
        ) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| {
                let mut pool = Pool::<T>::get();
                Self::sync_pool(&mut pool)?;
                Pool::<T>::put(pool);

                let held = T::RewardLedger::balance_of(&Self::pool_account());
                let available = held.saturating_sub(AccruedRewards::<T>::get());
                ensure!(amount <= available, Error::<T>::InsufficientSurplus);

                T::RewardLedger::transfer(&Self::pool_account(), &to, amount)?;
                Self::deposit_event(Event::SurplusWithdrawn {
                    to: to.clone(),
                    amount,
                });
                Ok(())
            })
        }
    }

    impl<T: Config> Pallet<T> {
        pub fn pool_account() -> T::AccountId {
            POOL_ID.into_account_truncating()
        }

        /// Pending HEARTH for `who` as of the current block.
        pub fn pending_reward(who: &T::AccountId) -> Balance {
            let pool = Pool::<T>::get();
            let pos = Positions::<T>::get(who);
            if pos.amount == 0 {
                return 0;
            }
            let mut acc = pool.acc_reward_per_share;
            let now = frame_system::Pallet::<T>::block_number();
            if now > pool.last_synced && pool.staked > 0 {
                let overlap = Self::window_overlap(&pool, now);
                if let Some(reward) = T::RewardPerBlock::get().checked_mul(overlap as u128) {
                    acc = accrue_per_share(acc, reward, pool.staked).unwrap_or(acc);
                }
            }
            reward_debt(pos.amount, acc)
                .and_then(|earned| earned.checked_sub(pos.reward_debt))
                .unwrap_or(0)
        }

        fn window_overlap(pool: &PoolState<BlockNumberFor<T>>, now: BlockNumberFor<T>) -> u64 {
            emission_overlap(
                pool.last_synced.saturated_into::<u64>(),
                now.saturated_into::<u64>(),
                pool.window_start.saturated_into::<u64>(),
                pool.window_end.saturated_into::<u64>(),
            )
        }

        /// Fold window-gated emission into the accumulator and advance
        /// `last_synced`. Idempotent within a block.
        fn sync_pool(pool: &mut PoolState<BlockNumberFor<T>>) -> DispatchResult {
            let now = frame_system::Pallet::<T>::block_number();
            if now <= pool.last_synced {
                return Ok(());
            }
            if pool.staked > 0 {
                let overlap = Self::window_overlap(pool, now);
                if overlap > 0 {
                    let reward = T::RewardPerBlock::get()
                        .checked_mul(overlap as u128)
                        .ok_or(Error::<T>::Overflow)?;
                    pool.acc_reward_per_share =
                        accrue_per_share(pool.acc_reward_per_share, reward, pool.staked)
                            .ok_or(Error::<T>::Overflow)?;
                    AccruedRewards::<T>::mutate(|r| *r = r.saturating_add(reward));
                }
            }
            pool.last_synced = now;
            Ok(())
        }

        /// Pay out whatever `pos` has earned beyond its baseline.
        fn pay_pending(
            pool: &PoolState<BlockNumberFor<T>>,
            pos: &PoolPosition,
            who: &T::AccountId,
        ) -> DispatchResult {
            if pos.amount == 0 {
                return Ok(());
            }
            let earned =
                reward_debt(pos.amount, pool.acc_reward_per_share).ok_or(Error::<T>::Overflow)?;
            let pending = earned
                .checked_sub(pos.reward_debt)
                .ok_or(Error::<T>::RewardUnderflow)?;
            if pending > 0 {
                T::RewardLedger::transfer(&Self::pool_account(), who, pending)?;
                AccruedRewards::<T>::mutate(|r| *r = r.saturating_sub(pending));
                Self::deposit_event(Event::RewardPaid {
                    who: who.clone(),
                    amount: pending,
                });
            }
            Ok(())
        }

        fn do_deposit(who: &T::AccountId, amount: Balance) -> DispatchResult {
            let mut pool = Pool::<T>::get();
            Self::sync_pool(&mut pool)?;
            let mut pos = Positions::<T>::get(who);
            Self::pay_pending(&pool, &pos, who)?;

            if amount > 0 {
                T::StakeLedger::transfer(who, &Self::pool_account(), amount)?;
                pos.amount = pos.amount.checked_add(amount).ok_or(Error::<T>::Overflow)?;
                pool.staked = pool.staked.checked_add(amount).ok_or(Error::<T>::Overflow)?;
            }

            pos.reward_debt =
                reward_debt(pos.amount, pool.acc_reward_per_share).ok_or(Error::<T>::Overflow)?;
            Positions::<T>::insert(who, pos);
            Pool::<T>::put(pool);
            Self::deposit_event(Event::Deposited {
                who: who.clone(),
                amount,
            });
            Ok(())
        }

        fn do_withdraw(who: &T::AccountId, amount: Balance) -> DispatchResult {
            let mut pool = Pool::<T>::get();
            let mut pos = Positions::<T>::get(who);
            ensure!(amount <= pos.amount, Error::<T>::InsufficientStake);
            Self::sync_pool(&mut pool)?;
            Self::pay_pending(&pool, &pos, who)?;

            if amount > 0 {
                pos.amount = pos.amount.saturating_sub(amount);
                pool.staked = pool.staked.saturating_sub(amount);
                T::StakeLedger::transfer(&Self::pool_account(), who, amount)?;
            }

            pos.reward_debt =
                reward_debt(pos.amount, pool.acc_reward_per_share).ok_or(Error::<T>::Overflow)?;
            Positions::<T>::insert(who, pos);
            Pool::<T>::put(pool);
            Self::deposit_event(Event::Withdrawn {
                who: who.clone(),
                amount,
            });
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

    impl<T: Config> PoolSettlement<T::AccountId> for Pallet<T> {
        fn settle(who: &T::AccountId) -> DispatchResult {
            Self::with_entry_guard(|| Self::do_deposit(who, 0))
        }
    }
}
