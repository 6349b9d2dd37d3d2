//! EMBER, the penalty-bearing token.
//!
//! A balance ledger whose every mutation refreshes the holder's
//! effective acquisition block. Holding age prices `swap_to_hearth`:
//! young EMBER converts at up to `MAX_PENALTY` discount, decaying
//! linearly to parity over the configured penalty window. Every
//! balance change also pushes a voting-checkpoint update.

#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[frame_support::pallet]
pub mod pallet {
    use frame_support::{pallet_prelude::*, PalletId};
    use frame_system::pallet_prelude::*;
    use hearthfire_primitives::{
        apply_penalty, blended_acquisition, penalty_rate, Balance, HoldingBalance, PoolSettlement,
        TokenLedger, VoteHook,
    };
    use sp_runtime::traits::{AccountIdConversion, SaturatedConversion, Saturating, Zero};

    /// Account swapped EMBER is parked in.
    pub const BURN_SINK: PalletId = PalletId(*b"embrsink");

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Origin allowed to mint fresh EMBER.
        type AdminOrigin: EnsureOrigin<Self::RuntimeOrigin>;

        /// Primary-token ledger conversions mint into.
        type HearthLedger: TokenLedger<Self::AccountId>;

        /// Checkpoint propagation for every balance change.
        type Votes: VoteHook<Self::AccountId>;

        /// Secondary pool settled after each conversion.
        type SecondaryPool: PoolSettlement<Self::AccountId>;

        /// Blocks over which the conversion penalty decays to zero.
        #[pallet::constant]
        type PenaltyWindow: Get<BlockNumberFor<Self>>;
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    // ===== STORAGE =====

    /// EMBER balance per account.
    #[pallet::storage]
    pub type Balances<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AccountId, Balance, ValueQuery>;

    /// Total EMBER in circulation.
    #[pallet::storage]
    #[pallet::getter(fn total_supply)]
    pub type TotalSupply<T: Config> = StorageValue<_, Balance, ValueQuery>;

    /// Balance-weighted block at which each holder's EMBER counts as
    /// acquired. 0 reads as fully aged.
    #[pallet::storage]
    #[pallet::getter(fn acquired_at)]
    pub type AcquiredAt<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AccountId, BlockNumberFor<T>, ValueQuery>;

    /// Set while a mutating call is in flight.
    #[pallet::storage]
    pub type EntryGuard<T: Config> = StorageValue<_, bool, ValueQuery>;

    // ===== EVENTS / ERRORS =====

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// EMBER moved between accounts.
        Transferred {
            from: T::AccountId,
            to: T::AccountId,
            amount: Balance,
        },
        /// Fresh EMBER entered circulation.
        Minted { to: T::AccountId, amount: Balance },
        /// EMBER left circulation.
        Burned { from: T::AccountId, amount: Balance },
        /// EMBER converted into HEARTH at the holder's penalty rate.
        SwappedToHearth {
            who: T::AccountId,
            burned: Balance,
            minted: Balance,
        },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// Balance too low for the requested amount.
        InsufficientBalance,
        /// Balance or supply arithmetic overflowed.
        Overflow,
        /// A mutating call re-entered the ledger.
        ReentrantCall,
    }

    // ===== CALLS =====

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Move `amount` EMBER from the caller to `to`.
        #[pallet::call_index(0)]
        #[pallet::weight(Weight::from_parts(35_000, 0))]
        pub fn transfer(origin: OriginFor<T>, to: T::AccountId, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_transfer(&who, &to, amount))
        }

        /// Destroy `amount` of the caller's EMBER.
        #[pallet::call_index(1)]
        #[pallet::weight(Weight::from_parts(30_000, 0))]
        pub fn burn(origin: OriginFor<T>, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_burn(&who, amount))
        }

        /// Convert `amount` EMBER into HEARTH at the caller's current
        /// penalty rate. The EMBER moves to the burn sink; the HEARTH
        /// mint is net of penalty; the caller's secondary-pool
        /// position is settled afterwards.
        #[pallet::call_index(2)]
        #[pallet::weight(Weight::from_parts(60_000, 0))]
        pub fn swap_to_hearth(origin: OriginFor<T>, amount: Balance) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_swap(&who, amount))
        }

        /// Mint fresh EMBER to `to`. Admin only.
        #[pallet::call_index(3)]
        #[pallet::weight(Weight::from_parts(30_000, 0))]
        pub fn mint(origin: OriginFor<T>, to: T::AccountId, amount: Balance) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin)?;
            Self::with_entry_guard(|| Self::do_mint(&to, amount))
        }
    }

    // ===== INTERNAL =====

    impl<T: Config> Pallet<T> {
        /// Current conversion penalty for `who` at 1e12 scale.
        pub fn penalty_rate_of(who: &T::AccountId) -> u128 {
            let now = frame_system::Pallet::<T>::block_number();
            let age = now
                .saturating_sub(AcquiredAt::<T>::get(who))
                .saturated_into::<u64>();
            penalty_rate(age, T::PenaltyWindow::get().saturated_into::<u64>())
        }

        /// HEARTH a swap of `amount` would mint for `who` right now.
        pub fn preview_swap(
            who: &T::AccountId,
            amount: Balance,
        ) -> Result<Balance, DispatchError> {
            ensure!(
                amount <= Balances::<T>::get(who),
                Error::<T>::InsufficientBalance
            );
            let converted =
                apply_penalty(amount, Self::penalty_rate_of(who)).ok_or(Error::<T>::Overflow)?;
            Ok(converted)
        }

        pub fn burn_sink() -> T::AccountId {
            BURN_SINK.into_account_truncating()
        }

        fn do_mint(to: &T::AccountId, amount: Balance) -> DispatchResult {
            if amount.is_zero() {
                return Ok(());
            }
            let prior = Balances::<T>::get(to);
            let next = prior.checked_add(amount).ok_or(Error::<T>::Overflow)?;
            TotalSupply::<T>::try_mutate(|supply| -> DispatchResult {
                *supply = supply.checked_add(amount).ok_or(Error::<T>::Overflow)?;
                Ok(())
            })?;
            Self::stamp_received(to, prior, amount);
            Balances::<T>::insert(to, next);
            T::Votes::on_holding_changed(None, Some(to), amount)?;
            Self::deposit_event(Event::Minted {
                to: to.clone(),
                amount,
            });
            Ok(())
        }

        fn do_burn(who: &T::AccountId, amount: Balance) -> DispatchResult {
            if amount.is_zero() {
                return Ok(());
            }
            let remaining = Balances::<T>::get(who)
                .checked_sub(amount)
                .ok_or(Error::<T>::InsufficientBalance)?;
            Balances::<T>::insert(who, remaining);
            TotalSupply::<T>::mutate(|supply| *supply = supply.saturating_sub(amount));
            Self::stamp_spent(who, remaining);
            T::Votes::on_holding_changed(Some(who), None, amount)?;
            Self::deposit_event(Event::Burned {
                from: who.clone(),
                amount,
            });
            Ok(())
        }

        fn do_transfer(from: &T::AccountId, to: &T::AccountId, amount: Balance) -> DispatchResult {
            if amount.is_zero() || from == to {
                return Ok(());
            }
            let remaining = Balances::<T>::get(from)
                .checked_sub(amount)
                .ok_or(Error::<T>::InsufficientBalance)?;
            let to_prior = Balances::<T>::get(to);
            let to_next = to_prior.checked_add(amount).ok_or(Error::<T>::Overflow)?;

            Balances::<T>::insert(from, remaining);
            Balances::<T>::insert(to, to_next);
            Self::stamp_spent(from, remaining);
            Self::stamp_received(to, to_prior, amount);
            T::Votes::on_holding_changed(Some(from), Some(to), amount)?;
            Self::deposit_event(Event::Transferred {
                from: from.clone(),
                to: to.clone(),
                amount,
            });
            Ok(())
        }

        fn do_swap(who: &T::AccountId, amount: Balance) -> DispatchResult {
            let converted = Self::preview_swap(who, amount)?;
            Self::do_transfer(who, &Self::burn_sink(), amount)?;
            T::HearthLedger::mint_to(who, converted)?;
            T::SecondaryPool::settle(who)?;
            log::info!(
                target: "runtime::ember-token",
                "swap: {:?} burned {} EMBER for {} HEARTH",
                who,
                amount,
                converted
            );
            Self::deposit_event(Event::SwappedToHearth {
                who: who.clone(),
                burned: amount,
                minted: converted,
            });
            Ok(())
        }

        /// Mint-direction acquisition rule: first tokens stamp `now`,
        /// later tokens pull the stamp toward `now` by balance weight.
        fn stamp_received(who: &T::AccountId, prior: Balance, received: Balance) {
            let now = frame_system::Pallet::<T>::block_number();
            if prior.is_zero() {
                AcquiredAt::<T>::insert(who, now);
                return;
            }
            let blended = blended_acquisition(
                prior,
                AcquiredAt::<T>::get(who).saturated_into::<u64>(),
                received,
                now.saturated_into::<u64>(),
                T::PenaltyWindow::get().saturated_into::<u64>(),
            );
            AcquiredAt::<T>::insert(who, blended.saturated_into::<BlockNumberFor<T>>());
        }

        /// Withdraw-direction acquisition rule: a fully drained holder
        /// reads as maximally aged from then on.
        fn stamp_spent(who: &T::AccountId, remaining: Balance) {
            if remaining.is_zero() {
                AcquiredAt::<T>::insert(who, BlockNumberFor::<T>::zero());
            }
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

    impl<T: Config> TokenLedger<T::AccountId> for Pallet<T> {
        fn mint_to(who: &T::AccountId, amount: Balance) -> DispatchResult {
            Self::with_entry_guard(|| Self::do_mint(who, amount))
        }

        fn transfer(from: &T::AccountId, to: &T::AccountId, amount: Balance) -> DispatchResult {
            Self::with_entry_guard(|| Self::do_transfer(from, to, amount))
        }

        fn balance_of(who: &T::AccountId) -> Balance {
            Balances::<T>::get(who)
        }
    }

    impl<T: Config> HoldingBalance<T::AccountId> for Pallet<T> {
        fn holding(who: &T::AccountId) -> Balance {
            Balances::<T>::get(who)
        }
    }
}
