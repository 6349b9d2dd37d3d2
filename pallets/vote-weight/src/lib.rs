//! Checkpointed voting weight with delegation.
//!
//! Every holding change routed through [`VoteHook`] lands as a
//! `(block, weight)` checkpoint for the affected delegates, giving
//! governance a binary-searchable history of voting power.

#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[frame_support::pallet]
pub mod pallet {
    use frame_support::pallet_prelude::*;
    use frame_system::pallet_prelude::*;
    use hearthfire_primitives::{Balance, HoldingBalance, VoteHook};
    use sp_runtime::traits::{IdentifyAccount, Verify};

    /// Domain tag mixed into signed delegation payloads.
    pub const DELEGATION_TAG: [u8; 8] = *b"hf-votes";

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Balance surface a delegation is weighted by.
        type Holdings: HoldingBalance<Self::AccountId>;

        /// Off-chain signature scheme accepted by `delegate_by_sig`.
        type OffchainSignature: Verify<Signer = Self::OffchainPublic> + Parameter;

        /// Public key type behind `OffchainSignature`.
        type OffchainPublic: IdentifyAccount<AccountId = Self::AccountId>;
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    /// One delegate's voting weight as of one block.
    #[derive(Encode, Decode, Clone, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct Checkpoint<BlockNumber> {
        pub from_block: BlockNumber,
        pub votes: Balance,
    }

    /// Where each account's holding weight currently points.
    #[pallet::storage]
    #[pallet::getter(fn delegates)]
    pub type Delegates<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AccountId, T::AccountId, OptionQuery>;

    /// Append-only checkpoint history per delegate, indexed 0..count.
    #[pallet::storage]
    pub type Checkpoints<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        T::AccountId,
        Twox64Concat,
        u32,
        Checkpoint<BlockNumberFor<T>>,
        OptionQuery,
    >;

    /// Checkpoints recorded so far per delegate.
    #[pallet::storage]
    #[pallet::getter(fn checkpoint_count)]
    pub type CheckpointCount<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AccountId, u32, ValueQuery>;

    /// Strictly incrementing nonce consumed by `delegate_by_sig`.
    #[pallet::storage]
    #[pallet::getter(fn nonces)]
    pub type Nonces<T: Config> = StorageMap<_, Blake2_128Concat, T::AccountId, u64, ValueQuery>;

    /// Set while a mutating call is in flight.
    #[pallet::storage]
    pub type EntryGuard<T: Config> = StorageValue<_, bool, ValueQuery>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// An account pointed its weight at a new delegate.
        DelegateChanged {
            delegator: T::AccountId,
            from: Option<T::AccountId>,
            to: T::AccountId,
        },
        /// A delegate's checkpointed weight moved.
        DelegateVotesChanged {
            delegate: T::AccountId,
            previous: Balance,
            votes: Balance,
        },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// Historical queries must target a block strictly before now.
        BlockNotPast,
        /// The signed delegation expired.
        SignatureExpired,
        /// The signature does not match the claimed signer.
        InvalidSignature,
        /// The nonce is not the signer's next expected nonce.
        StaleNonce,
        /// A delegate's weight would go negative.
        WeightUnderflow,
        /// A delegate's weight would overflow.
        WeightOverflow,
        /// A mutating call re-entered the ledger.
        ReentrantCall,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Point the caller's holding weight at `to`.
        #[pallet::call_index(0)]
        #[pallet::weight(Weight::from_parts(20_000, 0))]
        pub fn delegate(origin: OriginFor<T>, to: T::AccountId) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::with_entry_guard(|| Self::do_delegate(&who, &to))
        }

        /// Delegate on behalf of `signer`, authorized by a signature
        /// over `(DELEGATION_TAG, delegatee, nonce, expiry)`.
        #[pallet::call_index(1)]
        #[pallet::weight(Weight::from_parts(45_000, 0))]
        pub fn delegate_by_sig(
            origin: OriginFor<T>,
            signer: T::AccountId,
            delegatee: T::AccountId,
            nonce: u64,
            expiry: BlockNumberFor<T>,
            signature: T::OffchainSignature,
        ) -> DispatchResult {
            let _ = ensure_signed(origin)?;
            Self::with_entry_guard(|| {
                let now = frame_system::Pallet::<T>::block_number();
                ensure!(now <= expiry, Error::<T>::SignatureExpired);
                ensure!(nonce == Nonces::<T>::get(&signer), Error::<T>::StaleNonce);

                let payload = (DELEGATION_TAG, &delegatee, nonce, &expiry).encode();
                ensure!(
                    signature.verify(&payload[..], &signer),
                    Error::<T>::InvalidSignature
                );

                Nonces::<T>::insert(&signer, nonce.saturating_add(1));
                Self::do_delegate(&signer, &delegatee)
            })
        }
    }

    impl<T: Config> Pallet<T> {
        /// Weight at the most recent checkpoint, 0 if none.
        pub fn current_votes(who: &T::AccountId) -> Balance {
            let n = CheckpointCount::<T>::get(who);
            if n == 0 {
                return 0;
            }
            Checkpoints::<T>::get(who, n - 1)
                .map(|c| c.votes)
                .unwrap_or(0)
        }

        /// Weight as of block `at`, which must already be history.
        pub fn prior_votes(
            who: &T::AccountId,
            at: BlockNumberFor<T>,
        ) -> Result<Balance, DispatchError> {
            let now = frame_system::Pallet::<T>::block_number();
            ensure!(at < now, Error::<T>::BlockNotPast);

            let n = CheckpointCount::<T>::get(who);
            if n == 0 {
                return Ok(0);
            }
            // Most queries land at or after the latest checkpoint.
            if let Some(last) = Checkpoints::<T>::get(who, n - 1) {
                if last.from_block <= at {
                    return Ok(last.votes);
                }
            }
            if let Some(first) = Checkpoints::<T>::get(who, 0) {
                if first.from_block > at {
                    return Ok(0);
                }
            }

            let mut lo = 0u32;
            let mut hi = n - 1;
            while hi > lo {
                // ceil midpoint so the loop always shrinks (lo, hi)
                let mid = hi - (hi - lo) / 2;
                match Checkpoints::<T>::get(who, mid) {
                    Some(cp) if cp.from_block == at => return Ok(cp.votes),
                    Some(cp) if cp.from_block < at => lo = mid,
                    _ => hi = mid - 1,
                }
            }
            Ok(Checkpoints::<T>::get(who, lo).map(|c| c.votes).unwrap_or(0))
        }

        fn do_delegate(who: &T::AccountId, to: &T::AccountId) -> DispatchResult {
            let prior = Delegates::<T>::get(who);
            let weight = T::Holdings::holding(who);
            Delegates::<T>::insert(who, to);
            Self::shift_weight(prior.as_ref(), Some(to), weight)?;
            Self::deposit_event(Event::DelegateChanged {
                delegator: who.clone(),
                from: prior,
                to: to.clone(),
            });
            Ok(())
        }

        /// Move `amount` of weight between delegates, one checkpoint
        /// write per affected side. `None` leaves that side untouched.
        fn shift_weight(
            from: Option<&T::AccountId>,
            to: Option<&T::AccountId>,
            amount: Balance,
        ) -> DispatchResult {
            if amount == 0 || from == to {
                return Ok(());
            }
            if let Some(src) = from {
                let old = Self::current_votes(src);
                let new = old.checked_sub(amount).ok_or(Error::<T>::WeightUnderflow)?;
                Self::write_checkpoint(src, old, new);
            }
            if let Some(dst) = to {
                let old = Self::current_votes(dst);
                let new = old.checked_add(amount).ok_or(Error::<T>::WeightOverflow)?;
                Self::write_checkpoint(dst, old, new);
            }
            Ok(())
        }

        /// Append a checkpoint, or overwrite in place when the latest
        /// one is from the current block.
        fn write_checkpoint(delegate: &T::AccountId, previous: Balance, votes: Balance) {
            let now = frame_system::Pallet::<T>::block_number();
            let n = CheckpointCount::<T>::get(delegate);

            if n > 0 {
                if let Some(mut last) = Checkpoints::<T>::get(delegate, n - 1) {
                    if last.from_block == now {
                        last.votes = votes;
                        Checkpoints::<T>::insert(delegate, n - 1, last);
                        Self::deposit_event(Event::DelegateVotesChanged {
                            delegate: delegate.clone(),
                            previous,
                            votes,
                        });
                        return;
                    }
                }
            }

            Checkpoints::<T>::insert(
                delegate,
                n,
                Checkpoint {
                    from_block: now,
                    votes,
                },
            );
            CheckpointCount::<T>::insert(delegate, n.saturating_add(1));
            Self::deposit_event(Event::DelegateVotesChanged {
                delegate: delegate.clone(),
                previous,
                votes,
            });
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

    impl<T: Config> VoteHook<T::AccountId> for Pallet<T> {
        fn on_holding_changed(
            from: Option<&T::AccountId>,
            to: Option<&T::AccountId>,
            amount: Balance,
        ) -> DispatchResult {
            Self::with_entry_guard(|| {
                let from_delegate = from.and_then(|a| Delegates::<T>::get(a));
                let to_delegate = to.and_then(|a| Delegates::<T>::get(a));
                Self::shift_weight(from_delegate.as_ref(), to_delegate.as_ref(), amount)
            })
        }
    }
}
