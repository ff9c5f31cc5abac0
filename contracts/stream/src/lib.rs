#![no_std]

mod accrual;

pub use accrual::SECONDS_PER_PERIOD;

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address,
    BytesN, Env,
};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Role registry for the contract.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub admin: Address,
    pub payer: Address,
    pub commission_address: Address,
}

/// Lifecycle of the record stored for a payee, derived from its timestamps.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamStatus {
    NoStream = 0,
    Active = 1,
    Terminating = 2,
    Closed = 3,
}

#[contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    InvalidAddress = 3,
    InvalidValue = 4,
    NotAdmin = 5,
    NotPayer = 6,
    NotPayee = 7,
    OpenStreamExists = 8,
    StreamIsTerminating = 9,
    AlreadyTerminatedOrTerminating = 10,
    CliffPeriodIsNotEnded = 11,
    InsufficientBalance = 12,
    CanNotClaimAnyMore = 13,
    Reentrant = 14,
}

/// An open-ended stream from the payer to a single payee.
///
/// `rate` is vested per [`SECONDS_PER_PERIOD`]. `claimed_at` is the settlement
/// checkpoint and starts at `created_at`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stream {
    pub payee: Address,
    pub token: Address,
    pub rate: i128,
    pub cliff_period: u64,
    pub termination_period: u64,
    pub created_at: u64,
    pub terminated_at: Option<u64>,
    pub claimed_at: u64,
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    Config,           // Instance storage for the role registry.
    Stream(Address),  // Persistent storage, one record per payee.
    Balance(Address), // Persistent storage, deposit ledger per token.
    ClaimLock,        // Temporary storage, set while a claim is in flight.
}

const TTL_THRESHOLD: u32 = 17280;
const TTL_EXTEND_TO: u32 = 120960;

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

fn load_config(env: &Env) -> Result<Config, ContractError> {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(ContractError::NotInitialized)
}

fn save_config(env: &Env, config: &Config) {
    env.storage().instance().set(&DataKey::Config, config);
    env.storage()
        .instance()
        .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn load_stream(env: &Env, payee: &Address) -> Option<Stream> {
    env.storage()
        .persistent()
        .get(&DataKey::Stream(payee.clone()))
}

fn save_stream(env: &Env, stream: &Stream) {
    let key = DataKey::Stream(stream.payee.clone());
    env.storage().persistent().set(&key, stream);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn get_balance(env: &Env, token: &Address) -> i128 {
    env.storage()
        .persistent()
        .get(&DataKey::Balance(token.clone()))
        .unwrap_or(0)
}

fn set_balance(env: &Env, token: &Address, amount: i128) {
    let key = DataKey::Balance(token.clone());
    env.storage().persistent().set(&key, &amount);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn acquire_claim_lock(env: &Env) -> Result<(), ContractError> {
    let locked = env
        .storage()
        .temporary()
        .get::<_, bool>(&DataKey::ClaimLock)
        .unwrap_or(false);
    if locked {
        log!(env, "claim rejected: re-entrant call");
        return Err(ContractError::Reentrant);
    }
    env.storage().temporary().set(&DataKey::ClaimLock, &true);
    Ok(())
}

fn release_claim_lock(env: &Env) {
    env.storage().temporary().remove(&DataKey::ClaimLock);
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl StreamManager {
    fn require_admin(env: &Env, caller: &Address) -> Result<Config, ContractError> {
        caller.require_auth();
        let config = load_config(env)?;
        if *caller != config.admin {
            return Err(ContractError::NotAdmin);
        }
        Ok(config)
    }

    fn require_payer(env: &Env, caller: &Address) -> Result<Config, ContractError> {
        caller.require_auth();
        let config = load_config(env)?;
        if *caller != config.payer {
            return Err(ContractError::NotPayer);
        }
        Ok(config)
    }

    /// The contract itself is the one address that can never be a payee,
    /// token or role holder.
    fn require_external(env: &Env, address: &Address) -> Result<(), ContractError> {
        if *address == env.current_contract_address() {
            return Err(ContractError::InvalidAddress);
        }
        Ok(())
    }

    fn validate_stream_params(
        rate: i128,
        termination_period: u64,
        cliff_period: u64,
    ) -> Result<(), ContractError> {
        if rate <= 0 || termination_period == 0 || cliff_period == 0 {
            return Err(ContractError::InvalidValue);
        }
        Ok(())
    }

    fn validate_role_change(
        env: &Env,
        current: &Address,
        new: &Address,
    ) -> Result<(), ContractError> {
        Self::require_external(env, new)?;
        if current == new {
            return Err(ContractError::InvalidAddress);
        }
        Ok(())
    }

    fn settle_claim(env: &Env, payee: &Address) -> Result<i128, ContractError> {
        let mut stream = load_stream(env, payee).ok_or(ContractError::NotPayee)?;
        let now = env.ledger().timestamp();

        if now < accrual::cliff_end(&stream) {
            return Err(ContractError::CliffPeriodIsNotEnded);
        }

        let amount = accrual::calculate_accrued_amount(&stream, now);
        if amount == 0 {
            if accrual::status_at(Some(&stream), now) == StreamStatus::Closed {
                return Err(ContractError::CanNotClaimAnyMore);
            }
            log!(env, "claim: nothing accrued", payee.clone(), now);
            return Ok(0);
        }

        let balance = get_balance(env, &stream.token);
        if balance < amount {
            return Err(ContractError::InsufficientBalance);
        }

        // The checkpoint and the ledger debit must be persisted before the
        // token is called: a nested claim has to observe them.
        stream.claimed_at = accrual::effective_now(&stream, now);
        save_stream(env, &stream);
        set_balance(env, &stream.token, balance - amount);

        let token_client = token::Client::new(env, &stream.token);
        token_client.transfer(&env.current_contract_address(), payee, &amount);

        log!(env, "claim settled", payee.clone(), amount, stream.claimed_at);
        env.events()
            .publish((symbol_short!("claimed"), payee.clone()), amount);
        Ok(amount)
    }
}

// ---------------------------------------------------------------------------
// Contract Implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct StreamManager;

#[contractimpl]
impl StreamManager {
    /// Initialise the role registry.
    ///
    /// Must be called exactly once. The commission address starts out as the
    /// admin and can be moved with `change_commission_address`.
    ///
    /// # Errors
    /// - `AlreadyInitialized` if a configuration is already stored
    pub fn initialize(env: Env, admin: Address, payer: Address) -> Result<(), ContractError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(ContractError::AlreadyInitialized);
        }

        let config = Config {
            commission_address: admin.clone(),
            admin,
            payer,
        };
        save_config(&env, &config);
        Ok(())
    }

    /// Move the commission role to `new_address`.
    ///
    /// # Authorization
    /// - `caller` must authorize and must be the admin
    ///
    /// # Errors
    /// - `NotAdmin` if `caller` is not the admin
    /// - `InvalidAddress` if `new_address` is the contract itself or the current value
    ///
    /// # Events
    /// - `comm_set` with the new address
    pub fn change_commission_address(
        env: Env,
        caller: Address,
        new_address: Address,
    ) -> Result<(), ContractError> {
        let mut config = Self::require_admin(&env, &caller)?;
        Self::validate_role_change(&env, &config.commission_address, &new_address)?;

        config.commission_address = new_address.clone();
        save_config(&env, &config);

        env.events()
            .publish((symbol_short!("comm_set"),), new_address);
        Ok(())
    }

    /// Move the payer role to `new_address`.
    ///
    /// Existing streams keep running; from now on only `new_address` may
    /// deposit, create and terminate.
    ///
    /// # Errors
    /// - `NotAdmin` if `caller` is not the admin
    /// - `InvalidAddress` if `new_address` is the contract itself or the current payer
    ///
    /// # Events
    /// - `payer_set` with the new address
    pub fn change_payer_address(
        env: Env,
        caller: Address,
        new_address: Address,
    ) -> Result<(), ContractError> {
        let mut config = Self::require_admin(&env, &caller)?;
        Self::validate_role_change(&env, &config.payer, &new_address)?;

        config.payer = new_address.clone();
        save_config(&env, &config);

        env.events()
            .publish((symbol_short!("payer_set"),), new_address);
        Ok(())
    }

    /// Replace the contract code with the Wasm identified by `new_wasm_hash`.
    ///
    /// # Authorization
    /// - `caller` must authorize and must be the admin
    ///
    /// # Errors
    /// - `NotInitialized` before `initialize`
    /// - `NotAdmin` if `caller` is not the admin
    ///
    /// # Events
    /// - `upgraded` with `new_wasm_hash`
    ///
    /// # Usage Notes
    /// - The Wasm must already be uploaded to the network
    /// - Instance and persistent storage survive the upgrade unchanged
    pub fn upgrade(
        env: Env,
        caller: Address,
        new_wasm_hash: BytesN<32>,
    ) -> Result<(), ContractError> {
        Self::require_admin(&env, &caller)?;

        env.deployer()
            .update_current_contract_wasm(new_wasm_hash.clone());

        env.events()
            .publish((symbol_short!("upgraded"),), new_wasm_hash);
        Ok(())
    }

    /// Fund the deposit ledger for `token`.
    ///
    /// Pulls `amount` from the payer into the contract. The ledger is pooled:
    /// every stream paid in `token` draws from the same balance.
    ///
    /// # Authorization
    /// - `caller` must authorize and must be the payer
    ///
    /// # Errors
    /// - `NotPayer` if `caller` is not the payer
    /// - `InvalidAddress` if `token` is the contract itself
    /// - `InvalidValue` if `amount` is not positive or the ledger would overflow
    ///
    /// # State Changes
    /// - Transfers `amount` of `token` from payer to contract, then credits the ledger
    ///
    /// # Events
    /// - `deposit(token)` with `amount`
    pub fn deposit(
        env: Env,
        caller: Address,
        token: Address,
        amount: i128,
    ) -> Result<(), ContractError> {
        Self::require_payer(&env, &caller)?;
        Self::require_external(&env, &token)?;
        if amount <= 0 {
            return Err(ContractError::InvalidValue);
        }

        let credited = get_balance(&env, &token)
            .checked_add(amount)
            .ok_or(ContractError::InvalidValue)?;

        // Credit only once the tokens have actually arrived.
        let token_client = token::Client::new(&env, &token);
        token_client.transfer(&caller, &env.current_contract_address(), &amount);
        set_balance(&env, &token, credited);

        log!(&env, "deposit", token.clone(), amount);
        env.events()
            .publish((symbol_short!("deposit"), token), amount);
        Ok(())
    }

    /// Open a stream from the payer to `payee`.
    ///
    /// No tokens move here; claims are paid from the deposit ledger.
    ///
    /// # Parameters
    /// - `payee`: Address receiving the stream
    /// - `token`: Token the stream is paid in
    /// - `rate`: Amount vested per 30-day period (must be > 0)
    /// - `termination_period`: Grace window after `terminate`, in seconds (must be > 0)
    /// - `cliff_period`: Delay after creation before anything is claimable, in seconds (must be > 0)
    ///
    /// # Errors
    /// - `NotPayer` if `caller` is not the payer
    /// - `InvalidAddress` if `payee` or `token` is the contract itself
    /// - `InvalidValue` if any of `rate`, `termination_period`, `cliff_period` is zero
    /// - `OpenStreamExists` if `payee` has an active stream
    /// - `StreamIsTerminating` if `payee` has a stream still inside its grace window
    ///
    /// # Usage Notes
    /// - A closed stream is overwritten. Any residue it did not sweep is forfeited.
    ///
    /// # Events
    /// - `created(caller)` with `payee`
    pub fn create_open_stream(
        env: Env,
        caller: Address,
        payee: Address,
        token: Address,
        rate: i128,
        termination_period: u64,
        cliff_period: u64,
    ) -> Result<(), ContractError> {
        Self::require_payer(&env, &caller)?;
        Self::require_external(&env, &payee)?;
        Self::require_external(&env, &token)?;
        Self::validate_stream_params(rate, termination_period, cliff_period)?;

        let now = env.ledger().timestamp();
        match accrual::status_at(load_stream(&env, &payee).as_ref(), now) {
            StreamStatus::Active => return Err(ContractError::OpenStreamExists),
            StreamStatus::Terminating => return Err(ContractError::StreamIsTerminating),
            StreamStatus::NoStream | StreamStatus::Closed => {}
        }

        let stream = Stream {
            payee: payee.clone(),
            token,
            rate,
            cliff_period,
            termination_period,
            created_at: now,
            terminated_at: None,
            claimed_at: now,
        };
        save_stream(&env, &stream);

        log!(&env, "stream created", payee.clone(), rate, now);
        env.events()
            .publish((symbol_short!("created"), caller), payee);
        Ok(())
    }

    /// Start the grace window for `payee`'s stream.
    ///
    /// Vesting continues until `now + termination_period` and then freezes.
    /// The payee can claim what vested until then; nothing is refunded.
    ///
    /// # Errors
    /// - `NotPayer` if `caller` is not the payer
    /// - `NotPayee` if `payee` has no stream
    /// - `AlreadyTerminatedOrTerminating` on a second termination
    ///
    /// # Events
    /// - `terminate(payee)`
    pub fn terminate(env: Env, caller: Address, payee: Address) -> Result<(), ContractError> {
        Self::require_payer(&env, &caller)?;

        let mut stream = load_stream(&env, &payee).ok_or(ContractError::NotPayee)?;
        if stream.terminated_at.is_some() {
            return Err(ContractError::AlreadyTerminatedOrTerminating);
        }

        let now = env.ledger().timestamp();
        stream.terminated_at = Some(now);
        save_stream(&env, &stream);

        log!(&env, "stream terminated", payee.clone(), now);
        env.events()
            .publish((symbol_short!("terminate"), payee), ());
        Ok(())
    }

    /// Pay out everything vested for `payee` since the last claim.
    ///
    /// Runs under the claim lock: a nested `claim` issued while this one is in
    /// flight (e.g. from inside the token's `transfer`) fails with `Reentrant`.
    /// The checkpoint and ledger debit are written before the token is called.
    ///
    /// # Returns
    /// - The amount transferred. `0` means nothing had vested yet; in that case
    ///   no state changes and no event is published.
    ///
    /// # Errors
    /// - `Reentrant` if a claim is already in progress
    /// - `NotPayee` if `payee` has no stream
    /// - `CliffPeriodIsNotEnded` before `created_at + cliff_period`
    /// - `CanNotClaimAnyMore` if the stream is closed and its residue was already swept
    /// - `InsufficientBalance` if the ledger for the stream's token cannot cover the amount
    ///
    /// # Events
    /// - `claimed(payee)` with the amount (only when the amount is non-zero)
    pub fn claim(env: Env, payee: Address) -> Result<i128, ContractError> {
        payee.require_auth();

        acquire_claim_lock(&env)?;
        let result = Self::settle_claim(&env, &payee);
        release_claim_lock(&env);
        result
    }

    /// Amount vested for `payee` and not yet claimed. Zero when there is no
    /// stream or the cliff has not passed.
    pub fn accumulation(env: Env, payee: Address) -> i128 {
        load_stream(&env, &payee)
            .map(|stream| accrual::calculate_accrued_amount(&stream, env.ledger().timestamp()))
            .unwrap_or(0)
    }

    /// True while `payee` has an active or terminating stream.
    pub fn is_payee(env: Env, payee: Address) -> bool {
        matches!(
            Self::stream_status(env, payee),
            StreamStatus::Active | StreamStatus::Terminating
        )
    }

    /// Lifecycle status of the stream stored for `payee`.
    ///
    /// # Returns
    /// - `NoStream` if `payee` never had a stream
    /// - `Active` until the stream is terminated
    /// - `Terminating` inside the grace window
    /// - `Closed` from `terminated_at + termination_period` on
    ///
    /// # Usage Notes
    /// - Derived from the stored timestamps at the current ledger time; a
    ///   terminating stream becomes closed without any transaction
    pub fn stream_status(env: Env, payee: Address) -> StreamStatus {
        let stream = load_stream(&env, &payee);
        accrual::status_at(stream.as_ref(), env.ledger().timestamp())
    }

    /// Raw stream record for `payee`.
    ///
    /// # Returns
    /// - `None` if `payee` never had a stream
    /// - The stored record otherwise, closed streams included
    pub fn get_stream(env: Env, payee: Address) -> Option<Stream> {
        load_stream(&env, &payee)
    }

    /// Current role assignments.
    ///
    /// # Returns
    /// - `Config` with the admin, payer and commission addresses
    ///
    /// # Errors
    /// - `NotInitialized` before `initialize`
    pub fn get_config(env: Env) -> Result<Config, ContractError> {
        load_config(&env)
    }

    /// Deposit ledger balance for `token`.
    pub fn balance(env: Env, token: Address) -> i128 {
        get_balance(&env, &token)
    }
}
