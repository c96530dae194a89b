//! Balance ledger keyed by external wallet address.
//!
//! Accounts are owned by the user directory and reached through `AccountStore`. Balances live
//! only in the store and are changed one credit at a time; the ledger never writes a whole
//! record back. What the ledger keeps in memory is an index from lower-cased wallet address to
//! account id, so a deposit resolves its account without scanning every account.
//!
//! The index is rebuilt from the directory whenever a deposit finds no account, or finds one
//! that is no longer bound to the sender. Wallets bound after startup are therefore credited
//! without a restart.
//!
//! When several accounts are bound to the same wallet, the first one in directory order keeps
//! the address and is the one credited. Later bindings are logged and left unindexed.

use crate::deposit::{Account, AccountId, CreditOutcome, DepositError};
use crate::utils::{normalize_address, with_timeout};
use rust_decimal::Decimal;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Persistence for the account collection.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// All accounts, in directory order.
    async fn load_accounts(&self) -> Result<Vec<Account>, DepositError>;

    /// Add `amount` to the stored balance of `account_id`.
    ///
    /// The update is a read-modify-write of that one record and only happens if the record
    /// still has `wallet_address` (normalized) bound. Returns the updated record, or `None`
    /// without writing if the account is gone or bound elsewhere.
    async fn apply_credit(
        &self,
        account_id: &str,
        wallet_address: &str,
        amount: Decimal,
    ) -> Result<Option<Account>, DepositError>;
}

/// File-based implementation of `AccountStore`, one JSON file per account under
/// `<data_dir>/accounts/`, named after the account id.
///
/// Directory order is account id order.
pub struct FileAccountStore {
    accounts_dir: PathBuf,
    /// Serializes credits made by this process
    write_lock: Mutex<()>,
}

impl FileAccountStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            accounts_dir: data_dir.join("accounts"),
            write_lock: Mutex::new(()),
        }
    }

    fn record_path(&self, account_id: &str) -> Result<PathBuf, DepositError> {
        if account_id.is_empty()
            || account_id.starts_with('.')
            || account_id.contains(['/', '\\'])
        {
            return Err(DepositError::StoreError(format!(
                "Account id {:?} cannot be used as a record name",
                account_id
            )));
        }
        Ok(self.accounts_dir.join(format!("{}.json", account_id)))
    }

    async fn read_record(path: &Path) -> Result<Account, DepositError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DepositError::StoreError(format!("Failed to read account record {:?}: {}", path, e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            DepositError::StoreError(format!("Failed to parse account record {:?}: {}", path, e))
        })
    }
}

#[async_trait::async_trait]
impl AccountStore for FileAccountStore {
    async fn load_accounts(&self) -> Result<Vec<Account>, DepositError> {
        if !tokio::fs::try_exists(&self.accounts_dir).await? {
            warn!(
                "No account directory at {:?}, starting with an empty directory",
                self.accounts_dir
            );
            return Ok(Vec::new());
        }

        let mut accounts = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.accounts_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            accounts.push(Self::read_record(&path).await?);
        }
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn apply_credit(
        &self,
        account_id: &str,
        wallet_address: &str,
        amount: Decimal,
    ) -> Result<Option<Account>, DepositError> {
        let path = self.record_path(account_id)?;
        let _guard = self.write_lock.lock().await;

        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let mut account = Self::read_record(&path).await?;
        if !account.is_bound_to(wallet_address) {
            return Ok(None);
        }
        account.credit(amount)?;

        let content = serde_json::to_string_pretty(&account).map_err(|e| {
            DepositError::StoreError(format!("Failed to serialize account: {}", e))
        })?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await.map_err(|e| {
            DepositError::StoreError(format!("Failed to write account record: {}", e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            DepositError::StoreError(format!("Failed to replace account record: {}", e))
        })?;
        Ok(Some(account))
    }
}

/// Wallet index over an [`AccountStore`].
pub struct BalanceLedger {
    /// Normalized wallet address -> owning account
    wallet_index: DashMap<String, AccountId>,
    store: Arc<dyn AccountStore>,
    refresh_lock: Mutex<()>,
    call_timeout: Duration,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn AccountStore>, call_timeout: Duration) -> Self {
        Self {
            wallet_index: DashMap::new(),
            store,
            refresh_lock: Mutex::new(()),
            call_timeout,
        }
    }

    /// Rebuild the wallet index from the current directory.
    ///
    /// Returns the number of accounts read.
    pub async fn refresh(&self) -> Result<usize, DepositError> {
        let _guard = self.refresh_lock.lock().await;
        let accounts =
            with_timeout(self.call_timeout, "account load", self.store.load_accounts()).await?;

        let mut index: HashMap<String, AccountId> = HashMap::new();
        for account in &accounts {
            let Some(wallet) = account.wallet_address.as_deref().map(normalize_address) else {
                continue;
            };
            match index.get(&wallet) {
                Some(owner) if owner != &account.id => warn!(
                    "Wallet {} is already bound to account {}; account {} will not be credited for it",
                    wallet, owner, account.id
                ),
                Some(_) => {}
                None => {
                    index.insert(wallet, account.id.clone());
                }
            }
        }

        self.wallet_index
            .retain(|wallet, owner| index.get(wallet) == Some(&*owner));
        for (wallet, owner) in index {
            self.wallet_index.insert(wallet, owner);
        }

        debug!(
            "Indexed {} accounts, {} with a bound wallet",
            accounts.len(),
            self.wallet_index.len()
        );
        Ok(accounts.len())
    }

    /// Account credited for deposits from `wallet_address`, as of the last refresh.
    pub fn account_for_wallet(&self, wallet_address: &str) -> Option<AccountId> {
        self.wallet_index
            .get(&normalize_address(wallet_address))
            .map(|entry| entry.value().clone())
    }

    /// Credit `amount` to the account bound to `address`.
    ///
    /// The balance changes only if the store accepts the write; a `StoreError` leaves it
    /// untouched, so retrying the same deposit credits it once.
    pub async fn credit_by_address(
        &self,
        address: &str,
        amount: Decimal,
    ) -> Result<CreditOutcome, DepositError> {
        let wallet = normalize_address(address);
        if let Some(outcome) = self.try_credit(&wallet, amount).await? {
            return Ok(outcome);
        }

        // The directory may have changed since the index was built
        self.refresh().await?;
        Ok(self
            .try_credit(&wallet, amount)
            .await?
            .unwrap_or(CreditOutcome::NotFound))
    }

    async fn try_credit(
        &self,
        wallet: &str,
        amount: Decimal,
    ) -> Result<Option<CreditOutcome>, DepositError> {
        let Some(account_id) = self.account_for_wallet(wallet) else {
            return Ok(None);
        };

        let updated = with_timeout(
            self.call_timeout,
            "account credit",
            self.store.apply_credit(&account_id, wallet, amount),
        )
        .await?;

        Ok(updated.map(|account| {
            debug!(
                "Credited {} to account {}, balance now {}",
                amount, account.id, account.balance
            );
            CreditOutcome::Applied {
                account_id,
                balance: account.balance,
            }
        }))
    }
}

/// Build the ledger and index the directory once.
pub async fn open_ledger(
    store: Arc<dyn AccountStore>,
    call_timeout: Duration,
) -> Result<BalanceLedger, DepositError> {
    let ledger = BalanceLedger::new(store, call_timeout);
    let count = ledger.refresh().await?;
    info!(
        "Loaded {} accounts, {} with a bound wallet",
        count,
        ledger.wallet_index.len()
    );
    Ok(ledger)
}
