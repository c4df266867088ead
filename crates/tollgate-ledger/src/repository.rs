use async_trait::async_trait;
use dashmap::DashMap;
use jiff::Timestamp;

use crate::clock::utc_day;
use crate::types::{Account, DailyUsage, Plan, UsageDelta};

/// Errors returned by account storage
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("account not found: {0}")]
    NotFound(String),

    /// Applying the delta would take the balance below zero
    #[error("insufficient balance for {account}: have {balance}, change {change}")]
    InsufficientBalance {
        account: String,
        balance: i64,
        change: i64,
    },

    /// Backend failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Narrow persistence interface for account rows
#[async_trait]
pub trait AccountRepository: Send + Sync + 'static {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, RepositoryError>;

    /// Insert a fresh account, or return the existing row if one was created concurrently
    async fn create_account(
        &self,
        id: &str,
        plan: Plan,
        credits: i64,
        now: Timestamp,
    ) -> Result<Account, RepositoryError>;

    /// Apply a committed charge; rejects changes that would make credits negative
    async fn update_usage(&self, id: &str, delta: UsageDelta) -> Result<Account, RepositoryError>;

    /// Zero the daily counters unless they were already reset on `now`'s UTC day
    async fn reset_daily(&self, id: &str, now: Timestamp) -> Result<Account, RepositoryError>;
}

/// In-process repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    accounts: DashMap<String, Account>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountRepository for MemoryRepository {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, RepositoryError> {
        Ok(self.accounts.get(id).map(|entry| entry.value().clone()))
    }

    async fn create_account(
        &self,
        id: &str,
        plan: Plan,
        credits: i64,
        now: Timestamp,
    ) -> Result<Account, RepositoryError> {
        let entry = self.accounts.entry(id.to_owned()).or_insert_with(|| Account {
            id: id.to_owned(),
            plan,
            credits: credits.max(0),
            daily_usage: DailyUsage::default(),
            daily_usage_reset_at: now,
        });

        Ok(entry.value().clone())
    }

    async fn update_usage(&self, id: &str, delta: UsageDelta) -> Result<Account, RepositoryError> {
        let mut entry = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))?;

        let account = entry.value_mut();
        let balance = account.credits.saturating_add(delta.credits);
        if balance < 0 {
            return Err(RepositoryError::InsufficientBalance {
                account: id.to_owned(),
                balance: account.credits,
                change: delta.credits,
            });
        }

        account.credits = balance;
        let counter = account.daily_usage.get_mut(delta.feature);
        *counter = counter.saturating_add(delta.uses);

        Ok(account.clone())
    }

    async fn reset_daily(&self, id: &str, now: Timestamp) -> Result<Account, RepositoryError> {
        let mut entry = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))?;

        let account = entry.value_mut();
        if utc_day(account.daily_usage_reset_at) < utc_day(now) {
            account.daily_usage = DailyUsage::default();
            account.daily_usage_reset_at = now;
        }

        Ok(account.clone())
    }
}
