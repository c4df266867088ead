//! Admission control against credits and daily caps
//!
//! Every admission runs reset, check and reserve under a per-account async
//! mutex, so two requests for the same account are serialized while distinct
//! accounts never contend. An admitted request holds a [`Reservation`]: its
//! cost and one use are counted as in flight until the reservation is either
//! committed (persisted) or dropped (released, nothing charged).

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use jiff::Timestamp;
use jiff::tz::TimeZone;
use tollgate_config::LedgerConfig;
use tollgate_core::{AccountIdentity, Feature};

use crate::clock::{Clock, utc_day};
use crate::error::LedgerError;
use crate::repository::AccountRepository;
use crate::types::{Account, AccountView, DailyUsage, Denial, FeatureLimits, Plan, UsageDelta};

/// Outcome of an admission check
#[derive(Debug)]
pub enum Admission {
    Allowed(Reservation),
    Denied(Denial),
}

/// Credits and uses admitted but not yet committed
#[derive(Debug, Default)]
struct Holds {
    credits: i64,
    uses: DailyUsage,
}

#[derive(Debug, Default)]
struct AccountSlot {
    serial: tokio::sync::Mutex<()>,
    holds: Mutex<Holds>,
}

impl AccountSlot {
    fn holds(&self) -> MutexGuard<'_, Holds> {
        self.holds.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, feature: Feature, cost: i64) {
        let mut holds = self.holds();
        holds.credits -= cost;
        let uses = holds.uses.get_mut(feature);
        *uses = uses.saturating_sub(1);
    }

    fn is_idle(&self) -> bool {
        let holds = self.holds();
        holds.credits == 0 && holds.uses == DailyUsage::default()
    }
}

type Slots = DashMap<String, Arc<AccountSlot>>;

/// Forget an account's slot once nothing is held or waiting on it
///
/// `held_by_caller` counts the references the caller itself still owns. The
/// shard write lock taken by `remove_if` keeps new references from being
/// handed out while the count is checked.
fn prune(slots: &Slots, account_id: &str, held_by_caller: usize) {
    slots.remove_if(account_id, |_, slot| {
        Arc::strong_count(slot) == 1 + held_by_caller && slot.is_idle()
    });
}

/// Per-account credit and daily quota ledger
pub struct UsageLedger {
    repository: Arc<dyn AccountRepository>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    slots: Arc<Slots>,
}

impl UsageLedger {
    pub fn new(repository: Arc<dyn AccountRepository>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            repository,
            clock,
            config,
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Credits charged for one successful use of `feature`
    pub const fn cost(&self, feature: Feature) -> i64 {
        match feature {
            Feature::Chat => self.config.costs.chat,
            Feature::Image => self.config.costs.image,
            Feature::Video => self.config.costs.video,
        }
    }

    /// Whether demo outputs are billed
    pub const fn charges_demo(&self) -> bool {
        self.config.charge_demo
    }

    /// Daily cap for a plan, `None` when unlimited
    pub const fn limit(&self, plan: Plan, feature: Feature) -> Option<u32> {
        if plan.is_paid() {
            return None;
        }

        let free = self.config.limits.free;
        Some(match feature {
            Feature::Chat => free.chat,
            Feature::Image => free.image,
            Feature::Video => free.video,
        })
    }

    /// Decide whether `identity` may spend `cost` on `feature` now
    ///
    /// Lazily resets stale daily counters first. A denial leaves the stored
    /// account untouched apart from that reset.
    pub async fn check_and_reserve(
        &self,
        identity: &AccountIdentity,
        feature: Feature,
        cost: i64,
    ) -> Result<Admission, LedgerError> {
        let slot = self.slot(&identity.account_id);
        let admission = self.admit(&slot, identity, feature, cost).await;

        if !matches!(admission, Ok(Admission::Allowed(_))) {
            prune(&self.slots, &identity.account_id, 1);
        }

        admission
    }

    async fn admit(
        &self,
        slot: &Arc<AccountSlot>,
        identity: &AccountIdentity,
        feature: Feature,
        cost: i64,
    ) -> Result<Admission, LedgerError> {
        let _serial = slot.serial.lock().await;

        let now = self.clock.now();
        let account = self.load_or_create(identity, now).await?;
        let account = if utc_day(account.daily_usage_reset_at) < utc_day(now) {
            tracing::debug!(account_id = %account.id, "resetting daily usage");
            self.repository.reset_daily(&account.id, now).await?
        } else {
            account
        };

        let mut holds = slot.holds();

        if account.credits - holds.credits < cost {
            tracing::debug!(
                account_id = %account.id,
                %feature,
                credits = account.credits,
                held = holds.credits,
                cost,
                "admission denied, insufficient credits"
            );
            return Ok(Admission::Denied(Denial::InsufficientCredits));
        }

        if let Some(limit) = self.limit(account.plan, feature) {
            let used = account.daily_usage.get(feature) + holds.uses.get(feature);
            if used >= limit {
                tracing::debug!(account_id = %account.id, %feature, used, limit, "admission denied, daily limit");
                return Ok(Admission::Denied(Denial::DailyLimitReached));
            }
        }

        holds.credits += cost;
        *holds.uses.get_mut(feature) += 1;
        drop(holds);

        Ok(Admission::Allowed(Reservation {
            repository: Arc::clone(&self.repository),
            slots: Arc::clone(&self.slots),
            slot: Arc::clone(slot),
            account_id: account.id,
            feature,
            cost,
            settled: false,
        }))
    }

    /// Account projection for `identity`, creating the account on first sight
    pub async fn view(&self, identity: &AccountIdentity) -> Result<AccountView, LedgerError> {
        let now = self.clock.now();
        let account = self.load_or_create(identity, now).await?;
        self.project(&account, now)
    }

    fn project(&self, account: &Account, now: Timestamp) -> Result<AccountView, LedgerError> {
        let daily_usage = account.usage_on(now);
        let limits = FeatureLimits {
            chat: self.limit(account.plan, Feature::Chat),
            image: self.limit(account.plan, Feature::Image),
            video: self.limit(account.plan, Feature::Video),
        };

        let mut warnings = Vec::new();
        if account.credits < self.config.low_credit_threshold {
            warnings.push("LOW_CREDITS".to_owned());
        }
        for feature in Feature::ALL {
            let Some(limit) = limits.get(feature) else {
                continue;
            };
            let used = daily_usage.get(feature);
            if used >= limit {
                warnings.push(format!("DAILY_LIMIT_REACHED:{feature}"));
            } else if u64::from(used) * 5 >= u64::from(limit) * 4 {
                warnings.push(format!("DAILY_LIMIT_NEAR:{feature}"));
            }
        }

        let next_reset_at = utc_day(now).tomorrow()?.to_zoned(TimeZone::UTC)?.timestamp();

        Ok(AccountView {
            plan: account.plan,
            credits: account.credits,
            daily_usage,
            limits,
            warnings,
            next_reset_at,
        })
    }

    async fn load_or_create(&self, identity: &AccountIdentity, now: Timestamp) -> Result<Account, LedgerError> {
        if let Some(account) = self.repository.get_account(&identity.account_id).await? {
            return Ok(account);
        }

        let plan = Plan::from_hint(identity.plan_hint.as_deref());
        let credits = match plan {
            Plan::Free => self.config.initial_credits.free,
            Plan::ProMonthly => self.config.initial_credits.pro_monthly,
            Plan::ProYearly => self.config.initial_credits.pro_yearly,
        };

        tracing::info!(account_id = %identity.account_id, plan = plan.as_str(), credits, "creating account");

        Ok(self
            .repository
            .create_account(&identity.account_id, plan, credits, now)
            .await?)
    }

    fn slot(&self, account_id: &str) -> Arc<AccountSlot> {
        if let Some(slot) = self.slots.get(account_id) {
            return Arc::clone(slot.value());
        }

        Arc::clone(self.slots.entry(account_id.to_owned()).or_default().value())
    }
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger")
            .field("accounts", &self.slots.len())
            .finish_non_exhaustive()
    }
}

/// An admitted, not yet charged request
///
/// Dropping it without [`Reservation::commit`] releases the hold and charges
/// nothing.
pub struct Reservation {
    repository: Arc<dyn AccountRepository>,
    slots: Arc<Slots>,
    slot: Arc<AccountSlot>,
    account_id: String,
    feature: Feature,
    cost: i64,
    settled: bool,
}

impl Reservation {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub const fn feature(&self) -> Feature {
        self.feature
    }

    pub const fn cost(&self) -> i64 {
        self.cost
    }

    /// Persist the charge after a confirmed upstream success
    pub async fn commit(mut self) -> Result<Account, LedgerError> {
        let _serial = self.slot.serial.lock().await;

        let result = self
            .repository
            .update_usage(&self.account_id, UsageDelta::charge(self.feature, self.cost))
            .await;

        self.settled = true;
        self.slot.release(self.feature, self.cost);

        let account = result?;
        tracing::debug!(
            account_id = %self.account_id,
            feature = %self.feature,
            cost = self.cost,
            credits = account.credits,
            "usage committed"
        );

        Ok(account)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.release(self.feature, self.cost);
            tracing::debug!(account_id = %self.account_id, feature = %self.feature, "reservation released");
        }

        prune(&self.slots, &self.account_id, 1);
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("account_id", &self.account_id)
            .field("feature", &self.feature)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}
