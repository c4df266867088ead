use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tollgate_core::Feature;

use crate::clock::utc_day;

/// Subscription plan of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    #[default]
    Free,
    ProMonthly,
    ProYearly,
}

impl Plan {
    /// Paid plans have no daily caps
    pub const fn is_paid(self) -> bool {
        matches!(self, Self::ProMonthly | Self::ProYearly)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::ProMonthly => "PRO_MONTHLY",
            Self::ProYearly => "PRO_YEARLY",
        }
    }

    /// Plan named by a credential claim; anything unrecognised is free
    pub fn from_hint(hint: Option<&str>) -> Self {
        let Some(hint) = hint else {
            return Self::Free;
        };

        match hint.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PRO_MONTHLY" => Self::ProMonthly,
            "PRO_YEARLY" => Self::ProYearly,
            _ => Self::Free,
        }
    }
}

/// Successful uses per feature within one UTC day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub chat: u32,
    pub image: u32,
    pub video: u32,
}

impl DailyUsage {
    pub const fn get(&self, feature: Feature) -> u32 {
        match feature {
            Feature::Chat => self.chat,
            Feature::Image => self.image,
            Feature::Video => self.video,
        }
    }

    pub const fn get_mut(&mut self, feature: Feature) -> &mut u32 {
        match feature {
            Feature::Chat => &mut self.chat,
            Feature::Image => &mut self.image,
            Feature::Video => &mut self.video,
        }
    }
}

/// Persisted account row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub plan: Plan,
    /// Never negative
    pub credits: i64,
    /// Counters for the UTC day of `daily_usage_reset_at`
    pub daily_usage: DailyUsage,
    pub daily_usage_reset_at: Timestamp,
}

impl Account {
    /// Usage as of `now`; a row last reset on an earlier day counts as zero
    pub fn usage_on(&self, now: Timestamp) -> DailyUsage {
        if utc_day(self.daily_usage_reset_at) < utc_day(now) {
            DailyUsage::default()
        } else {
            self.daily_usage
        }
    }
}

/// Change applied to an account by a committed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageDelta {
    /// Signed change in credits
    pub credits: i64,
    pub feature: Feature,
    /// Increment to the feature's daily counter
    pub uses: u32,
}

impl UsageDelta {
    /// One successful use costing `cost` credits
    pub const fn charge(feature: Feature, cost: i64) -> Self {
        Self {
            credits: -cost,
            feature,
            uses: 1,
        }
    }
}

/// Why admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Denial {
    InsufficientCredits,
    DailyLimitReached,
}

impl Denial {
    pub const fn code(self) -> &'static str {
        match self {
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::DailyLimitReached => "DAILY_LIMIT_REACHED",
        }
    }

    /// Human-readable explanation for `feature`
    pub fn message(self, feature: Feature) -> String {
        match self {
            Self::InsufficientCredits => format!("not enough credits for {feature}"),
            Self::DailyLimitReached => format!("daily {feature} limit reached, resets at midnight UTC"),
        }
    }
}

/// Daily caps per feature; `None` is unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureLimits {
    pub chat: Option<u32>,
    pub image: Option<u32>,
    pub video: Option<u32>,
}

impl FeatureLimits {
    pub const fn get(&self, feature: Feature) -> Option<u32> {
        match feature {
            Feature::Chat => self.chat,
            Feature::Image => self.image,
            Feature::Video => self.video,
        }
    }
}

/// Read-only projection of an account served by `GET /v1/account`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub plan: Plan,
    pub credits: i64,
    pub daily_usage: DailyUsage,
    pub limits: FeatureLimits,
    pub warnings: Vec<String>,
    pub next_reset_at: Timestamp,
}
