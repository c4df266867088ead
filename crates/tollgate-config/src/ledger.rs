use serde::Deserialize;

/// Credit costs, plan allowances and daily caps
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Credits charged per successful call
    #[serde(default)]
    pub costs: FeatureCosts,
    /// Credits granted to a newly created account, by plan
    #[serde(default)]
    pub initial_credits: InitialCredits,
    /// Daily caps applied to free accounts; paid plans are unlimited
    #[serde(default)]
    pub limits: PlanLimits,
    /// Balance under which the account view carries a `LOW_CREDITS` warning
    #[serde(default = "default_low_credit_threshold")]
    pub low_credit_threshold: i64,
    /// Charge for demo outputs
    #[serde(default)]
    pub charge_demo: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            costs: FeatureCosts::default(),
            initial_credits: InitialCredits::default(),
            limits: PlanLimits::default(),
            low_credit_threshold: default_low_credit_threshold(),
            charge_demo: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureCosts {
    #[serde(default = "default_chat_cost")]
    pub chat: i64,
    #[serde(default = "default_image_cost")]
    pub image: i64,
    #[serde(default = "default_video_cost")]
    pub video: i64,
}

impl Default for FeatureCosts {
    fn default() -> Self {
        Self {
            chat: default_chat_cost(),
            image: default_image_cost(),
            video: default_video_cost(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitialCredits {
    #[serde(default = "default_free_credits")]
    pub free: i64,
    #[serde(default = "default_pro_credits")]
    pub pro_monthly: i64,
    #[serde(default = "default_pro_credits")]
    pub pro_yearly: i64,
}

impl Default for InitialCredits {
    fn default() -> Self {
        Self {
            free: default_free_credits(),
            pro_monthly: default_pro_credits(),
            pro_yearly: default_pro_credits(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanLimits {
    #[serde(default)]
    pub free: DailyLimits,
}

/// Per-feature daily caps
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DailyLimits {
    #[serde(default = "default_chat_limit")]
    pub chat: u32,
    #[serde(default = "default_image_limit")]
    pub image: u32,
    #[serde(default = "default_video_limit")]
    pub video: u32,
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self {
            chat: default_chat_limit(),
            image: default_image_limit(),
            video: default_video_limit(),
        }
    }
}

const fn default_low_credit_threshold() -> i64 {
    20
}
const fn default_chat_cost() -> i64 {
    1
}
const fn default_image_cost() -> i64 {
    5
}
const fn default_video_cost() -> i64 {
    20
}
const fn default_free_credits() -> i64 {
    100
}
const fn default_pro_credits() -> i64 {
    5000
}
const fn default_chat_limit() -> u32 {
    50
}
const fn default_image_limit() -> u32 {
    10
}
const fn default_video_limit() -> u32 {
    5
}
