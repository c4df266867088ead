use secrecy::SecretString;
use serde::Deserialize;

/// Verification of inbound bearer credentials
///
/// Tokens are HS256 JWTs minted by the session layer. The subject is the
/// account id; `plan_claim` names the claim consulted when an account is
/// created on first sight.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Shared HMAC secret
    #[serde(default = "empty_secret")]
    pub jwt_secret: SecretString,
    /// Required issuer, if any
    #[serde(default)]
    pub issuer: Option<String>,
    /// Claim path holding the plan name
    #[serde(default = "default_plan_claim")]
    pub plan_claim: String,
    /// Header trusted for the account id when `enabled = false` (local development only)
    #[serde(default = "default_dev_header")]
    pub dev_account_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: empty_secret(),
            issuer: None,
            plan_claim: default_plan_claim(),
            dev_account_header: default_dev_header(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_enabled() -> bool {
    true
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_plan_claim() -> String {
    "plan".to_owned()
}

fn default_dev_header() -> String {
    "x-account-id".to_owned()
}
