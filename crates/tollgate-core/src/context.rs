use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RequestId;

/// Per-request context handed from the HTTP layer to the facade
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for logs, responses and broadcast events
    pub request_id: RequestId,
    /// Account the request is billed to
    pub identity: AccountIdentity,
}

impl RequestContext {
    /// Create a context for an already authenticated account
    pub const fn new(request_id: RequestId, identity: AccountIdentity) -> Self {
        Self { request_id, identity }
    }

    /// Account identifier shorthand
    pub fn account_id(&self) -> &str {
        &self.identity.account_id
    }
}

/// Authenticated account as resolved from an inbound credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    /// Stable account identifier (the token subject)
    pub account_id: String,
    /// Plan advertised by the credential, used only when the account is first created
    pub plan_hint: Option<String>,
}

impl AccountIdentity {
    /// Identity without a plan hint
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            plan_hint: None,
        }
    }

    /// Build an identity from validated token claims
    ///
    /// Returns `None` when the token carries no subject.
    pub fn from_claims(claims: &Claims, plan_claim: &str) -> Option<Self> {
        let account_id = claims.subject.clone().filter(|s| !s.is_empty())?;
        Some(Self {
            account_id,
            plan_hint: claims.get_claim(plan_claim),
        })
    }
}

/// Custom JWT claims issued by the session layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    #[serde(default, rename = "iss", skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Subject, the account id
    #[serde(default, rename = "sub", skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Everything else, reachable through [`Claims::get_claim`]
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl Claims {
    /// Claims for a subject with no extra fields
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    /// Extract a claim value by path, supporting nested claims
    ///
    /// Paths can be simple (e.g. "sub") or nested (e.g. "account.plan").
    #[must_use]
    pub fn get_claim(&self, path: &str) -> Option<String> {
        match path {
            "iss" => return self.issuer.clone(),
            "sub" => return self.subject.clone(),
            _ => {}
        }

        let mut parts = path.split('.');
        let first = parts.next()?;
        let current = parts.fold(self.additional.get(first).unwrap_or(&Value::Null), |current, part| {
            current.get(part).unwrap_or(&Value::Null)
        });

        match current {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_claim_lookup() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "acct-1",
            "account": { "plan": "PRO_MONTHLY", "seats": 3 }
        }))
        .unwrap();

        assert_eq!(claims.get_claim("account.plan").as_deref(), Some("PRO_MONTHLY"));
        assert_eq!(claims.get_claim("account.seats").as_deref(), Some("3"));
        assert!(claims.get_claim("account.missing").is_none());
    }

    #[test]
    fn identity_requires_subject() {
        let claims = Claims::default();
        assert!(AccountIdentity::from_claims(&claims, "plan").is_none());

        let mut claims = Claims::for_subject("acct-2");
        claims.additional.insert("plan".to_owned(), Value::from("FREE"));
        let identity = AccountIdentity::from_claims(&claims, "plan").unwrap();
        assert_eq!(identity.account_id, "acct-2");
        assert_eq!(identity.plan_hint.as_deref(), Some("FREE"));
    }
}
