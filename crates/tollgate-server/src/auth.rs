//! Bearer credential verification
//!
//! Tokens are HS256 JWTs whose subject is the account id. With
//! `auth.enabled = false` the account id is read from a plain header,
//! which is only meant for local development.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::{AUTHORIZATION, HeaderName};
use http::{HeaderMap, Uri};
use jwt_compact::alg::{Hs256, Hs256Key};
use jwt_compact::{AlgorithmExt, TimeOptions, UntrustedToken};
use secrecy::ExposeSecret;
use tollgate_config::AuthConfig;
use tollgate_core::{AccountIdentity, Claims, HttpError, RequestContext, RequestId};
use tollgate_provider::{ErrorKind, StructuredError};

use crate::error::structured_response;

/// Route that may carry its credential in the query string
pub const SYNC_PATH: &str = "/v1/sync";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    Missing,

    #[error("malformed token: {0}")]
    Malformed(#[from] jwt_compact::ParseError),

    #[error("token rejected: {0}")]
    Rejected(#[from] jwt_compact::ValidationError),

    #[error("token issuer not accepted")]
    Issuer,

    #[error("token has no subject")]
    NoSubject,
}

impl HttpError for AuthError {
    fn status_code(&self) -> http::StatusCode {
        http::StatusCode::UNAUTHORIZED
    }

    fn error_type(&self) -> &str {
        "AUTH"
    }

    fn client_message(&self) -> String {
        match self {
            Self::Missing => "missing bearer credential".to_owned(),
            Self::Malformed(_) | Self::Rejected(_) | Self::Issuer => "invalid or expired credential".to_owned(),
            Self::NoSubject => "credential does not name an account".to_owned(),
        }
    }
}

enum Mode {
    Jwt { key: Hs256Key, issuer: Option<String> },
    Header { name: HeaderName },
}

/// Resolves the calling account from request credentials
pub struct Authenticator {
    mode: Mode,
    plan_claim: String,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let mode = if config.enabled {
            Mode::Jwt {
                key: Hs256Key::new(config.jwt_secret.expose_secret().as_bytes()),
                issuer: config.issuer.clone(),
            }
        } else {
            tracing::warn!(
                header = %config.dev_account_header,
                "authentication disabled, trusting account header"
            );
            Mode::Header {
                name: HeaderName::try_from(config.dev_account_header.as_str())?,
            }
        };

        Ok(Self {
            mode,
            plan_claim: config.plan_claim.clone(),
        })
    }

    /// Identify the caller
    ///
    /// `query_token` is only consulted when no `Authorization` header is
    /// present; browsers cannot set headers on WebSocket upgrades.
    pub fn authenticate(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<AccountIdentity, AuthError> {
        match &self.mode {
            Mode::Jwt { key, issuer } => {
                let token = bearer(headers).or(query_token).ok_or(AuthError::Missing)?;
                self.verify(key, issuer.as_deref(), token)
            }
            Mode::Header { name } => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(AccountIdentity::new)
                .ok_or(AuthError::Missing),
        }
    }

    fn verify(&self, key: &Hs256Key, issuer: Option<&str>, token: &str) -> Result<AccountIdentity, AuthError> {
        let untrusted = UntrustedToken::new(token)?;
        let token = Hs256.validator::<Claims>(key).validate(&untrusted)?;
        let claims = token.claims();

        let time = TimeOptions::default();
        if claims.expiration.is_some() {
            claims.validate_expiration(&time)?;
        }
        if claims.not_before.is_some() {
            claims.validate_maturity(&time)?;
        }

        if let Some(expected) = issuer
            && claims.custom.issuer.as_deref() != Some(expected)
        {
            return Err(AuthError::Issuer);
        }

        AccountIdentity::from_claims(&claims.custom, &self.plan_claim).ok_or(AuthError::NoSubject)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            Mode::Jwt { .. } => "jwt",
            Mode::Header { .. } => "header",
        };
        f.debug_struct("Authenticator")
            .field("mode", &mode)
            .field("plan_claim", &self.plan_claim)
            .finish()
    }
}

/// Authenticate API requests and attach a [`RequestContext`]
pub async fn auth_middleware(State(auth): State<Arc<Authenticator>>, mut request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(RequestId::generate);

    let query = if request.uri().path() == SYNC_PATH {
        query_token(request.uri())
    } else {
        None
    };

    match auth.authenticate(request.headers(), query) {
        Ok(identity) => {
            tracing::debug!(request_id = %request_id, account_id = %identity.account_id, "authenticated");
            request
                .extensions_mut()
                .insert(RequestContext::new(request_id, identity));
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "authentication failed");
            structured_response(&StructuredError::new(ErrorKind::Auth, e.client_message(), request_id))
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn query_token(uri: &Uri) -> Option<&str> {
    uri.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|v| !v.is_empty())
}
