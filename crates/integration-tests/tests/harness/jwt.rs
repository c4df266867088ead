//! Bearer token minting

use jwt_compact::alg::{Hs256, Hs256Key};
use jwt_compact::{AlgorithmExt, Claims as JwtClaims, Header};
use tollgate_core::Claims;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Token for a free-plan account
pub fn token_for(account: &str) -> String {
    mint(Claims::for_subject(account), TEST_SECRET)
}

/// Token advertising `plan`
pub fn token_with_plan(account: &str, plan: &str) -> String {
    let mut claims = Claims::for_subject(account);
    claims.additional.insert("plan".to_owned(), serde_json::json!(plan));
    mint(claims, TEST_SECRET)
}

pub fn mint(claims: Claims, secret: &str) -> String {
    let key = Hs256Key::new(secret.as_bytes());
    Hs256
        .token(&Header::empty(), &JwtClaims::new(claims), &key)
        .expect("token signing")
}
