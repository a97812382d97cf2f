#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chathub_domain::{SecretString, UserId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::collab::{AuthError, AuthVerifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	pub exp: u64,
}

pub fn verify_hmac_token(token: &str, secret: &str) -> Result<AuthClaims, AuthError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(AuthError::InvalidFormat);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD
		.decode(payload_b64)
		.map_err(|_| AuthError::InvalidFormat)?;
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::InvalidFormat)?;

	let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSignature)?;
	mac.update(payload_b64.as_bytes());
	mac.verify_slice(&provided_sig).map_err(|_| AuthError::InvalidSignature)?;

	let claims: AuthClaims =
		serde_json::from_slice(&payload).map_err(|e| AuthError::InvalidClaims(e.to_string()))?;
	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	if claims.exp <= now {
		return Err(AuthError::Expired);
	}

	Ok(claims)
}

/// Mint a `v1.<payload>.<signature>` token for `sub` valid until `exp` (unix seconds).
#[cfg(test)]
pub fn issue_hmac_token(sub: &str, exp: u64, secret: &str) -> Result<String, AuthError> {
	let claims = AuthClaims {
		sub: sub.to_string(),
		exp,
	};
	let payload = serde_json::to_vec(&claims).map_err(|e| AuthError::InvalidClaims(e.to_string()))?;
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

	let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSignature)?;
	mac.update(payload_b64.as_bytes());
	let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

	Ok(format!("v1.{payload_b64}.{sig_b64}"))
}

/// Byte comparison whose running time does not depend on where the inputs differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Auth collaborator backed by stateless HMAC tokens.
pub struct HmacTokenVerifier {
	secret: SecretString,
}

impl HmacTokenVerifier {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}
}

#[async_trait]
impl AuthVerifier for HmacTokenVerifier {
	async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
		let claims = verify_hmac_token(token.trim(), self.secret.expose())?;
		UserId::new(claims.sub).map_err(|e| AuthError::InvalidClaims(format!("sub: {e}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SECRET: &str = "test-secret";

	#[test]
	fn constant_time_eq_matches_only_identical_bytes() {
		assert!(constant_time_eq(b"tok", b"tok"));
		assert!(!constant_time_eq(b"tok", b"tak"));
		assert!(!constant_time_eq(b"tok", b"tok2"));
		assert!(constant_time_eq(b"", b""));
	}

	fn in_an_hour() -> u64 {
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3600
	}

	#[tokio::test]
	async fn issued_token_verifies_to_subject() {
		let token = issue_hmac_token("u1", in_an_hour(), SECRET).unwrap();
		let verifier = HmacTokenVerifier::new(SecretString::new(SECRET));
		assert_eq!(verifier.verify(&token).await.unwrap(), UserId::new("u1").unwrap());
	}

	#[test]
	fn rejects_wrong_secret() {
		let token = issue_hmac_token("u1", in_an_hour(), SECRET).unwrap();
		assert_eq!(verify_hmac_token(&token, "other").unwrap_err(), AuthError::InvalidSignature);
	}

	#[test]
	fn rejects_expired_and_malformed_tokens() {
		let expired = issue_hmac_token("u1", 1, SECRET).unwrap();
		assert_eq!(verify_hmac_token(&expired, SECRET).unwrap_err(), AuthError::Expired);
		assert_eq!(verify_hmac_token("garbage", SECRET).unwrap_err(), AuthError::InvalidFormat);
		assert_eq!(verify_hmac_token("v2.a.b", SECRET).unwrap_err(), AuthError::InvalidFormat);
	}

	#[tokio::test]
	async fn rejects_subjects_that_are_not_valid_user_ids() {
		let token = issue_hmac_token("not a user", in_an_hour(), SECRET).unwrap();
		let verifier = HmacTokenVerifier::new(SecretString::new(SECRET));
		assert!(matches!(
			verifier.verify(&token).await.unwrap_err(),
			AuthError::InvalidClaims(_)
		));
	}
}
