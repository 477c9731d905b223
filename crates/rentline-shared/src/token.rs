//! Signed bearer tokens.
//!
//! A token is `base64url(claims_json) "." base64url(ed25519_signature)`,
//! where the signature covers the encoded claims segment. The server holds
//! the signing key; anything that only needs to check tokens can work from
//! a [`TokenVerifier`] built from the public half.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::SIGNING_SEED_SIZE;
use crate::error::TokenError;
use crate::types::{Principal, Role, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: UserId,
    pub name: String,
    pub role: Role,
    /// Expiry as a unix timestamp (seconds)
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(principal: &Principal, valid_until: DateTime<Utc>) -> Self {
        Self {
            sub: principal.user_id,
            name: principal.display_name.clone(),
            role: principal.role,
            exp: valid_until.timestamp(),
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.sub, self.name.clone(), self.role)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

pub struct TokenSigner {
    key: SigningKey,
}

impl TokenSigner {
    pub fn from_seed(seed: &[u8; SIGNING_SEED_SIZE]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.key.verifying_key())
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signature = self.key.sign(payload.as_bytes());
        Ok(format!(
            "{}.{}",
            payload,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Mint a token for `principal` that stays valid for `valid_for`.
    pub fn issue(&self, principal: &Principal, valid_for: Duration) -> Result<String, TokenError> {
        self.sign(&AccessClaims::new(principal, Utc::now() + valid_for))
    }
}

#[derive(Debug, Clone)]
pub struct TokenVerifier {
    key: VerifyingKey,
}

impl TokenVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;

        let signature_bytes = URL_SAFE_NO_PAD.decode(signature)?;
        let signature =
            Signature::from_slice(&signature_bytes).map_err(|_| TokenError::Malformed)?;
        self.key
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: AccessClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
        if claims.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn signer() -> TokenSigner {
        TokenSigner {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    fn staff() -> Principal {
        Principal::new(UserId::new(), "Dana", Role::Staff)
    }

    #[test]
    fn test_token_valid() {
        let signer = signer();
        let principal = staff();
        let token = signer.issue(&principal, Duration::hours(1)).unwrap();

        let claims = signer.verifier().verify(&token).unwrap();
        assert_eq!(claims.principal(), principal);
    }

    #[test]
    fn test_token_expired() {
        let signer = signer();
        let token = signer.issue(&staff(), Duration::hours(-1)).unwrap();

        assert!(matches!(
            signer.verifier().verify(&token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_token_wrong_key() {
        let token = signer().issue(&staff(), Duration::hours(1)).unwrap();

        assert!(matches!(
            signer().verifier().verify(&token),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_token_tampered_claims() {
        let signer = signer();
        let token = signer.issue(&staff(), Duration::hours(1)).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let mut forged = AccessClaims::new(&staff(), Utc::now() + Duration::hours(1));
        forged.role = Role::Admin;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        let result = signer
            .verifier()
            .verify(&format!("{forged_payload}.{signature}"));
        assert!(matches!(result, Err(TokenError::BadSignature)));
    }

    #[test]
    fn test_token_malformed() {
        assert!(matches!(
            signer().verifier().verify("no-dot-here"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = TokenSigner::from_seed(&[7u8; 32]);
        let b = TokenSigner::from_seed(&[7u8; 32]);
        let token = a.issue(&staff(), Duration::minutes(5)).unwrap();
        assert!(b.verifier().verify(&token).is_ok());
    }
}
