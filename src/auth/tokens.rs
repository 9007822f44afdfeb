//! Token storage and management

use anyhow::{bail, Context, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{wire, Viewer};

/// Seconds before `exp` at which a token is already treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Stored bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    /// Unix seconds, from the JWT `exp` claim.
    pub expires_at: Option<i64>,
}

impl StoredToken {
    /// Wrap a JWT, reading its expiry from the payload.
    pub fn from_jwt(token: &str) -> Result<Self> {
        let claims = Claims::decode(token)?;
        Ok(Self {
            token: token.trim().to_string(),
            expires_at: claims.exp,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(exp) => now + EXPIRY_MARGIN_SECS >= exp,
            None => false,
        }
    }

    /// Identity of the user this token was issued to.
    pub fn viewer(&self) -> Result<Viewer> {
        Claims::decode(&self.token)?.viewer()
    }
}

/// The subset of JWT claims the client reads. Issuers differ in which
/// of these they populate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id")]
    user_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

impl Claims {
    /// Read the claims without checking the signature or any registered
    /// claim; the backend verifies the token on every request and expiry
    /// is judged by `StoredToken` with its own margin.
    fn decode(token: &str) -> Result<Self> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token.trim(), &DecodingKey::from_secret(&[]), &validation)
            .context("Token is not a readable JWT (expected header.payload.signature)")?;
        Ok(data.claims)
    }

    fn viewer(self) -> Result<Viewer> {
        let id = match self.user_id.or(self.id).or_else(|| self.sub.clone()) {
            Some(id) => id,
            None => bail!("JWT carries no user identifier (userId, id or sub)"),
        };
        let name = self
            .name
            .or(self.full_name)
            .or(self.email)
            .or(self.sub)
            .unwrap_or_else(|| id.clone());
        Ok(Viewer::new(id, name))
    }
}

/// Token store trait for different storage backends
pub trait TokenStore {
    fn get_token(&self) -> Option<StoredToken>;
    fn set_token(&mut self, token: StoredToken);
    fn clear_tokens(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    /// Sign with a key the client never sees.
    fn jwt(payload: &str) -> String {
        let claims: serde_json::Value = serde_json::from_str(payload).unwrap();
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-only")).unwrap()
    }

    #[test]
    fn test_viewer_from_numeric_user_id() {
        let token = StoredToken::from_jwt(&jwt(
            r#"{"sub":"sam@example.com","userId":42,"name":"Sam","exp":2000000000}"#,
        ))
        .unwrap();
        assert_eq!(token.expires_at, Some(2_000_000_000));

        let viewer = token.viewer().unwrap();
        assert_eq!(viewer, Viewer::new("42", "Sam"));
    }

    #[test]
    fn test_viewer_falls_back_to_sub() {
        let token = StoredToken::from_jwt(&jwt(r#"{"sub":"sam@example.com"}"#)).unwrap();
        let viewer = token.viewer().unwrap();
        assert_eq!(viewer.id, "sam@example.com");
        assert_eq!(viewer.name, "sam@example.com");
        assert!(!token.is_expired());
    }

    #[test]
    fn test_expired_token_with_audience_still_reads() {
        let token = StoredToken::from_jwt(&jwt(
            r#"{"sub":"sam@example.com","id":"7","aud":"autocare-web","exp":1000}"#,
        ))
        .unwrap();
        assert!(token.is_expired());
        assert_eq!(token.viewer().unwrap().id, "7");
    }

    #[test]
    fn test_expiry_margin() {
        let token = StoredToken {
            token: String::new(),
            expires_at: Some(1_000),
        };
        assert!(!token.is_expired_at(600));
        assert!(token.is_expired_at(700));
    }

    #[test]
    fn test_rejects_non_jwt() {
        tokio_test::assert_err!(StoredToken::from_jwt("opaque-token"));
        tokio_test::assert_err!(StoredToken::from_jwt("a.%%%.c"));
    }
}
