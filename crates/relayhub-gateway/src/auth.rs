//! Connection identity resolution (§4.12): bearer-token verification and
//! the anonymous fallback.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use relayhub_core::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
}

/// Resolves the caller's identity from an optional bearer token. `Ok(None)`
/// means the connection is anonymous; the caller decides whether that's
/// acceptable against `AuthConfig::allow_anonymous`.
pub fn resolve_token(token: Option<&str>, jwt_secret: Option<&str>) -> Result<Option<UserId>, String> {
    let Some(token) = token else { return Ok(None) };
    let Some(secret) = jwt_secret else {
        return Err("token auth is not configured on this server".to_string());
    };
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::new(Algorithm::HS256))
        .map_err(|e| e.to_string())?;
    Ok(Some(UserId::from(data.claims.sub)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn anonymous_when_no_token_presented() {
        assert!(resolve_token(None, Some("secret")).unwrap().is_none());
    }

    #[test]
    fn rejects_token_when_auth_not_configured() {
        assert!(resolve_token(Some("whatever"), None).is_err());
    }

    #[test]
    fn decodes_a_valid_token() {
        let token = encode(&Header::default(), &Claims { sub: "user-123".into() }, &EncodingKey::from_secret(b"secret")).unwrap();
        let resolved = resolve_token(Some(&token), Some("secret")).unwrap();
        assert_eq!(resolved.unwrap().as_str(), "user-123");
    }

    #[test]
    fn rejects_a_token_signed_with_the_wrong_secret() {
        let token = encode(&Header::default(), &Claims { sub: "user-123".into() }, &EncodingKey::from_secret(b"other")).unwrap();
        assert!(resolve_token(Some(&token), Some("secret")).is_err());
    }
}
