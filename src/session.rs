use cookie::{Cookie, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::quiz::{Error, Result};
use crate::time::Timestamp;

pub const SESSION_COOKIE: &str = "session";

const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Nothing is stored server-side: the token alone proves identity,
/// which also means it can't be revoked before it expires.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

pub struct SessionKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

// the jsonwebtoken key types hold secret material and expose no Debug impl
impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

impl SessionKey {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String> {
        let now = Timestamp::now().map_err(|()| Error::Internal)?;

        let claims = Claims {
            sub: user_id.into(),
            iat: now.as_secs(),
            exp: now.plus_secs(SESSION_TTL_SECS).as_secs(),
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            error!("couldn't sign session token: {e}");
            Error::Internal
        })
    }

    /// Returns the user id the token was issued for. Bad signatures and
    /// expired tokens are indistinguishable to the client.
    pub fn verify(&self, token: &str) -> Result<String> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|e| {
                debug!("rejecting session token: {e}");
                Error::Unauthorized
            })
    }
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(::time::Duration::seconds(SESSION_TTL_SECS))
        .secure(secure)
        .build()
        .to_string()
}

pub fn clear_session_cookie(secure: bool) -> String {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(::time::Duration::ZERO)
        .secure(secure)
        .build()
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new("test-secret")
    }

    #[test]
    fn issue_and_verify() {
        let key = key();
        let token = key.issue("user-1").unwrap();

        assert_eq!(key.verify(&token).unwrap(), "user-1");
    }

    #[test]
    fn tampered_token_rejected() {
        let key = key();
        let token = key.issue("user-1").unwrap();

        // corrupt the signature
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        assert_eq!(key.verify(&tampered), Err(Error::Unauthorized));
    }

    #[test]
    fn wrong_key_rejected() {
        let token = key().issue("user-1").unwrap();

        let other = SessionKey::new("another-secret");
        assert_eq!(other.verify(&token), Err(Error::Unauthorized));
    }

    #[test]
    fn expired_token_rejected() {
        let key = key();
        let now = Timestamp::now().unwrap().as_secs();

        // expired a day ago, well past any validation leeway
        let claims = Claims {
            sub: "user-1".into(),
            iat: now - 2 * SESSION_TTL_SECS,
            exp: now - 24 * 60 * 60,
        };
        let token = encode(&Header::default(), &claims, &key.encoding).unwrap();

        assert_eq!(key.verify(&token), Err(Error::Unauthorized));
    }

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("tok", true);

        assert!(cookie.starts_with("session=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));

        let insecure = session_cookie("tok", false);
        assert!(!insecure.contains("Secure"));
    }

    #[test]
    fn clear_cookie_empties_value() {
        let cookie = clear_session_cookie(false);

        assert!(cookie.starts_with("session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
