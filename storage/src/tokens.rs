use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use signalhub_core::{types::Token, Error, Result};
use sqlx::PgPool;

const NONCE_LEN: usize = 12;
const TWITCH_OAUTH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Encrypts `access_token`/`refresh_token` at rest with AES-256-GCM; the
/// 12-byte nonce is generated per write and stored alongside the
/// ciphertext.
pub struct TokenStore {
    pool: PgPool,
    cipher: Aes256Gcm,
    http: reqwest::Client,
}

impl TokenStore {
    /// `key` must be exactly 32 bytes (a base64/hex-decoded secret from
    /// configuration, never a passphrase hashed in-process).
    pub fn new(pool: PgPool, key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::Configuration(format!(
                "token encryption key must be 32 bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Ok(Self {
            pool,
            cipher,
            http: reqwest::Client::new(),
        })
    }

    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Configuration(format!("token encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, stored: &[u8]) -> Result<String> {
        if stored.len() < NONCE_LEN {
            return Err(Error::Configuration("stored token ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = stored.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Configuration(format!("token decryption failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::Configuration(format!("decrypted token not utf8: {e}")))
    }

    pub async fn get(&self, service: &str, user_id: &str) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT service, user_id, access_token_enc, refresh_token_enc, expires_at, scopes \
             FROM tokens WHERE service = $1 AND user_id = $2",
        )
        .bind(service)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Ok(Some(self.decrypt_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, token: &Token) -> Result<()> {
        let access_enc = self.encrypt(&token.access_token)?;
        let refresh_enc = self.encrypt(&token.refresh_token)?;
        let scopes = serde_json::to_value(&token.scopes).map_err(Error::Serialization)?;

        sqlx::query(
            "INSERT INTO tokens (service, user_id, access_token_enc, refresh_token_enc, expires_at, scopes, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now()) \
             ON CONFLICT (service, user_id) DO UPDATE SET \
             access_token_enc = EXCLUDED.access_token_enc, \
             refresh_token_enc = EXCLUDED.refresh_token_enc, \
             expires_at = EXCLUDED.expires_at, \
             scopes = EXCLUDED.scopes, \
             updated_at = now()",
        )
        .bind(&token.service)
        .bind(&token.user_id)
        .bind(access_enc)
        .bind(refresh_enc)
        .bind(token.expires_at)
        .bind(scopes)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Exchanges the stored refresh token for a new access/refresh pair and
    /// persists the result, called by the EventSub adapter and ad scheduler
    /// when Twitch rejects the current access token with a 401.
    pub async fn refresh(&self, client_id: &str, client_secret: &str, service: &str, user_id: &str) -> Result<Token> {
        let current = self
            .get(service, user_id)
            .await?
            .ok_or_else(|| Error::AuthExpired(format!("no stored token for {service}/{user_id}")))?;

        let resp = self
            .http
            .post(TWITCH_OAUTH_TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &current.refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(format!("token refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::AuthExpired(format!(
                "token refresh rejected with status {}",
                resp.status()
            )));
        }

        let body: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| Error::TransientNetwork(format!("token refresh response malformed: {e}")))?;

        let refreshed = Token {
            service: service.to_string(),
            user_id: user_id.to_string(),
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: Some(Utc::now() + chrono::Duration::seconds(body.expires_in)),
            scopes: body.scope.unwrap_or_default(),
        };
        self.put(&refreshed).await?;
        Ok(refreshed)
    }

    fn decrypt_row(&self, row: TokenRow) -> Result<Token> {
        Ok(Token {
            service: row.service,
            user_id: row.user_id,
            access_token: self.decrypt(&row.access_token_enc)?,
            refresh_token: self.decrypt(&row.refresh_token_enc)?,
            expires_at: row.expires_at,
            scopes: serde_json::from_value(row.scopes).map_err(Error::Serialization)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    scope: Option<Vec<String>>,
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    service: String,
    user_id: String,
    access_token_enc: Vec<u8>,
    refresh_token_enc: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    scopes: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&[7u8; 32]))
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = [7u8; 32];
        let cipher = test_cipher();
        let store = TokenStore {
            pool: unreachable_pool(),
            cipher,
            http: reqwest::Client::new(),
        };
        let ciphertext = store.encrypt("super-secret-access-token").unwrap();
        assert_ne!(ciphertext, b"super-secret-access-token".to_vec());
        let recovered = store.decrypt(&ciphertext).unwrap();
        assert_eq!(recovered, "super-secret-access-token");
        let _ = key;
    }

    #[test]
    fn rejects_wrong_key_length() {
        let err = TokenStore::new(unreachable_pool(), &[1u8; 16]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    /// A `PgPool` is never actually connected to in these unit tests; sqlx
    /// pools are lazy until a query runs, so this is safe for testing the
    /// pure encrypt/decrypt path.
    fn unreachable_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool construction")
    }
}
