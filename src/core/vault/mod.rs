//! Per-agent credentials vault. Values are encrypted at rest with AES-256-GCM;
//! the key is derived from machine identity so the database file alone is not
//! enough to read secrets. Decrypted credentials are merged into the worker
//! config when an agent starts.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use hmac::Mac;
use rusqlite::Connection;
use sha2::Sha256;
use tokio::sync::Mutex;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Source of linked external-account credentials consulted during agent start.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials_for(&self, agent_id: &str) -> Result<HashMap<String, String>>;
}

pub struct CredentialsVault {
    db: Arc<Mutex<Connection>>,
    cipher: Aes256Gcm,
}

/// Derive a 256-bit encryption key from machine-specific identifiers.
/// Uses HMAC-SHA256(hostname + username, "aviary-vault-v1") so the key is
/// stable across restarts but tied to the local machine/user.
fn derive_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let input = format!("{}{}", hostname, username);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"aviary-vault-v1")
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    let result = mac.finalize();
    let bytes = result.into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

impl CredentialsVault {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is valid for AES-256");
        Self { db, cipher }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS agent_secrets (
                agent_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (agent_id, key)
            )",
            [],
        )?;
        Ok(())
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }

    pub async fn set_secret(&self, agent_id: &str, key: &str, value: &str) -> Result<()> {
        let encrypted = self.encrypt(value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agent_secrets (agent_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(agent_id, key) DO UPDATE SET value=excluded.value",
            (agent_id, key, &encrypted),
        )?;
        Ok(())
    }

    pub async fn get_secret(&self, agent_id: &str, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT value FROM agent_secrets WHERE agent_id = ?1 AND key = ?2")?;
        let mut rows = stmt.query((agent_id, key))?;
        match rows.next()? {
            Some(row) => {
                let stored: String = row.get(0)?;
                Ok(Some(self.decrypt(&stored)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_keys(&self, agent_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT key FROM agent_secrets WHERE agent_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map([agent_id], |row| row.get(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    pub async fn remove_secret(&self, agent_id: &str, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM agent_secrets WHERE agent_id = ?1 AND key = ?2",
            (agent_id, key),
        )?;
        Ok(())
    }

    pub async fn remove_all(&self, agent_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM agent_secrets WHERE agent_id = ?1", [agent_id])?;
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for CredentialsVault {
    async fn credentials_for(&self, agent_id: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = {
            let db = self.db.lock().await;
            let mut stmt =
                db.prepare("SELECT key, value FROM agent_secrets WHERE agent_id = ?1")?;
            let mapped = stmt.query_map([agent_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        };

        let mut credentials = HashMap::new();
        for (key, stored) in rows {
            credentials.insert(key, self.decrypt(&stored)?);
        }
        Ok(credentials)
    }
}
