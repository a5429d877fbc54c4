//! API key store.
//!
//! File-backed authentication for remote callers. The plaintext key is
//! returned exactly once at generation and never persisted; only its
//! SHA-256 hash is stored. Verification compares hashes in constant time
//! and fails closed: an unreadable or corrupt store rejects every key
//! rather than admitting any.
//!
//! Reads run concurrently; writes (generate, revoke, the expiry sweep,
//! and the `last_used_at` update on successful verification) take the
//! exclusive side of the lock so no reader can observe a half-written
//! file. The file is replaced atomically via a same-directory rename.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::constants::keys;
use crate::errors::{KataboxError, KataboxResult};

/// A stored key record. The hash never leaves this module.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApiKeyRecord {
    id: String,
    name: String,
    hash: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    fn metadata(&self) -> ApiKeyMetadata {
        ApiKeyMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Public view of a key record. Exposes neither hash nor plaintext.
#[derive(Clone, Debug, Serialize)]
pub struct ApiKeyMetadata {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A freshly generated key. `plaintext` is shown once and gone.
#[derive(Debug)]
pub struct GeneratedKey {
    pub id: String,
    pub plaintext: String,
}

/// File-backed key store.
pub struct ApiKeyStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    /// Generate a key named `name`, optionally expiring after `ttl_days`.
    pub async fn generate(
        &self,
        name: &str,
        ttl_days: Option<i64>,
    ) -> KataboxResult<GeneratedKey> {
        let _guard = self.lock.write().await;
        let mut records = self.load()?;

        let mut material = [0u8; keys::KEY_BYTES];
        rand::rng().fill_bytes(&mut material);
        let plaintext = format!("{}{}", keys::KEY_PREFIX, URL_SAFE_NO_PAD.encode(material));

        let now = Utc::now();
        let record = ApiKeyRecord {
            id: ulid::Ulid::new().to_string(),
            name: name.to_string(),
            hash: hash_key(&plaintext),
            created_at: now,
            expires_at: ttl_days.map(|days| now + ChronoDuration::days(days)),
            last_used_at: None,
        };
        let id = record.id.clone();
        records.push(record);
        self.save(&records)?;

        tracing::info!(key = %id, name = %name, "api key generated");
        Ok(GeneratedKey { id, plaintext })
    }

    /// Verify a presented key.
    ///
    /// Hash comparison runs in constant time over every record — no early
    /// exit on the first match — so response timing leaks nothing about
    /// stored hashes. `last_used_at` is updated only on success.
    pub async fn verify(&self, presented: &str) -> KataboxResult<ApiKeyMetadata> {
        let _guard = self.lock.write().await;
        // Fail closed: any storage problem rejects the key.
        let mut records = self
            .load()
            .map_err(|_| KataboxError::Unauthorized("key store unavailable".into()))?;

        let presented_hash = hash_key(presented);
        let mut matched: Option<usize> = None;
        for (i, record) in records.iter().enumerate() {
            let equal: bool = presented_hash
                .as_bytes()
                .ct_eq(record.hash.as_bytes())
                .into();
            if equal && matched.is_none() {
                matched = Some(i);
            }
        }

        let Some(index) = matched else {
            return Err(KataboxError::Unauthorized("invalid API key".into()));
        };

        let now = Utc::now();
        if records[index].is_expired(now) {
            return Err(KataboxError::Unauthorized("API key expired".into()));
        }

        records[index].last_used_at = Some(now);
        let metadata = records[index].metadata();
        self.save(&records)
            .map_err(|_| KataboxError::Unauthorized("key store unavailable".into()))?;
        Ok(metadata)
    }

    /// Remove a key by id. Idempotent: revoking an unknown id succeeds.
    pub async fn revoke(&self, id: &str) -> KataboxResult<()> {
        let _guard = self.lock.write().await;
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() != before {
            self.save(&records)?;
            tracing::info!(key = %id, "api key revoked");
        }
        Ok(())
    }

    /// Metadata for every stored key.
    pub async fn list(&self) -> KataboxResult<Vec<ApiKeyMetadata>> {
        let _guard = self.lock.read().await;
        Ok(self.load()?.iter().map(ApiKeyRecord::metadata).collect())
    }

    /// Drop expired records; returns how many were removed.
    pub async fn sweep_expired(&self) -> KataboxResult<usize> {
        let _guard = self.lock.write().await;
        let mut records = self.load()?;
        let now = Utc::now();
        let before = records.len();
        records.retain(|r| !r.is_expired(now));
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records)?;
            tracing::info!(removed, "expired api keys swept");
        }
        Ok(removed)
    }

    fn load(&self) -> KataboxResult<Vec<ApiKeyRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read(&self.path).map_err(|e| {
            KataboxError::Storage(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            KataboxError::Storage(format!("corrupt key store {}: {}", self.path.display(), e))
        })
    }

    /// Atomic replace with owner-only permissions.
    fn save(&self, records: &[ApiKeyRecord]) -> KataboxResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| {
            KataboxError::Storage(format!("cannot create {}: {}", parent.display(), e))
        })?;

        let tmp = self.path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(records)
            .map_err(|e| KataboxError::Storage(format!("cannot encode key store: {}", e)))?;
        std::fs::write(&tmp, data)
            .map_err(|e| KataboxError::Storage(format!("cannot write {}: {}", tmp.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).map_err(
                |e| KataboxError::Storage(format!("cannot chmod {}: {}", tmp.display(), e)),
            )?;
        }

        std::fs::rename(&tmp, &self.path).map_err(|e| {
            KataboxError::Storage(format!("cannot replace {}: {}", self.path.display(), e))
        })
    }
}

fn hash_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}
