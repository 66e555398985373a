//! Trait-only contract for the credential/master-data service that owns API
//! keys. Out of scope per spec.md §1; only the lookup contract and a SHA-256
//! hashing helper live here, plus an in-memory test double.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("credential store unreachable: {0}")]
    BackendUnreachable(String),
}

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub user_id: String,
    pub role: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup_by_hash(&self, api_key_hash: &str) -> Result<Option<ApiKeyRecord>, CredentialStoreError>;
}

/// Raw API keys carry the literal prefix `evp_` followed by 32 random bytes,
/// base64url-encoded; the hash stored and looked up is SHA-256 of the raw
/// key, never the key itself.
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct InMemoryCredentialStore {
    records: Mutex<HashMap<String, ApiKeyRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, api_key_hash: impl Into<String>, record: ApiKeyRecord) {
        self.records.lock().await.insert(api_key_hash.into(), record);
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup_by_hash(&self, api_key_hash: &str) -> Result<Option<ApiKeyRecord>, CredentialStoreError> {
        Ok(self.records.lock().await.get(api_key_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_never_echoes_the_key() {
        let hash = hash_api_key("evp_abc123");
        assert_eq!(hash, hash_api_key("evp_abc123"));
        assert!(!hash.contains("evp_abc123"));
    }

    #[test]
    fn revoked_key_is_never_valid() {
        let record = ApiKeyRecord {
            user_id: "user-1".to_string(),
            role: "producer".to_string(),
            revoked_at: Some(Utc::now()),
            expires_at: None,
        };
        assert!(!record.is_valid(Utc::now()));
    }

    #[test]
    fn expired_key_is_invalid() {
        let record = ApiKeyRecord {
            user_id: "user-1".to_string(),
            role: "producer".to_string(),
            revoked_at: None,
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        };
        assert!(!record.is_valid(Utc::now()));
    }

    #[tokio::test]
    async fn lookup_returns_none_for_unknown_hash() {
        let store = InMemoryCredentialStore::new();
        assert!(store.lookup_by_hash("nope").await.unwrap().is_none());
    }
}
