// Credential store module
// Keyed collection of per-channel credential records with encrypted refresh tokens

mod file;
mod memory;
mod sqlite;
mod types;

pub use file::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use types::{CredentialRecord, StoredCredentials, TokenSet};

use parking_lot::Mutex;

use crate::crypto::TokenCipher;
use crate::error::StoreError;

/// Persistence seam for the credential collection.
///
/// Backends read and write the whole ordered collection as one unit; the store
/// layers upsert semantics and encryption on top.
pub trait StoreBackend: Send + Sync {
    /// Create the backing collection if it does not exist yet
    fn initialize(&self) -> Result<(), StoreError>;

    /// Read every record in stored order (empty if never initialized)
    fn read_all(&self) -> Result<Vec<CredentialRecord>, StoreError>;

    /// Replace the persisted collection
    fn write_all(&self, records: &[CredentialRecord]) -> Result<(), StoreError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Repository of channel credentials.
///
/// `save` is a read-modify-write over the whole collection. Saves through one
/// `CredentialStore` are serialized by an in-process writer lock; separate
/// processes or store instances sharing a file still race, last write wins.
pub struct CredentialStore {
    backend: Box<dyn StoreBackend>,
    cipher: TokenCipher,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(backend: impl StoreBackend + 'static, cipher: TokenCipher) -> Self {
        Self {
            backend: Box::new(backend),
            cipher,
            write_lock: Mutex::new(()),
        }
    }

    /// Create the backing collection if absent; no-op otherwise
    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.backend.initialize()?;
        tracing::debug!("Credential store ready at {}", self.backend.describe());
        Ok(())
    }

    /// Insert or replace the record for `channel_id`
    pub fn save(&self, channel_id: &str, tokens: &TokenSet) -> Result<(), StoreError> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .map(|token| self.cipher.encrypt(token))
            .transpose()?;

        let record = CredentialRecord {
            channel_id: channel_id.to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token,
            expiry_date: tokens.expiry_date,
        };

        let _guard = self.write_lock.lock();
        let mut records = self.backend.read_all()?;

        let replaced = match records.iter_mut().find(|r| r.channel_id == channel_id) {
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                records.push(record);
                false
            }
        };

        self.backend.write_all(&records)?;

        tracing::info!(
            channel_id = %channel_id,
            replaced,
            total = records.len(),
            has_refresh_token = tokens.refresh_token.is_some(),
            "Saved channel credentials"
        );

        Ok(())
    }

    /// Load and decrypt the credentials for `channel_id`
    pub fn load(&self, channel_id: &str) -> Result<Option<StoredCredentials>, StoreError> {
        let records = self.backend.read_all()?;

        records
            .into_iter()
            .find(|r| r.channel_id == channel_id)
            .map(|record| self.decrypt_record(record))
            .transpose()
    }

    /// Load the record at the first stored position.
    ///
    /// Only meaningful while a single channel is stored; with several records
    /// the result is whichever was saved first, not the most recent one.
    pub fn load_first(&self) -> Result<Option<StoredCredentials>, StoreError> {
        let records = self.backend.read_all()?;

        if records.len() > 1 {
            tracing::warn!(
                total = records.len(),
                "Multiple channels stored; falling back to the first stored record"
            );
        }

        records
            .into_iter()
            .next()
            .map(|record| self.decrypt_record(record))
            .transpose()
    }

    /// Stored channel ids in stored order
    pub fn channel_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .backend
            .read_all()?
            .into_iter()
            .map(|r| r.channel_id)
            .collect())
    }

    fn decrypt_record(&self, record: CredentialRecord) -> Result<StoredCredentials, StoreError> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .map(|blob| self.cipher.decrypt(blob))
            .transpose()
            .map_err(|e| {
                tracing::error!(channel_id = %record.channel_id, "Refresh token failed to decrypt: {}", e);
                e
            })?;

        Ok(StoredCredentials {
            channel_id: record.channel_id,
            tokens: TokenSet {
                access_token: record.access_token,
                refresh_token,
                expiry_date: record.expiry_date,
            },
        })
    }
}
