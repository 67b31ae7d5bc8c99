//! Durable client-side storage for the session token.
//!
//! The file store behaves like browser local storage: one JSON object of
//! string keys, of which the session owns [`TOKEN_KEY`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

use pony_types::api::Claims;

use crate::error::{ClientError, Result};

pub const TOKEN_KEY: &str = "pony_express.token";

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

// -- File --

pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                ClientError::Storage(format!("corrupt storage file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(storage_err(&self.path, e)),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| storage_err(parent, e))?;
            }
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        // Write-then-rename.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| storage_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| storage_err(&self.path, e))
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|e| ClientError::Storage(format!("storage lock poisoned: {}", e)))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.read_map()?.remove(TOKEN_KEY))
    }

    fn save(&self, token: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut map = self.read_map()?;
        map.insert(TOKEN_KEY.to_string(), token.to_string());
        self.write_map(&map)
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.guard()?;
        let mut map = self.read_map()?;
        if map.remove(TOKEN_KEY).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

fn storage_err(path: &Path, e: std::io::Error) -> ClientError {
    ClientError::Storage(format!("{}: {}", path.display(), e))
}

// -- Memory --

/// Non-durable store for tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let guard = self
            .token
            .lock()
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        *guard = None;
        Ok(())
    }
}

// -- Expiry --

/// True when `token` is a JWT whose `exp` has passed.
///
/// The signature is not checked; the client holds no key. Tokens that are
/// not JWTs never expire here.
pub fn token_expired(token: &str) -> bool {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.leeway = 0;

    match decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(_) => false,
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => true,
        Err(e) => {
            debug!("Persisted token is not a readable JWT ({}), keeping it", e);
            false
        }
    }
}
