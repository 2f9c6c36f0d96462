//! Credential cache for the identity provider.
//!
//! Keeps the signed-in account and its refresh token in a JSON file in the
//! platform config directory, so a later run can acquire tokens silently.

pub mod secure;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::provider::Account;
use crate::error::CacheError;
use secure::RefreshToken;

/// Cache file name.
const CACHE_FILE: &str = "credential_cache.json";

/// Get the path to the credential cache file.
///
/// Returns `~/.config/graph-connect/credential_cache.json` on Linux.
pub fn default_cache_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "graph-connect", "graph-connect")
        .map(|dirs| dirs.config_dir().join(CACHE_FILE))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheContents {
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    account: Account,
    refresh_token: RefreshToken,
    updated_at: DateTime<Utc>,
}

/// Account and refresh-token storage.
#[derive(Debug)]
pub struct CredentialCache {
    /// Backing file; `None` keeps everything in memory.
    path: Option<PathBuf>,
    contents: Mutex<CacheContents>,
}

impl CredentialCache {
    /// Create a cache that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            contents: Mutex::new(CacheContents::default()),
        }
    }

    /// Load the cache from the default location.
    pub fn load_default() -> Result<Self, CacheError> {
        let path = default_cache_path().ok_or(CacheError::NoConfigDir)?;
        Ok(Self::load(path))
    }

    /// Load the cache from disk.
    ///
    /// Starts empty if the file doesn't exist or is corrupted.
    pub fn load(path: PathBuf) -> Self {
        let contents = read_contents(&path);
        Self {
            path: Some(path),
            contents: Mutex::new(contents),
        }
    }

    /// Cached accounts, most recently updated first.
    ///
    /// Files written by `store` hold at most one entry.
    pub fn accounts(&self) -> Vec<Account> {
        let contents = self.lock();
        let mut entries: Vec<&CacheEntry> = contents.entries.iter().collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries.into_iter().map(|e| e.account.clone()).collect()
    }

    /// Refresh token for an account.
    pub fn refresh_token(&self, account_id: &str) -> Result<RefreshToken, CacheError> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.account.id == account_id)
            .map(|e| e.refresh_token.clone())
            .ok_or(CacheError::NotFound)
    }

    /// Store the credential for an account, replacing whatever was cached.
    ///
    /// The cache holds one signed-in user; signing in as someone else evicts
    /// the previous account.
    pub fn store(&self, account: &Account, refresh_token: RefreshToken) -> Result<(), CacheError> {
        let mut contents = self.lock();
        if contents.entries.iter().any(|e| e.account.id != account.id) {
            debug!("Evicting previously cached account");
        }
        contents.entries.clear();
        contents.entries.push(CacheEntry {
            account: account.clone(),
            refresh_token,
            updated_at: Utc::now(),
        });
        self.persist(&contents)
    }

    /// Forget an account and its refresh token.
    pub fn remove(&self, account_id: &str) -> Result<(), CacheError> {
        let mut contents = self.lock();
        let before = contents.entries.len();
        contents.entries.retain(|e| e.account.id != account_id);

        if contents.entries.len() == before {
            return Err(CacheError::NotFound);
        }

        self.persist(&contents)
    }

    fn lock(&self) -> MutexGuard<'_, CacheContents> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, contents: &CacheContents) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(contents)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;

        // Write a private temp file and rename it into place, so the tokens are
        // never readable by others and a crash can't leave a truncated cache.
        let tmp = temp_path(path);
        if tmp.exists() {
            fs::remove_file(&tmp).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        }

        let written = create_private(&tmp).and_then(|mut file| {
            file.write_all(json.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::WriteFailed(e.to_string()));
        }

        debug!("Saved credential cache to {:?}", path);
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_contents(path: &Path) -> CacheContents {
    if !path.exists() {
        debug!("Credential cache does not exist yet");
        return CacheContents::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to parse credential cache: {}, starting empty", e);
                CacheContents::default()
            }
        },
        Err(e) => {
            warn!("Failed to read credential cache: {}, starting empty", e);
            CacheContents::default()
        }
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
