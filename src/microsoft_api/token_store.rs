//! Credential cache file.
//!
//! One JSON file holding the last issued `MicrosoftToken`. Written atomically
//! with owner-only permissions on unix; treated as a secret.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::MicrosoftToken;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached token. `Ok(None)` when no cache file exists.
    pub fn load(&self) -> Result<Option<MicrosoftToken>, TokenStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let token: MicrosoftToken = serde_json::from_str(&content)?;
        Ok(Some(token))
    }

    /// Persist a token, replacing any previous cache.
    pub fn save(&self, token: &MicrosoftToken) -> Result<(), TokenStoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            std::fs::create_dir_all(&parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        let content = serde_json::to_string_pretty(token)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> MicrosoftToken {
        MicrosoftToken {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            client_id: "client".to_string(),
            scopes: vec!["Mail.ReadWrite".to_string()],
            expiry: Some("2030-01-01T00:00:00+00:00".to_string()),
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.json"));

        store.save(&sample_token()).unwrap();
        let mut second = sample_token();
        second.access_token = "newer".to_string();
        store.save(&second).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "newer");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&sample_token()).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_cache_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        let store = TokenStore::new(path);
        assert!(matches!(store.load(), Err(TokenStoreError::Json(_))));
    }
}
