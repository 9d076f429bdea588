use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::Site;

/// One browser cookie, as persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Unix timestamp, seconds. None for session cookies.
    pub expires: Option<f64>,
}

/// Serialized per-site browser identity: cookies plus localStorage entries.
/// Replayed into a fresh context so a future visit looks like a returning
/// client. Always replaced wholesale, never merged.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionState {
    pub cookies: Vec<StoredCookie>,
    pub local_storage: HashMap<String, String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty()
    }
}

/// Disk-backed store of per-site session state, one JSON file per site.
///
/// Losing a session is a degraded-performance event, not a correctness
/// failure: loads never error (corrupt data reads as absent) and save
/// failures are logged and swallowed.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, site: Site) -> PathBuf {
        self.root.join(format!("{site}.json"))
    }

    pub fn has(&self, site: Site) -> bool {
        self.path_for(site).exists()
    }

    /// Load the stored session for a site. Missing or corrupt files read as
    /// `None`; the caller proceeds with a fresh anonymous session.
    pub fn load(&self, site: Site) -> Option<SessionState> {
        let path = self.path_for(site);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        match serde_json::from_str::<SessionState>(&raw) {
            Ok(state) => {
                debug!(%site, cookies = state.cookies.len(), "loaded session");
                Some(state)
            }
            Err(e) => {
                warn!(%site, error = %e, "corrupt session file, starting fresh");
                None
            }
        }
    }

    /// Overwrite the stored session for a site. Full-file replace; errors are
    /// logged and swallowed.
    pub fn save(&self, site: Site, mut state: SessionState) {
        state.saved_at = Some(Utc::now());
        if let Err(e) = self.try_save(site, &state) {
            warn!(%site, error = %e, "failed to persist session");
        }
    }

    fn try_save(&self, site: Site, state: &SessionState) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(self.path_for(site), body)
    }

    pub fn delete(&self, site: Site) {
        let path = self.path_for(site);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(%site, error = %e, "failed to delete session file");
            }
        }
    }

    /// Minutes since the session was last saved, or -1 when absent.
    pub fn age_minutes(&self, site: Site) -> i64 {
        match self.load(site).and_then(|s| s.saved_at) {
            Some(saved_at) => (Utc::now() - saved_at).num_minutes().max(0),
            None => -1,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_state() -> SessionState {
        SessionState {
            cookies: vec![StoredCookie {
                name: "bm_sv".to_string(),
                value: "abc123".to_string(),
                domain: ".zara.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
                expires: Some(1_900_000_000.0),
            }],
            local_storage: HashMap::from([("cart".to_string(), "{}".to_string())]),
            saved_at: None,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        assert!(!store.has(Site::Zara));
        assert!(store.load(Site::Zara).is_none());

        store.save(Site::Zara, sample_state());
        assert!(store.has(Site::Zara));

        let loaded = store.load(Site::Zara).unwrap();
        assert_eq!(loaded.cookies, sample_state().cookies);
        assert_eq!(loaded.local_storage, sample_state().local_storage);
        assert!(loaded.saved_at.is_some());
    }

    #[test]
    fn test_sites_are_keyed_independently() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(Site::Zara, sample_state());
        assert!(store.has(Site::Zara));
        assert!(!store.has(Site::Bershka));
        assert_eq!(store.age_minutes(Site::Bershka), -1);
    }

    #[test]
    fn test_corrupt_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("zara.json"), b"{not json").unwrap();

        assert!(store.has(Site::Zara));
        assert!(store.load(Site::Zara).is_none());
        assert_eq!(store.age_minutes(Site::Zara), -1);
    }

    #[test]
    fn test_save_is_full_replace() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(Site::Zara, sample_state());

        let mut replacement = SessionState::default();
        replacement.local_storage.insert("k".to_string(), "v".to_string());
        store.save(Site::Zara, replacement.clone());

        let loaded = store.load(Site::Zara).unwrap();
        assert!(loaded.cookies.is_empty()); // old cookies gone, not merged
        assert_eq!(loaded.local_storage, replacement.local_storage);
    }

    #[test]
    fn test_delete_and_age() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(Site::Bershka, sample_state());
        assert_eq!(store.age_minutes(Site::Bershka), 0);

        store.delete(Site::Bershka);
        assert!(!store.has(Site::Bershka));
        assert_eq!(store.age_minutes(Site::Bershka), -1);

        // Deleting an absent session is a no-op
        store.delete(Site::Bershka);
    }

    #[test]
    fn test_save_into_missing_directory_is_swallowed() {
        // Point at a path whose parent cannot be created (a file in the way).
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let store = SessionStore::new(blocker.join("nested"));
        store.save(Site::Zara, sample_state()); // must not panic
        assert!(store.load(Site::Zara).is_none());
    }
}
