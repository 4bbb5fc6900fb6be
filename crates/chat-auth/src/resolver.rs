//! Identity resolution for attaching connections.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::errors::AuthError;

/// A resolved user: the opaque token the connection presented and the
/// display name it maps to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Session token (stable session identity inside the hub).
    pub token: String,
    /// Display name.
    pub name: String,
}

/// Maps a session token to a user. Called once per attach.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token` or fail, in which case the connection is rejected.
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Default minimum time between two re-reads of the backing file.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// Token → name table, optionally backed by a JSON file.
///
/// On a miss the backing file is re-read so tokens issued after startup
/// resolve without a restart. Misses check the file at most once per reload
/// interval and re-parse it only when its modification time changed, so a
/// flood of unknown tokens costs a map lookup each.
pub struct TokenTable {
    entries: RwLock<HashMap<String, String>>,
    path: Option<PathBuf>,
    reload_interval: Duration,
    reload: Mutex<ReloadState>,
}

#[derive(Debug)]
struct ReloadState {
    checked_at: Instant,
    modified: Option<SystemTime>,
}

impl TokenTable {
    /// In-memory table with no backing file.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
            path: None,
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            reload: Mutex::new(ReloadState {
                checked_at: Instant::now(),
                modified: None,
            }),
        }
    }

    /// Table backed by `path`. A missing file yields an empty table.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let modified = modified_at(&path);
        let entries = read_table(&path)?;
        debug!(path = %path.display(), tokens = entries.len(), "token table loaded");
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            reload: Mutex::new(ReloadState {
                checked_at: Instant::now(),
                modified,
            }),
        })
    }

    /// Minimum time between two checks of the backing file.
    #[must_use]
    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn lookup(&self, token: &str) -> Option<String> {
        self.entries.read().get(token).cloned()
    }

    /// Re-read the backing file if the interval has passed and the file
    /// changed since the last read. Returns whether the table was replaced.
    fn reload_if_changed(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        {
            let mut state = self.reload.lock();
            if state.checked_at.elapsed() < self.reload_interval {
                return false;
            }
            state.checked_at = Instant::now();
            let modified = modified_at(path);
            if modified == state.modified {
                return false;
            }
            state.modified = modified;
        }
        match read_table(path) {
            Ok(entries) => {
                debug!(path = %path.display(), tokens = entries.len(), "token table reloaded");
                *self.entries.write() = entries;
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "token table reload failed");
                false
            }
        }
    }
}

#[async_trait]
impl IdentityResolver for TokenTable {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        let name = match self.lookup(token) {
            Some(name) => name,
            None if self.reload_if_changed() => {
                self.lookup(token).ok_or(AuthError::UnknownToken)?
            }
            None => return Err(AuthError::UnknownToken),
        };
        Ok(Identity {
            token: token.to_owned(),
            name,
        })
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_table(path: &Path) -> Result<HashMap<String, String>, AuthError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TokenTable {
        TokenTable::new([("tok-A".to_string(), "alice".to_string())])
    }

    #[tokio::test]
    async fn resolves_known_token() {
        let id = table().resolve("tok-A").await.unwrap();
        assert_eq!(
            id,
            Identity {
                token: "tok-A".into(),
                name: "alice".into()
            }
        );
    }

    #[tokio::test]
    async fn unknown_token_fails() {
        let err = table().resolve("tok-Z").await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownToken));
    }

    #[tokio::test]
    async fn empty_token_fails() {
        let err = table().resolve("").await.unwrap_err();
        assert!(matches!(err, AuthError::EmptyToken));
    }

    /// Rewrite `path` with `content` and stamp it `offset` after `base`.
    fn rewrite(path: &Path, content: &str, base: SystemTime, offset: Duration) {
        std::fs::write(path, content).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(base + offset).unwrap();
    }

    fn file_table(dir: &Path, interval: Duration) -> (PathBuf, SystemTime, TokenTable) {
        let path = dir.join("tokens.json");
        std::fs::write(&path, r#"{"tok-A":"alice"}"#).unwrap();
        let base = modified_at(&path).unwrap();
        let table = TokenTable::from_file(&path)
            .unwrap()
            .with_reload_interval(interval);
        (path, base, table)
    }

    #[tokio::test]
    async fn file_table_picks_up_new_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let (path, base, table) = file_table(dir.path(), Duration::ZERO);
        assert_eq!(table.len(), 1);
        assert!(table.resolve("tok-B").await.is_err());

        rewrite(&path, r#"{"tok-A":"alice","tok-B":"bob"}"#, base, Duration::from_secs(10));
        assert_eq!(table.resolve("tok-B").await.unwrap().name, "bob");
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_file_is_not_reparsed_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let (path, base, table) = file_table(dir.path(), Duration::ZERO);

        // New content, same modification time: misses must not re-read.
        rewrite(&path, r#"{"tok-A":"alice","tok-B":"bob"}"#, base, Duration::ZERO);
        for _ in 0..100 {
            assert!(matches!(
                table.resolve("tok-B").await,
                Err(AuthError::UnknownToken)
            ));
        }
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn misses_inside_interval_do_not_touch_file() {
        let dir = tempfile::tempdir().unwrap();
        let (path, base, table) = file_table(dir.path(), Duration::from_secs(3600));

        rewrite(&path, r#"{"tok-A":"alice","tok-B":"bob"}"#, base, Duration::from_secs(10));
        for _ in 0..100 {
            assert!(table.resolve("tok-B").await.is_err());
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("tok-A").await.unwrap().name, "alice");
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (path, base, table) = file_table(dir.path(), Duration::ZERO);

        rewrite(&path, "not json", base, Duration::from_secs(10));
        assert!(table.resolve("tok-B").await.is_err());
        assert_eq!(table.resolve("tok-A").await.unwrap().name, "alice");
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = TokenTable::from_file(dir.path().join("absent.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "[1,2]").unwrap();
        assert!(matches!(
            TokenTable::from_file(&path),
            Err(AuthError::Json(_))
        ));
    }
}
