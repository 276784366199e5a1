//! Credential file store.
//!
//! Credentials live as `auth-<N>.json` files in one directory; `N` is the
//! account index and higher `N` is newer. Files sharing a normalized email
//! are one account: the numerically greatest index in the group is its
//! canonical representative and the only one eligible for rotation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use {
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

const AUTH_FILE_PREFIX: &str = "auth-";
const AUTH_FILE_SUFFIX: &str = ".json";

/// Normalize an email key: trim, lowercase, and require `local@domain.tld`.
///
/// Returns `None` for anything that does not look like an email; such
/// accounts are never deduplicated.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.contains(char::is_whitespace) {
        return None;
    }
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.contains('@') {
        return None;
    }
    let (host, tld) = domain.rsplit_once('.')?;
    if host.is_empty() || tld.is_empty() {
        return None;
    }
    Some(email)
}

/// One per-email consolidation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub email: String,
    pub kept_index: usize,
    pub removed_indices: Vec<usize>,
}

/// Status-surface view of a single account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub index: usize,
    pub name: Option<String>,
    pub is_invalid: bool,
    pub is_duplicate: bool,
    pub is_rotation: bool,
    pub is_expired: bool,
    pub canonical_index: usize,
}

#[derive(Debug, Clone)]
struct AccountRecord {
    email: Option<String>,
    raw: serde_json::Value,
}

#[derive(Debug, Default)]
struct Views {
    /// Every index found on disk, parseable or not. Sorted.
    initial: Vec<usize>,
    /// Indices whose file did not parse as a credential blob.
    invalid: BTreeSet<usize>,
    /// Parseable records by index.
    records: BTreeMap<usize, AccountRecord>,
    /// Total map index → canonical index (identity for non-email accounts).
    canonical: BTreeMap<usize, usize>,
    /// Per-email groups with more than one member.
    duplicates: Vec<DuplicateGroup>,
    /// Explicitly marked expired; preserved across reloads while present.
    expired: BTreeSet<usize>,
}

impl Views {
    fn rotation(&self) -> Vec<usize> {
        self.records
            .keys()
            .copied()
            .filter(|i| self.canonical.get(i) == Some(i))
            .filter(|i| !self.expired.contains(i))
            .collect()
    }
}

/// The on-disk credential store and its derived views.
pub struct AuthStore {
    dir: PathBuf,
    views: RwLock<Views>,
}

impl AuthStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            views: RwLock::new(Views::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-scan the credential directory and rebuild every view.
    ///
    /// Returns `true` when the set of scanned indices changed. Expired marks
    /// are preserved for indices that are still present.
    pub async fn reload(&self) -> Result<bool> {
        let mut views = self.views.write().await;
        let prior_initial = views.initial.clone();
        let prior_expired = views.expired.clone();

        let mut fresh = scan_dir(&self.dir)?;
        fresh.expired = prior_expired
            .into_iter()
            .filter(|i| fresh.initial.contains(i))
            .collect();

        let changed = fresh.initial != prior_initial;
        debug!(
            accounts = fresh.initial.len(),
            invalid = fresh.invalid.len(),
            rotation = fresh.rotation().len(),
            changed,
            "reloaded credential store"
        );
        *views = fresh;
        Ok(changed)
    }

    /// Every index found on disk, sorted.
    pub async fn initial_indices(&self) -> Vec<usize> {
        self.views.read().await.initial.clone()
    }

    /// Indices whose credential file parsed.
    pub async fn available_indices(&self) -> Vec<usize> {
        self.views.read().await.records.keys().copied().collect()
    }

    /// Deduplicated, non-expired, sorted canonical indices.
    pub async fn rotation_indices(&self) -> Vec<usize> {
        self.views.read().await.rotation()
    }

    pub async fn expired_indices(&self) -> Vec<usize> {
        self.views.read().await.expired.iter().copied().collect()
    }

    pub async fn invalid_indices(&self) -> Vec<usize> {
        self.views.read().await.invalid.iter().copied().collect()
    }

    pub async fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        self.views.read().await.duplicates.clone()
    }

    /// Canonical representative for `index` (identity when unknown).
    pub async fn canonical(&self, index: usize) -> usize {
        self.views
            .read()
            .await
            .canonical
            .get(&index)
            .copied()
            .unwrap_or(index)
    }

    pub async fn is_available(&self, index: usize) -> bool {
        self.views.read().await.records.contains_key(&index)
    }

    pub async fn is_expired(&self, index: usize) -> bool {
        self.views.read().await.expired.contains(&index)
    }

    pub async fn email(&self, index: usize) -> Option<String> {
        self.views
            .read()
            .await
            .records
            .get(&index)
            .and_then(|r| r.email.clone())
    }

    /// The raw credential blob for context initialization.
    pub async fn credentials(&self, index: usize) -> Option<serde_json::Value> {
        self.views
            .read()
            .await
            .records
            .get(&index)
            .map(|r| r.raw.clone())
    }

    pub async fn mark_expired(&self, index: usize) {
        let mut views = self.views.write().await;
        if views.expired.insert(index) {
            warn!(auth_index = index, "account marked expired");
        }
    }

    pub async fn clear_expired(&self, index: usize) {
        let mut views = self.views.write().await;
        if views.expired.remove(&index) {
            debug!(auth_index = index, "expired mark cleared");
        }
    }

    /// Delete the credential file for `index`. Never reloads implicitly.
    pub async fn remove_auth(&self, index: usize) -> Result<()> {
        let path = self.file_path(index);
        if !path.exists() {
            return Err(Error::NotFound(index));
        }
        std::fs::remove_file(&path)?;
        debug!(auth_index = index, path = %path.display(), "removed credential file");
        Ok(())
    }

    /// Write a new credential blob under the next free index (`max + 1`).
    ///
    /// Monotonic indices keep concurrent writers from colliding on a
    /// filename and make "higher index = newer" hold for dedup.
    pub async fn add_auth(&self, blob: &serde_json::Value) -> Result<usize> {
        validate_blob(blob)?;
        std::fs::create_dir_all(&self.dir)?;
        let index = self
            .views
            .read()
            .await
            .initial
            .last()
            .map_or(0, |max| max + 1);
        let path = self.file_path(index);
        write_atomic(&path, blob)?;
        debug!(auth_index = index, "added credential file");
        Ok(index)
    }

    /// Merge a refreshed storage state into the on-disk blob for `index`,
    /// preserving `accountName` and any user-added fields.
    pub async fn save_credentials(&self, index: usize, storage_state: &serde_json::Value) -> Result<()> {
        let mut views = self.views.write().await;
        let record = views.records.get_mut(&index).ok_or(Error::NotFound(index))?;

        let mut merged = record.raw.clone();
        if let (Some(target), Some(update)) = (merged.as_object_mut(), storage_state.as_object()) {
            for key in ["cookies", "origins"] {
                if let Some(value) = update.get(key) {
                    target.insert(key.to_string(), value.clone());
                }
            }
        }

        write_atomic(&self.file_path(index), &merged)?;
        record.raw = merged;
        debug!(auth_index = index, "saved refreshed credentials");
        Ok(())
    }

    /// Consolidate every per-email group down to its canonical file.
    ///
    /// Deletes the files of all removed indices and reloads. Returns the
    /// groups that were consolidated.
    pub async fn deduplicate(&self) -> Result<Vec<DuplicateGroup>> {
        let groups = self.duplicate_groups().await;
        for group in &groups {
            for &index in &group.removed_indices {
                match self.remove_auth(index).await {
                    Ok(()) => {},
                    Err(Error::NotFound(_)) => {},
                    Err(e) => return Err(e),
                }
            }
        }
        self.reload().await?;
        Ok(groups)
    }

    /// Status-surface details for every known account.
    pub async fn account_details(&self) -> Vec<AccountDetail> {
        let views = self.views.read().await;
        let rotation: BTreeSet<usize> = views.rotation().into_iter().collect();
        views
            .initial
            .iter()
            .map(|&index| {
                let canonical_index = views.canonical.get(&index).copied().unwrap_or(index);
                AccountDetail {
                    index,
                    name: views.records.get(&index).and_then(|r| r.email.clone()),
                    is_invalid: views.invalid.contains(&index),
                    is_duplicate: canonical_index != index,
                    is_rotation: rotation.contains(&index),
                    is_expired: views.expired.contains(&index),
                    canonical_index,
                }
            })
            .collect()
    }

    fn file_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{AUTH_FILE_PREFIX}{index}{AUTH_FILE_SUFFIX}"))
    }
}

/// A blob must at least carry `cookies` and `origins`.
fn validate_blob(blob: &serde_json::Value) -> Result<()> {
    let obj = blob
        .as_object()
        .ok_or_else(|| Error::Malformed("not a JSON object".into()))?;
    for key in ["cookies", "origins"] {
        if !obj.contains_key(key) {
            return Err(Error::Malformed(format!("missing `{key}`")));
        }
    }
    Ok(())
}

/// Write-to-temp-then-rename so a crash never leaves a torn blob.
fn write_atomic(path: &Path, blob: &serde_json::Value) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(blob)
        .map_err(|e| Error::Malformed(e.to_string()))?;
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn scan_dir(dir: &Path) -> Result<Views> {
    let mut views = Views::default();
    if !dir.exists() {
        return Ok(views);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(index) = parse_index(&name.to_string_lossy()) else {
            continue;
        };
        views.initial.push(index);

        match std::fs::read_to_string(entry.path())
            .map_err(Error::from)
            .and_then(|raw| {
                serde_json::from_str::<serde_json::Value>(&raw)
                    .map_err(|e| Error::Malformed(e.to_string()))
            })
            .and_then(|blob| validate_blob(&blob).map(|()| blob))
        {
            Ok(blob) => {
                let email = blob
                    .get("accountName")
                    .and_then(|v| v.as_str())
                    .and_then(normalize_email);
                views.records.insert(index, AccountRecord { email, raw: blob });
            },
            Err(e) => {
                warn!(auth_index = index, error = %e, "skipping invalid credential file");
                views.invalid.insert(index);
            },
        }
    }

    views.initial.sort_unstable();
    build_canonical(&mut views);
    Ok(views)
}

fn build_canonical(views: &mut Views) {
    let mut by_email: HashMap<String, Vec<usize>> = HashMap::new();
    for (&index, record) in &views.records {
        match &record.email {
            Some(email) => by_email.entry(email.clone()).or_default().push(index),
            // No usable email key: the account is its own group.
            None => {
                views.canonical.insert(index, index);
            },
        }
    }

    for (email, mut group) in by_email {
        group.sort_unstable();
        // Highest index is newest, therefore canonical.
        let kept = *group.last().unwrap_or(&0);
        for &index in &group {
            views.canonical.insert(index, kept);
        }
        if group.len() > 1 {
            let removed_indices = group.into_iter().filter(|&i| i != kept).collect();
            views.duplicates.push(DuplicateGroup {
                email,
                kept_index: kept,
                removed_indices,
            });
        }
    }
    views.duplicates.sort_by_key(|g| g.kept_index);
}

fn parse_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(AUTH_FILE_PREFIX)?
        .strip_suffix(AUTH_FILE_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_auth(dir: &Path, index: usize, email: Option<&str>) {
        let mut blob = serde_json::json!({ "cookies": [], "origins": [] });
        if let Some(email) = email {
            blob["accountName"] = serde_json::json!(email);
        }
        std::fs::write(
            dir.join(format!("auth-{index}.json")),
            serde_json::to_string(&blob).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn dedup_by_email_keeps_highest_index() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), 0, Some("a@x.com"));
        write_auth(dir.path(), 1, Some("A@X.COM"));
        write_auth(dir.path(), 2, Some("b@y.com"));

        let store = AuthStore::new(dir.path());
        store.reload().await.unwrap();

        assert_eq!(store.available_indices().await, vec![0, 1, 2]);
        assert_eq!(store.rotation_indices().await, vec![1, 2]);
        assert_eq!(store.canonical(0).await, 1);
        assert_eq!(store.duplicate_groups().await, vec![DuplicateGroup {
            email: "a@x.com".into(),
            kept_index: 1,
            removed_indices: vec![0],
        }]);
    }

    #[tokio::test]
    async fn reload_reports_changes_and_preserves_expired() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), 0, None);
        write_auth(dir.path(), 1, None);

        let store = AuthStore::new(dir.path());
        assert!(store.reload().await.unwrap());
        assert!(!store.reload().await.unwrap());

        store.mark_expired(1).await;
        write_auth(dir.path(), 2, None);
        assert!(store.reload().await.unwrap());
        assert_eq!(store.expired_indices().await, vec![1]);
        assert_eq!(store.rotation_indices().await, vec![0, 2]);

        // Expired mark for a removed index is dropped.
        std::fs::remove_file(dir.path().join("auth-1.json")).unwrap();
        assert!(store.reload().await.unwrap());
        assert!(store.expired_indices().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_files_are_tracked_but_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), 0, None);
        std::fs::write(dir.path().join("auth-1.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("auth-2.json"), r#"{"cookies": []}"#).unwrap();

        let store = AuthStore::new(dir.path());
        store.reload().await.unwrap();

        assert_eq!(store.initial_indices().await, vec![0, 1, 2]);
        assert_eq!(store.available_indices().await, vec![0]);
        assert_eq!(store.invalid_indices().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn remove_auth_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), 3, None);

        let store = AuthStore::new(dir.path());
        store.reload().await.unwrap();

        assert!(matches!(
            store.remove_auth(4).await,
            Err(Error::NotFound(4))
        ));
        store.remove_auth(3).await.unwrap();
        // No implicit reload: the record is still visible until reload().
        assert_eq!(store.available_indices().await, vec![3]);
        store.reload().await.unwrap();
        assert!(store.available_indices().await.is_empty());
    }

    #[tokio::test]
    async fn add_auth_uses_monotonic_index() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), 5, None);

        let store = AuthStore::new(dir.path());
        store.reload().await.unwrap();

        let blob = serde_json::json!({ "cookies": [], "origins": [] });
        assert_eq!(store.add_auth(&blob).await.unwrap(), 6);
        assert!(dir.path().join("auth-6.json").exists());

        assert!(store.add_auth(&serde_json::json!({"cookies": []})).await.is_err());
    }

    #[tokio::test]
    async fn save_credentials_preserves_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let blob = serde_json::json!({
            "cookies": [{"name": "old"}],
            "origins": [],
            "accountName": "a@x.com",
            "note": "user-added",
        });
        std::fs::write(
            dir.path().join("auth-0.json"),
            serde_json::to_string(&blob).unwrap(),
        )
        .unwrap();

        let store = AuthStore::new(dir.path());
        store.reload().await.unwrap();
        store
            .save_credentials(0, &serde_json::json!({ "cookies": [{"name": "new"}], "origins": [] }))
            .await
            .unwrap();

        let on_disk: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("auth-0.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["cookies"][0]["name"], "new");
        assert_eq!(on_disk["accountName"], "a@x.com");
        assert_eq!(on_disk["note"], "user-added");
    }

    #[tokio::test]
    async fn deduplicate_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        write_auth(dir.path(), 0, Some("a@x.com"));
        write_auth(dir.path(), 1, Some("a@x.com"));
        write_auth(dir.path(), 2, Some("b@y.com"));

        let store = AuthStore::new(dir.path());
        store.reload().await.unwrap();
        let groups = store.deduplicate().await.unwrap();

        assert_eq!(groups.len(), 1);
        assert!(!dir.path().join("auth-0.json").exists());
        assert_eq!(store.available_indices().await, vec![1, 2]);
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  A@X.COM "), Some("a@x.com".into()));
        assert_eq!(normalize_email("user@mail.example.org"), Some("user@mail.example.org".into()));
        assert_eq!(normalize_email("not-an-email"), None);
        assert_eq!(normalize_email("@x.com"), None);
        assert_eq!(normalize_email("a@x"), None);
        assert_eq!(normalize_email("a@x."), None);
        assert_eq!(normalize_email("a@@x.com"), None);
        assert_eq!(normalize_email("a b@x.com"), None);
    }
}
