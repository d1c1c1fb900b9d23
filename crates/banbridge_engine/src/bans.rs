//! Ban synchronization cache.
//!
//! Holds the currently active ban per subject together with the change-feed
//! cursor. Both are persisted as one JSON document so a restart resumes from
//! the last applied point.
//!
//! ## Merge rules
//!
//! - a candidate that is active now replaces any record for its subject
//! - an inactive candidate removes the subject's record
//! - after every feed, expired records are swept
//! - the cursor moves to the largest parsed `updatedAt`, never backwards
//!
//! Applying the same feed twice leaves the cache untouched the second time.

use crate::error::{BridgeError, BridgeResult};
use banbridge_protocol::BanChange;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Text used in notices when a ban carries no reason.
const REASON_PLACEHOLDER: &str = "N/A";

/// A ban as held by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    /// Server-assigned ban id.
    #[serde(default)]
    pub ban_id: i64,
    /// Banned subject.
    #[serde(default, alias = "xuid")]
    pub subject_id: String,
    /// Reason shown to the subject.
    #[serde(default)]
    pub reason: Option<String>,
    /// Creation instant.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Expiry instant; `None` means permanent.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation instant.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Last modification instant.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BanRecord {
    /// Builds a record from a feed entry. Unparsable instants become `None`.
    ///
    /// Returns `None` for entries without a subject.
    pub fn from_change(change: &BanChange) -> Option<Self> {
        let subject_id = change.subject_id.as_deref().map(str::trim)?;
        if subject_id.is_empty() {
            return None;
        }
        Some(Self {
            ban_id: change.ban_id,
            subject_id: subject_id.to_string(),
            reason: change.reason.clone(),
            created_at: parse_instant(change.created_at.as_deref()),
            expires_at: parse_instant(change.expires_at.as_deref()),
            revoked_at: parse_instant(change.revoked_at.as_deref()),
            updated_at: parse_instant(change.updated_at.as_deref()),
        })
    }

    /// Returns true if the ban is neither revoked nor expired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }

    /// Returns true for bans without an expiry.
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Message shown to a subject refused by this ban.
    pub fn notice(&self) -> String {
        let reason = self.reason.as_deref().unwrap_or(REASON_PLACEHOLDER);
        match self.expires_at {
            Some(expires_at) => format!(
                "You are banned.\nReason: {reason}\nExpires: {}",
                format_instant(&expires_at)
            ),
            None => format!("You are banned.\nReason: {reason}\nDuration: Permanent"),
        }
    }
}

/// Result of applying a change feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// True if the active set differs from before the call.
    pub changed: bool,
    /// Records whose subject had no active ban before the call.
    pub newly_banned: Vec<BanRecord>,
}

/// Cursor captured before fetching a feed.
///
/// A feed fetched under a token is only applied if the cache has not been
/// reset since the token was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncToken {
    cursor: DateTime<Utc>,
    generation: u64,
}

impl SyncToken {
    /// Cursor at the time the token was taken.
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    /// Cursor formatted for the `since` query parameter.
    pub fn since_param(&self) -> String {
        format_instant(&self.cursor)
    }
}

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheDocument {
    #[serde(default, alias = "sinceCursor")]
    cursor: Option<String>,
    #[serde(default)]
    entries: Vec<BanRecord>,
}

#[derive(Debug)]
struct CacheState {
    active: HashMap<String, BanRecord>,
    cursor: DateTime<Utc>,
    generation: u64,
}

impl CacheState {
    fn empty(generation: u64) -> Self {
        Self {
            active: HashMap::new(),
            cursor: DateTime::<Utc>::UNIX_EPOCH,
            generation,
        }
    }
}

/// Active-ban cache backed by a JSON file.
///
/// All methods take `&self`; the lock is held only for in-memory work and
/// never across file I/O or an `.await`.
#[derive(Debug)]
pub struct BanCache {
    path: PathBuf,
    state: RwLock<CacheState>,
    write_lock: Mutex<()>,
}

impl BanCache {
    /// Creates an empty cache persisted at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(CacheState::empty(0)),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the persisted document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current sync cursor.
    pub fn cursor(&self) -> DateTime<Utc> {
        self.state.read().cursor
    }

    /// Number of resets performed so far.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Number of records in the active set.
    pub fn len(&self) -> usize {
        self.state.read().active.len()
    }

    /// Returns true if no ban is cached.
    pub fn is_empty(&self) -> bool {
        self.state.read().active.is_empty()
    }

    /// Returns all cached records ordered by subject.
    pub fn records(&self) -> Vec<BanRecord> {
        let mut records: Vec<BanRecord> = self.state.read().active.values().cloned().collect();
        records.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        records
    }

    /// Returns the active ban for `subject_id`, evicting it if it has expired.
    pub fn find_active(&self, subject_id: &str) -> Option<BanRecord> {
        self.find_active_at(subject_id, Utc::now())
    }

    /// [`find_active`](Self::find_active) evaluated at `now`.
    pub fn find_active_at(&self, subject_id: &str, now: DateTime<Utc>) -> Option<BanRecord> {
        {
            let state = self.state.read();
            match state.active.get(subject_id) {
                None => return None,
                Some(record) if record.is_active_at(now) => return Some(record.clone()),
                Some(_) => {}
            }
        }

        let mut state = self.state.write();
        // Re-check under the write lock; a concurrent feed may have replaced it.
        match state.active.get(subject_id) {
            Some(record) if record.is_active_at(now) => Some(record.clone()),
            Some(_) => {
                state.active.remove(subject_id);
                debug!(subject_id, "evicted expired ban");
                None
            }
            None => None,
        }
    }

    /// Message shown to a subject refused by `record`.
    pub fn build_notice(record: &BanRecord) -> String {
        record.notice()
    }

    /// Captures the cursor and generation before a feed is fetched.
    pub fn begin_sync(&self) -> SyncToken {
        let state = self.state.read();
        SyncToken {
            cursor: state.cursor,
            generation: state.generation,
        }
    }

    /// Applies a feed fetched under `token`.
    ///
    /// Returns `None` without touching the cache if it was reset after the
    /// token was taken.
    pub fn apply_synced(&self, token: &SyncToken, changes: &[BanChange]) -> Option<ApplyOutcome> {
        self.apply_inner(Some(token.generation), changes, Utc::now())
    }

    /// Merges a change feed into the active set.
    pub fn apply_change_feed(&self, changes: &[BanChange]) -> ApplyOutcome {
        self.apply_change_feed_at(changes, Utc::now())
    }

    /// [`apply_change_feed`](Self::apply_change_feed) evaluated at `now`.
    pub fn apply_change_feed_at(&self, changes: &[BanChange], now: DateTime<Utc>) -> ApplyOutcome {
        self.apply_inner(None, changes, now).unwrap_or_default()
    }

    fn apply_inner(
        &self,
        generation: Option<u64>,
        changes: &[BanChange],
        now: DateTime<Utc>,
    ) -> Option<ApplyOutcome> {
        let mut state = self.state.write();
        if let Some(generation) = generation {
            if generation != state.generation {
                debug!(
                    fetched_under = generation,
                    current = state.generation,
                    "discarding stale ban feed"
                );
                return None;
            }
        }

        let mut outcome = ApplyOutcome::default();
        let mut max_updated: Option<DateTime<Utc>> = None;
        // Subjects with no active ban when first seen in this feed.
        let mut seen: HashSet<String> = HashSet::new();
        let mut fresh: Vec<String> = Vec::new();

        for change in changes {
            let Some(record) = BanRecord::from_change(change) else {
                continue;
            };
            if let Some(updated_at) = record.updated_at {
                max_updated = Some(max_updated.map_or(updated_at, |m| m.max(updated_at)));
            }

            if seen.insert(record.subject_id.clone()) {
                let was_active = state
                    .active
                    .get(&record.subject_id)
                    .is_some_and(|prior| prior.is_active_at(now));
                if !was_active {
                    fresh.push(record.subject_id.clone());
                }
            }

            if record.is_active_at(now) {
                match state.active.insert(record.subject_id.clone(), record.clone()) {
                    Some(previous) if previous == record => {}
                    _ => outcome.changed = true,
                }
            } else if state.active.remove(&record.subject_id).is_some() {
                outcome.changed = true;
            }
        }

        let before = state.active.len();
        state.active.retain(|_, record| record.is_active_at(now));
        if state.active.len() != before {
            outcome.changed = true;
        }
        // Reported with the record that ended up in the cache; a subject banned
        // and lifted within the same feed is left out.
        outcome.newly_banned = fresh
            .iter()
            .filter_map(|subject_id| state.active.get(subject_id).cloned())
            .collect();

        if let Some(max_updated) = max_updated {
            if max_updated > state.cursor {
                state.cursor = max_updated;
            }
        }

        Some(outcome)
    }

    /// Reads the persisted document, keeping entries active now.
    ///
    /// A missing or unreadable file leaves the cache empty. Returns the number
    /// of bans loaded.
    pub fn load(&self) -> usize {
        self.load_at(Utc::now())
    }

    /// [`load`](Self::load) evaluated at `now`.
    pub fn load_at(&self, now: DateTime<Utc>) -> usize {
        let document = match read_document(&self.path) {
            Ok(Some(document)) => document,
            Ok(None) => return 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to load ban cache");
                return 0;
            }
        };

        let cursor = parse_instant(document.cursor.as_deref()).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let active: HashMap<String, BanRecord> = document
            .entries
            .into_iter()
            .filter(|record| !record.subject_id.trim().is_empty() && record.is_active_at(now))
            .map(|record| (record.subject_id.clone(), record))
            .collect();
        let count = active.len();

        let mut state = self.state.write();
        state.active = active;
        state.cursor = cursor;
        drop(state);

        info!(count, cursor = %format_instant(&cursor), "loaded ban cache");
        count
    }

    /// Persists the cache, logging failures.
    pub fn persist(&self) {
        if let Err(e) = self.try_persist() {
            warn!(path = %self.path.display(), error = %e, "failed to save ban cache");
        }
    }

    /// Persists the cache with a write-then-rename so a crash mid-write
    /// leaves the previous document intact.
    pub fn try_persist(&self) -> BridgeResult<()> {
        let _guard = self.write_lock.lock();

        let document = {
            let state = self.state.read();
            let mut entries: Vec<BanRecord> = state.active.values().cloned().collect();
            entries.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
            CacheDocument {
                cursor: Some(format_instant(&state.cursor)),
                entries,
            }
        };
        let data = serde_json::to_vec_pretty(&document)
            .map_err(|e| BridgeError::Encode(e.to_string()))?;

        if let Some(parent) = self.parent_dir() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path(&self.path);
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            debug!(error = %e, "atomic replace failed, copying instead");
            fs::copy(&temp_path, &self.path)?;
            fs::remove_file(&temp_path)?;
        }

        self.sync_directory()?;
        Ok(())
    }

    /// Deletes the persisted document and empties the cache.
    ///
    /// Feeds fetched before the reset are discarded by
    /// [`apply_synced`](Self::apply_synced).
    pub fn reset_to_epoch(&self) {
        let _guard = self.write_lock.lock();
        {
            let mut state = self.state.write();
            let generation = state.generation + 1;
            *state = CacheState::empty(generation);
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete ban cache"),
        }
        info!("ban cache reset to epoch");
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> BridgeResult<()> {
        if let Some(parent) = self.parent_dir() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> BridgeResult<()> {
        Ok(())
    }
}

fn read_document(path: &Path) -> BridgeResult<Option<CacheDocument>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| BridgeError::CorruptCache(e.to_string()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parses an RFC 3339 instant; blank or malformed input yields `None`.
pub fn parse_instant(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Formats an instant as RFC 3339 in UTC with a `Z` suffix.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
