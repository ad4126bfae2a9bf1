//! Crash-consistent snapshot persistence.
//!
//! Write pattern: serialize into a checksummed envelope, write to a `.tmp`
//! sibling, rotate the previous file into `.bak.N`, then atomically rename.
//! A crash at any point leaves either the old valid snapshot or the new
//! one, never a torn file. Load verifies the checksum and refuses to hand
//! back state that fails it; per the error contract that is fatal at
//! startup, not something to paper over with a backup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use alert_trade_core::EngineError;

use crate::snapshot::StateSnapshot;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    /// Hex SHA-256 over the canonical (sorted-key) JSON of `state`.
    checksum: String,
    state: serde_json::Value,
}

/// File-backed store for [`StateSnapshot`].
pub struct SnapshotStore {
    path: PathBuf,
    backup_count: usize,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(path: PathBuf, backup_count: usize) -> Self {
        Self { path, backup_count }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot, verifying integrity.
    ///
    /// Returns `Ok(None)` when no snapshot exists (fresh start).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StateCorruption`] if the file exists but
    /// cannot be read, parsed, or fails its checksum; the caller must
    /// refuse to trade on it.
    pub fn load(&self) -> Result<Option<StateSnapshot>, EngineError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No previous snapshot, starting fresh");
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)
            .map_err(|e| EngineError::StateCorruption(format!("unreadable snapshot: {e}")))?;

        let envelope: SnapshotEnvelope = serde_json::from_str(&raw)
            .map_err(|e| EngineError::StateCorruption(format!("malformed snapshot: {e}")))?;

        if envelope.version != SNAPSHOT_VERSION {
            return Err(EngineError::StateCorruption(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                envelope.version
            )));
        }

        let canonical = serde_json::to_string(&envelope.state)
            .map_err(|e| EngineError::StateCorruption(format!("uncanonicalizable state: {e}")))?;
        let checksum = hex::encode(Sha256::digest(canonical.as_bytes()));
        if checksum != envelope.checksum {
            return Err(EngineError::StateCorruption(format!(
                "checksum mismatch: stored {} computed {}",
                envelope.checksum, checksum
            )));
        }

        let state: StateSnapshot = serde_json::from_value(envelope.state)
            .map_err(|e| EngineError::StateCorruption(format!("undecodable state: {e}")))?;

        info!(
            path = %self.path.display(),
            trades = state.trades.len(),
            fingerprints = state.processed_alerts.len(),
            "Snapshot loaded"
        );
        Ok(Some(state))
    }

    /// Durably writes the snapshot. Only after this returns may the caller
    /// treat the corresponding in-memory mutation as committed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails; the
    /// previous snapshot on disk remains intact in that case.
    pub fn save(&self, state: &StateSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        // Canonical form: Value round-trip sorts object keys, so the
        // checksum is reproducible on load.
        let value = serde_json::to_value(state).context("serializing snapshot")?;
        let canonical = serde_json::to_string(&value).context("canonicalizing snapshot")?;
        let checksum = hex::encode(Sha256::digest(canonical.as_bytes()));

        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            checksum,
            state: value,
        };
        let payload = serde_json::to_string_pretty(&envelope).context("encoding envelope")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).with_context(|| format!("writing {}", tmp.display()))?;

        self.rotate_backups();

        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Snapshot persisted");
        Ok(())
    }

    /// Shifts `.bak.i` up and copies the current snapshot to `.bak.1`.
    /// Backups are best-effort operator material; failures are logged, not
    /// propagated.
    fn rotate_backups(&self) {
        if self.backup_count == 0 || !self.path.exists() {
            return;
        }

        for i in (1..self.backup_count).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                let to = self.backup_path(i + 1);
                if let Err(e) = fs::rename(&from, &to) {
                    warn!(error = %e, from = %from.display(), "Backup rotation failed");
                }
            }
        }

        let first = self.backup_path(1);
        if let Err(e) = fs::copy(&self.path, &first) {
            warn!(error = %e, "Snapshot backup copy failed");
        }
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".bak.{index}"));
        PathBuf::from(name)
    }
}
