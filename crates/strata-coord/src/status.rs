//! The table status state machine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use strata_common::config::StatusConfig;
use strata_common::constants::MAX_ERROR_MESSAGE_CHARS;
use strata_common::types::{TableId, TableIdAndVersion, TableState};
use strata_common::{StrataError, StrataResult};

/// One table's externally visible build status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    /// The table (live or at a snapshot version).
    pub table: TableIdAndVersion,
    /// Current state.
    pub state: TableState,
    /// Opaque token that must match between a "start processing" call and
    /// a later complete/fail call.
    pub reset_token: String,
    /// When the current processing run started.
    pub started_on: DateTime<Utc>,
    /// When the status last changed.
    pub changed_on: DateTime<Utc>,
    /// Free-form progress message for long builds.
    pub progress_message: Option<String>,
    /// Units of work done so far.
    pub progress_current: Option<u64>,
    /// Total units of work.
    pub progress_total: Option<u64>,
    /// Failure message, truncated to the configured maximum.
    pub error_message: Option<String>,
    /// Full failure details.
    pub error_details: Option<String>,
    /// Total processing runtime in milliseconds.
    pub total_run_time_ms: u64,
    /// Etag of the last truth change the index caught up to.
    pub last_change_etag: Option<String>,
}

/// Notified on every externally visible status transition.
pub trait StatusListener: Send + Sync {
    /// The table's status moved to `state`.
    fn status_changed(&self, table: TableIdAndVersion, state: TableState);
}

struct NullListener;

impl StatusListener for NullListener {
    fn status_changed(&self, _table: TableIdAndVersion, _state: TableState) {}
}

/// Tracks per-table status rows with reset-token guarded transitions.
///
/// A table without an explicit version and each snapshot version are
/// tracked independently. Token mismatches are race signals, not user
/// errors: callers must re-fetch status rather than retry blindly.
pub struct TableStatusStore {
    config: StatusConfig,
    listener: Arc<dyn StatusListener>,
    rows: RwLock<HashMap<TableIdAndVersion, TableStatus>>,
}

impl TableStatusStore {
    /// Creates a status store with no listener.
    #[must_use]
    pub fn new(config: StatusConfig) -> Self {
        Self::with_listener(config, Arc::new(NullListener))
    }

    /// Creates a status store that notifies `listener` on transitions.
    #[must_use]
    pub fn with_listener(config: StatusConfig, listener: Arc<dyn StatusListener>) -> Self {
        Self {
            config,
            listener,
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Resets a table's status to `Processing`, issuing a fresh reset
    /// token. Always succeeds; fires a processing-started notification.
    pub fn reset_to_processing(&self, table: TableIdAndVersion) -> String {
        self.reset_row(table).reset_token
    }

    /// The reset itself, returning the whole refreshed row.
    fn reset_row(&self, table: TableIdAndVersion) -> TableStatus {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let row = {
            let mut rows = self.rows.write();
            rows.entry(table)
                .and_modify(|status| {
                    status.state = TableState::Processing;
                    status.reset_token = token.clone();
                    status.changed_on = now;
                    status.started_on = now;
                    status.progress_message = None;
                    status.progress_current = None;
                    status.progress_total = None;
                    status.error_message = None;
                    status.error_details = None;
                })
                .or_insert_with(|| Self::fresh_row(table, token, now))
                .clone()
        };
        debug!(%table, "status reset to processing");
        self.listener.status_changed(table, TableState::Processing);
        row
    }

    fn fresh_row(table: TableIdAndVersion, token: String, now: DateTime<Utc>) -> TableStatus {
        TableStatus {
            table,
            state: TableState::Processing,
            reset_token: token,
            started_on: now,
            changed_on: now,
            progress_message: None,
            progress_current: None,
            progress_total: None,
            error_message: None,
            error_details: None,
            total_run_time_ms: 0,
            last_change_etag: None,
        }
    }

    /// Marks a table `Available`, guarded by the reset token.
    ///
    /// Succeeds exactly once per token: the stored token rotates on
    /// success, so a stale worker cannot mark a table available after a
    /// newer mutation reset it to processing.
    pub fn attempt_set_available(
        &self,
        table: TableIdAndVersion,
        reset_token: &str,
        last_change_etag: Option<&str>,
    ) -> StrataResult<()> {
        let mut rows = self.rows.write();
        let status = rows
            .get_mut(&table)
            .ok_or_else(|| StrataError::not_found(format!("status for table {table}")))?;
        if status.reset_token != reset_token {
            return Err(StrataError::InvalidStatusToken { table });
        }
        let now = Utc::now();
        status.state = TableState::Available;
        status.changed_on = now;
        status.progress_current = status.progress_total;
        status.total_run_time_ms = (now - status.started_on).num_milliseconds().max(0) as u64;
        status.last_change_etag = last_change_etag.map(str::to_string);
        status.error_message = None;
        status.error_details = None;
        status.reset_token = Uuid::new_v4().to_string();
        drop(rows);
        info!(%table, "table available");
        self.listener.status_changed(table, TableState::Available);
        Ok(())
    }

    /// Marks a table `ProcessingFailed`, guarded by the reset token.
    ///
    /// The message is truncated to the configured maximum rather than
    /// rejected. A missing status row still records the failure - a table
    /// whose build blew up before its row existed must not lose the error.
    pub fn attempt_set_failed(
        &self,
        table: TableIdAndVersion,
        reset_token: &str,
        error_message: &str,
        error_details: Option<&str>,
    ) -> StrataResult<()> {
        let mut rows = self.rows.write();
        let now = Utc::now();
        let status = rows
            .entry(table)
            .or_insert_with(|| Self::fresh_row(table, reset_token.to_string(), now));
        if status.reset_token != reset_token {
            return Err(StrataError::InvalidStatusToken { table });
        }
        status.state = TableState::ProcessingFailed;
        status.changed_on = now;
        status.error_message = Some(truncate_message(error_message));
        status.error_details = error_details.map(str::to_string);
        status.total_run_time_ms = (now - status.started_on).num_milliseconds().max(0) as u64;
        status.reset_token = Uuid::new_v4().to_string();
        drop(rows);
        info!(%table, "table failed");
        self.listener
            .status_changed(table, TableState::ProcessingFailed);
        Ok(())
    }

    /// Records progress for a long build, guarded by the reset token.
    pub fn attempt_update_progress(
        &self,
        table: TableIdAndVersion,
        reset_token: &str,
        message: &str,
        current: u64,
        total: u64,
    ) -> StrataResult<()> {
        let mut rows = self.rows.write();
        let status = rows
            .get_mut(&table)
            .ok_or_else(|| StrataError::not_found(format!("status for table {table}")))?;
        if status.reset_token != reset_token {
            return Err(StrataError::InvalidStatusToken { table });
        }
        let now = Utc::now();
        status.changed_on = now;
        status.progress_message = Some(message.to_string());
        status.progress_current = Some(current);
        status.progress_total = Some(total);
        status.total_run_time_ms = (now - status.started_on).num_milliseconds().max(0) as u64;
        Ok(())
    }

    /// Returns the status, creating or retriggering as needed.
    ///
    /// - No row: create one in `Processing` (first observation).
    /// - `Available` but `index_synchronized` reports false: flip back to
    ///   `Processing` atomically so a rebuild gets triggered.
    /// - `Processing`/`ProcessingFailed` with no progress for longer than
    ///   the configured timeout: retrigger with a fresh token.
    ///
    /// Returns the (possibly updated) status row.
    pub fn get_or_create_status(
        &self,
        table: TableIdAndVersion,
        index_synchronized: impl FnOnce() -> bool,
    ) -> TableStatus {
        enum Action {
            Return(TableStatus),
            Retrigger,
        }
        let action = {
            let rows = self.rows.read();
            match rows.get(&table) {
                None => Action::Retrigger,
                Some(status) => match status.state {
                    TableState::Available => {
                        if index_synchronized() {
                            Action::Return(status.clone())
                        } else {
                            debug!(%table, "available status is stale; retriggering");
                            Action::Retrigger
                        }
                    }
                    TableState::Processing | TableState::ProcessingFailed => {
                        let stalled = (Utc::now() - status.changed_on).to_std().ok().map_or(
                            false,
                            |elapsed| elapsed > self.config.progress_timeout,
                        );
                        if stalled {
                            debug!(%table, "stalled build; retriggering");
                            Action::Retrigger
                        } else {
                            Action::Return(status.clone())
                        }
                    }
                },
            }
        };
        match action {
            Action::Return(status) => status,
            Action::Retrigger => self.reset_row(table),
        }
    }

    /// Looks up a status row.
    pub fn get_status(&self, table: TableIdAndVersion) -> StrataResult<TableStatus> {
        self.rows
            .read()
            .get(&table)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("status for table {table}")))
    }

    /// The table's current state, if a status row exists.
    #[must_use]
    pub fn get_state(&self, table: TableIdAndVersion) -> Option<TableState> {
        self.rows.read().get(&table).map(|s| s.state)
    }

    /// When the status last changed, if a row exists.
    #[must_use]
    pub fn last_changed_on(&self, table: TableIdAndVersion) -> Option<DateTime<Utc>> {
        self.rows.read().get(&table).map(|s| s.changed_on)
    }

    /// The last truth-change etag recorded at availability.
    #[must_use]
    pub fn last_change_etag(&self, table: TableIdAndVersion) -> Option<String> {
        self.rows
            .read()
            .get(&table)
            .and_then(|s| s.last_change_etag.clone())
    }

    /// Touches `changed_on` when (and only when) the table is available.
    /// Returns true when the touch happened.
    pub fn update_changed_on_if_available(&self, table: TableIdAndVersion) -> bool {
        let mut rows = self.rows.write();
        let updated = rows
            .get_mut(&table)
            .filter(|s| s.state == TableState::Available)
            .map(|s| s.changed_on = Utc::now())
            .is_some();
        drop(rows);
        if updated {
            self.listener.status_changed(table, TableState::Available);
        }
        updated
    }

    /// Deletes the status row for one table version.
    pub fn delete_status(&self, table: TableIdAndVersion) {
        self.rows.write().remove(&table);
    }

    /// Deletes the status rows for a table and all of its versions.
    pub fn delete_all_versions(&self, table_id: TableId) {
        self.rows.write().retain(|key, _| key.table_id != table_id);
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message.to_string();
    }
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use strata_common::types::{RowVersion, TableId};

    fn store() -> TableStatusStore {
        TableStatusStore::new(StatusConfig::default())
    }

    fn table() -> TableIdAndVersion {
        TableIdAndVersion::live(TableId::new(1))
    }

    #[test]
    fn test_reset_issues_distinct_tokens() {
        let store = store();
        let first = store.reset_to_processing(table());
        let second = store.reset_to_processing(table());
        assert_ne!(first, second);
        assert_eq!(store.get_state(table()), Some(TableState::Processing));
    }

    #[test]
    fn test_set_available_succeeds_exactly_once() {
        let store = store();
        let token = store.reset_to_processing(table());
        store
            .attempt_set_available(table(), &token, Some("etag-1"))
            .unwrap();
        assert_eq!(store.get_state(table()), Some(TableState::Available));
        assert_eq!(store.last_change_etag(table()), Some("etag-1".to_string()));

        // The stored token rotated; the same token no longer matches.
        let err = store
            .attempt_set_available(table(), &token, Some("etag-1"))
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidStatusToken { .. }));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_stale_token_cannot_clobber_newer_work() {
        let store = store();
        let stale = store.reset_to_processing(table());
        let _fresh = store.reset_to_processing(table());
        let err = store
            .attempt_set_available(table(), &stale, None)
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidStatusToken { .. }));
        assert_eq!(store.get_state(table()), Some(TableState::Processing));
    }

    #[test]
    fn test_set_failed_truncates_message() {
        let store = store();
        let token = store.reset_to_processing(table());
        let long = "x".repeat(MAX_ERROR_MESSAGE_CHARS * 2);
        store
            .attempt_set_failed(table(), &token, &long, Some("details"))
            .unwrap();
        let status = store.get_status(table()).unwrap();
        assert_eq!(status.state, TableState::ProcessingFailed);
        assert_eq!(
            status.error_message.unwrap().len(),
            MAX_ERROR_MESSAGE_CHARS
        );
        assert_eq!(status.error_details, Some("details".to_string()));
    }

    #[test]
    fn test_set_failed_without_row_records_failure() {
        let store = store();
        store
            .attempt_set_failed(table(), "any-token", "exploded early", None)
            .unwrap();
        assert_eq!(store.get_state(table()), Some(TableState::ProcessingFailed));
    }

    #[test]
    fn test_progress_guarded_by_token() {
        let store = store();
        let token = store.reset_to_processing(table());
        store
            .attempt_update_progress(table(), &token, "applying change 3", 3, 10)
            .unwrap();
        let status = store.get_status(table()).unwrap();
        assert_eq!(status.progress_current, Some(3));
        assert_eq!(status.progress_total, Some(10));

        assert!(store
            .attempt_update_progress(table(), "wrong", "nope", 4, 10)
            .is_err());
    }

    #[test]
    fn test_get_or_create_creates_processing() {
        let store = store();
        let status = store.get_or_create_status(table(), || true);
        assert_eq!(status.state, TableState::Processing);
    }

    #[test]
    fn test_get_or_create_flips_stale_available() {
        let store = store();
        let token = store.reset_to_processing(table());
        store.attempt_set_available(table(), &token, None).unwrap();

        // Index still synchronized: stays available.
        let status = store.get_or_create_status(table(), || true);
        assert_eq!(status.state, TableState::Available);

        // Index fell behind the truth: flips to processing.
        let status = store.get_or_create_status(table(), || false);
        assert_eq!(status.state, TableState::Processing);
    }

    #[test]
    fn test_get_or_create_retriggers_stalled_build() {
        let store = TableStatusStore::new(StatusConfig {
            progress_timeout: Duration::from_millis(0),
        });
        let token = store.reset_to_processing(table());
        std::thread::sleep(Duration::from_millis(5));
        let status = store.get_or_create_status(table(), || true);
        assert_eq!(status.state, TableState::Processing);
        assert_ne!(status.reset_token, token);
    }

    #[test]
    fn test_versions_tracked_independently() {
        let store = store();
        let live = table();
        let snapshot = TableIdAndVersion::at_version(TableId::new(1), RowVersion::new(2));
        let token = store.reset_to_processing(live);
        store.reset_to_processing(snapshot);
        store.attempt_set_available(live, &token, None).unwrap();
        assert_eq!(store.get_state(live), Some(TableState::Available));
        assert_eq!(store.get_state(snapshot), Some(TableState::Processing));

        store.delete_all_versions(TableId::new(1));
        assert_eq!(store.get_state(live), None);
        assert_eq!(store.get_state(snapshot), None);
    }

    #[test]
    fn test_update_changed_on_if_available() {
        let store = store();
        let token = store.reset_to_processing(table());
        assert!(!store.update_changed_on_if_available(table()));
        store.attempt_set_available(table(), &token, None).unwrap();
        assert!(store.update_changed_on_if_available(table()));
    }

    #[test]
    fn test_listener_receives_transitions() {
        struct Recorder(Mutex<Vec<TableState>>);
        impl StatusListener for Recorder {
            fn status_changed(&self, _table: TableIdAndVersion, state: TableState) {
                self.0.lock().unwrap().push(state);
            }
        }
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let store = TableStatusStore::with_listener(StatusConfig::default(), recorder.clone());
        let token = store.reset_to_processing(table());
        store.attempt_set_available(table(), &token, None).unwrap();
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![TableState::Processing, TableState::Available]
        );
    }
}
