//! Results of sync passes.

use crate::conflict::ConflictInfo;

/// What one pass did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_remote: usize,
    pub deleted_local: usize,
    pub skipped: usize,
    pub conflicts: Vec<ConflictInfo>,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// One-line summary for status displays.
    pub fn status(&self) -> String {
        let mut status = format!(
            "{} uploaded, {} downloaded, {} deleted remotely, {} deleted locally, {} unchanged",
            self.uploaded, self.downloaded, self.deleted_remote, self.deleted_local, self.skipped
        );
        if !self.conflicts.is_empty() {
            status.push_str(&format!(", {} conflict(s)", self.conflicts.len()));
        }
        if !self.errors.is_empty() {
            status.push_str(&format!(", {} error(s)", self.errors.len()));
        }
        status
    }
}

/// How a call to [`SyncEngine::sync`](super::SyncEngine::sync) ended.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The pass ran to completion. Individual failures are in `errors`.
    Completed(SyncReport),
    /// Another pass was running; nothing was done.
    Skipped,
    /// The credential was rejected and could not be refreshed. Work done
    /// before the rejection is reported.
    NotAuthenticated(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) | SyncOutcome::NotAuthenticated(report) => Some(report),
            SyncOutcome::Skipped => None,
        }
    }

    pub fn status(&self) -> String {
        match self {
            SyncOutcome::Completed(report) => format!("Synced: {}", report.status()),
            SyncOutcome::Skipped => "Sync already in progress".to_string(),
            SyncOutcome::NotAuthenticated(_) => "Not authenticated".to_string(),
        }
    }
}

/// Result of uploading every note.
#[derive(Debug, Clone, Default)]
pub struct BulkUploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let report = SyncReport {
            uploaded: 1,
            downloaded: 2,
            errors: vec!["boom".into()],
            ..Default::default()
        };
        assert_eq!(
            report.status(),
            "1 uploaded, 2 downloaded, 0 deleted remotely, 0 deleted locally, 0 unchanged, 1 error(s)"
        );
        assert_eq!(SyncOutcome::Skipped.status(), "Sync already in progress");
        assert!(SyncOutcome::Completed(report).status().starts_with("Synced: "));
    }
}
