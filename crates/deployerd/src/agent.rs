//! Local automation-agent detection.
//!
//! The agent install drops a versioned binary under its versions directory;
//! the version recorded in the shared configuration is derived from that
//! filename rather than trusted from the environment.

use std::path::Path;

use tracing::debug;

const AGENT_FILE_PREFIX: &str = "mongodb-mms-automation-agent-";

/// Returns the installed automation-agent version, if one can be detected.
///
/// Scans `dir` for a `mongodb-mms-automation-agent-<version>` entry and
/// returns `<version>-1`, the form the automation config records. A missing
/// or unreadable directory simply yields `None`; whether that is fatal is
/// decided at reconciliation time.
pub fn detect_agent_version(dir: &Path) -> Option<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "agent versions directory not readable");
            return None;
        }
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if let Some(version) = name.strip_prefix(AGENT_FILE_PREFIX) {
            if version.is_empty() {
                continue;
            }
            let detected = format!("{version}-1");
            debug!(version = %detected, "detected installed automation agent");
            return Some(detected);
        }
    }
    None
}
