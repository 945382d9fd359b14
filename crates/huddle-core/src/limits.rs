//! Protocol boundary limits and whole-batch validation.
//!
//! A batch either passes every check or is rejected as a unit; nothing here
//! filters individual entries.

use std::collections::HashSet;

use crate::errors::CollabError;
use crate::ids::ProjectId;
use crate::presence::AgentSession;
use crate::threads::ThreadMetadata;

/// Maximum sessions in one presence publish.
pub const MAX_SESSIONS_PER_PUBLISH: usize = 32;

/// Maximum session or thread title length in bytes.
pub const MAX_TITLE_BYTES: usize = 256;

/// Maximum project-relative path length in bytes.
pub const MAX_RELATIVE_PATH_BYTES: usize = 512;

/// Maximum relayed thread snapshot size in bytes (2 MiB).
pub const MAX_SNAPSHOT_BYTES: usize = 2 * 1024 * 1024;

/// Validate that a string field does not exceed `max_len` bytes.
pub fn validate_len(value: &str, name: &str, max_len: usize) -> Result<(), CollabError> {
    if value.len() > max_len {
        return Err(CollabError::validation(format!(
            "{name} exceeds maximum length ({} > {max_len})",
            value.len()
        )));
    }
    Ok(())
}

/// Whether `path` is absolute on any platform a client might run on.
///
/// Catches POSIX roots (`/src`), Windows drive prefixes (`C:\src`, `c:/src`)
/// and UNC or backslash roots (`\\server\share`, `\src`).
pub fn is_absolute_path(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Validate a presence batch against limits and the publisher's shared
/// projects in the room.
pub fn validate_sessions(
    sessions: &[AgentSession],
    shared_projects: &HashSet<ProjectId>,
) -> Result<(), CollabError> {
    if sessions.len() > MAX_SESSIONS_PER_PUBLISH {
        return Err(CollabError::validation(format!(
            "too many sessions ({} > {MAX_SESSIONS_PER_PUBLISH})",
            sessions.len()
        )));
    }

    let mut seen = HashSet::with_capacity(sessions.len());
    for session in sessions {
        if session.id.is_empty() {
            return Err(CollabError::validation("session id must not be empty"));
        }
        if !seen.insert(&session.id) {
            return Err(CollabError::validation(format!(
                "duplicate session id '{}'",
                session.id
            )));
        }
        validate_len(&session.title, "title", MAX_TITLE_BYTES)?;
        if let Some(path) = &session.relative_path {
            validate_len(path, "relativePath", MAX_RELATIVE_PATH_BYTES)?;
            if is_absolute_path(path) {
                return Err(CollabError::validation(format!(
                    "relativePath '{path}' must be project-relative"
                )));
            }
        }
        if let Some(project) = &session.project_id {
            if !shared_projects.contains(project) {
                return Err(CollabError::validation(format!(
                    "project '{project}' is not shared by this participant"
                )));
            }
        }
    }
    Ok(())
}

/// Validate a host's thread advertisement.
///
/// `cached_revision` returns the revision currently cached for a session, if
/// any; an entry going backwards rejects the whole advertisement.
pub fn validate_thread_entries(
    entries: &[ThreadMetadata],
    cached_revision: impl Fn(&ThreadMetadata) -> Option<u64>,
) -> Result<(), CollabError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if entry.session_id.is_empty() {
            return Err(CollabError::validation("session id must not be empty"));
        }
        if !seen.insert(&entry.session_id) {
            return Err(CollabError::validation(format!(
                "duplicate session id '{}'",
                entry.session_id
            )));
        }
        validate_len(&entry.title, "title", MAX_TITLE_BYTES)?;
        if let Some(cached) = cached_revision(entry) {
            if entry.revision < cached {
                return Err(CollabError::validation(format!(
                    "revision for '{}' went backwards ({} < {cached})",
                    entry.session_id, entry.revision
                )));
            }
        }
    }
    Ok(())
}

/// Reject snapshot payloads above [`MAX_SNAPSHOT_BYTES`].
pub fn check_snapshot_size(len: usize) -> Result<(), CollabError> {
    if len > MAX_SNAPSHOT_BYTES {
        return Err(CollabError::SizeExceeded {
            size: len,
            limit: MAX_SNAPSHOT_BYTES,
        });
    }
    Ok(())
}
