//! Session folder infrastructure.
//!
//! Outputs always land under `<root>/data/<subject>/<session>/` and
//! `<root>/models/<subject>/<session>/`, even when the binary is launched
//! from a build subdirectory. While a calibration is still acquiring, the
//! session directory carries an `__IN_PROGRESS` suffix; finalize renames it
//! in place. A subject keeps at most the newest 3 sessions on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};

pub const IN_PROGRESS_SUFFIX: &str = "__IN_PROGRESS";
pub const SESSIONS_KEPT_PER_SUBJECT: usize = 3;

const PERSON_COUNTER_FILE: &str = ".next_person_id";
const ROOT_WALK_MAX_DEPTH: usize = 12;

#[derive(Clone, Debug, Default)]
pub struct SessionPaths {
    pub project_root: PathBuf,
    pub subject_id: String,
    pub session_id: String,
    pub data_session_dir: PathBuf,
    pub model_session_dir: PathBuf,
}

/// Walks upward from `start` until a directory containing both `data/` and
/// `models/` is found; falls back to `start` itself.
pub fn find_project_root_from(start: &Path, max_depth: usize) -> PathBuf {
    let mut p = start.to_path_buf();
    for _ in 0..max_depth {
        if p.join("data").is_dir() && p.join("models").is_dir() {
            return p;
        }
        match p.parent() {
            Some(parent) => p = parent.to_path_buf(),
            None => break,
        }
    }
    start.to_path_buf()
}

pub fn find_project_root() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_project_root_from(&cwd, ROOT_WALK_MAX_DEPTH)
}

/// Allowed: `[A-Za-z0-9_-]`; everything else becomes `_`. Whitespace is
/// trimmed first. Callers fall back to `personN` when the result is empty
/// or carries no letter.
pub fn sanitize_subject_id(s: &str) -> String {
    let trimmed = s.trim();
    let out: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "unknown".to_owned()
    } else {
        out
    }
}

pub fn contains_alpha(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic())
}

/// Mints `person1, person2, ...` from a counter file under the data root.
/// A failed write still returns a usable id; it just will not persist.
pub fn allocate_person_fallback(data_root: &Path) -> String {
    if let Err(e) = fs::create_dir_all(data_root) {
        warn!(target: "sesspaths", "create data root {:?}: {e}", data_root);
    }
    let counter_path = data_root.join(PERSON_COUNTER_FILE);

    let mut next_id: u32 = fs::read_to_string(&counter_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1);
    if next_id < 1 {
        next_id = 1;
    }

    match fs::File::create(&counter_path)
        .and_then(|mut f| writeln!(f, "{}", next_id + 1))
    {
        Ok(()) => {}
        Err(e) => warn!(target: "sesspaths", "persist person counter: {e}"),
    }

    format!("person{next_id}")
}

/// Local time, `YYYY-MM-DD_HH-MM-SS`.
pub fn make_session_id_timestamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

pub fn with_in_progress_suffix(session_id_base: &str) -> String {
    format!("{session_id_base}{IN_PROGRESS_SUFFIX}")
}

pub fn is_in_progress_session_id(session_id: &str) -> bool {
    session_id.ends_with(IN_PROGRESS_SUFFIX)
}

pub fn strip_in_progress_suffix(session_id: &str) -> String {
    session_id
        .strip_suffix(IN_PROGRESS_SUFFIX)
        .unwrap_or(session_id)
        .to_owned()
}

// session dirs are timestamps like "2025-12-28_16-54-25"
fn is_session_dir_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Removes all but the newest `keep_n` session directories for a subject.
pub fn prune_old_sessions_for_subject(subject_dir: &Path, keep_n: usize) {
    let entries = match fs::read_dir(subject_dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    let mut sessions: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|de| de.path().is_dir())
        .filter(|de| is_session_dir_name(&de.file_name().to_string_lossy()))
        .map(|de| {
            let t = de
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            (de.path(), t)
        })
        .collect();

    if sessions.len() <= keep_n {
        return;
    }
    // newest first
    sessions.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in sessions.into_iter().skip(keep_n) {
        info!(target: "sesspaths", "prune: removing old session dir {:?}", path);
        if let Err(e) = remove_dir_all_quiet(&path) {
            warn!(target: "sesspaths", "prune: remove {:?}: {e}", path);
        }
    }
}

// remove_dir_all, except a vanished dir is not an error
fn remove_dir_all_quiet(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Creates a fresh in-progress session rooted at `root`.
///
/// Subject id comes from the sanitized preferred name, or the `personN`
/// fallback when the name is empty or has no letters. Both session
/// directories are created and older sessions pruned to the newest 3.
pub fn create_session_at(root: &Path, preferred_subject_name: &str) -> Result<SessionPaths> {
    let data_root = root.join("data");
    let models_root = root.join("models");
    fs::create_dir_all(&data_root).context("create data root")?;
    fs::create_dir_all(&models_root).context("create models root")?;

    let preferred = preferred_subject_name.trim();
    let subject_id = if preferred.is_empty() {
        allocate_person_fallback(&data_root)
    } else {
        let sanitized = sanitize_subject_id(preferred);
        // require at least one letter, otherwise fall back
        if contains_alpha(&sanitized) {
            sanitized
        } else {
            allocate_person_fallback(&data_root)
        }
    };

    let session_id = with_in_progress_suffix(&make_session_id_timestamp());
    let data_session_dir = data_root.join(&subject_id).join(&session_id);
    let model_session_dir = models_root.join(&subject_id).join(&session_id);

    fs::create_dir_all(&data_session_dir)
        .with_context(|| format!("create {:?}", data_session_dir))?;
    fs::create_dir_all(&model_session_dir)
        .with_context(|| format!("create {:?}", model_session_dir))?;

    info!(
        target: "sesspaths",
        "create_session: subject={subject_id} session={session_id}"
    );

    prune_old_sessions_for_subject(&data_root.join(&subject_id), SESSIONS_KEPT_PER_SUBJECT);
    prune_old_sessions_for_subject(&models_root.join(&subject_id), SESSIONS_KEPT_PER_SUBJECT);

    Ok(SessionPaths {
        project_root: root.to_path_buf(),
        subject_id,
        session_id,
        data_session_dir,
        model_session_dir,
    })
}

/// [`create_session_at`] rooted at the discovered project root.
pub fn create_session(preferred_subject_name: &str) -> Result<SessionPaths> {
    create_session_at(&find_project_root(), preferred_subject_name)
}

/// Recursively removes both directories of a session that never finished.
/// No-op for finalized sessions.
pub fn delete_session_dirs_if_in_progress(sp: &SessionPaths) {
    if !is_in_progress_session_id(&sp.session_id) {
        return;
    }
    for dir in [&sp.data_session_dir, &sp.model_session_dir] {
        if let Err(e) = remove_dir_all_quiet(dir) {
            warn!(target: "sesspaths", "delete in-progress {:?}: {e}", dir);
        }
    }
    info!(
        target: "sesspaths",
        "deleted in-progress session {}", sp.session_id
    );
}

/// Renames the session directories to their final (unsuffixed) names and
/// rewrites the paths/ids in `sp`. A directory that already vanished is
/// logged, not fatal. Returns true when both renames held.
pub fn finalize_session_dirs(sp: &mut SessionPaths) -> bool {
    if !is_in_progress_session_id(&sp.session_id) {
        return true;
    }
    let final_id = strip_in_progress_suffix(&sp.session_id);
    let mut ok = true;

    let final_data = sp
        .data_session_dir
        .with_file_name(&final_id);
    let final_model = sp
        .model_session_dir
        .with_file_name(&final_id);

    for (from, to) in [
        (&sp.data_session_dir, &final_data),
        (&sp.model_session_dir, &final_model),
    ] {
        match fs::rename(from, to) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(target: "sesspaths", "finalize: {:?} already gone ({e})", from);
            }
            Err(e) => {
                warn!(target: "sesspaths", "finalize: rename {:?} -> {:?}: {e}", from, to);
                ok = false;
            }
        }
    }

    sp.session_id = final_id;
    sp.data_session_dir = final_data;
    sp.model_session_dir = final_model;
    ok
}
