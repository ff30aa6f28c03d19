//! Filesystem side effects of post-process actions.
//!
//! # Design
//! - Moves never overwrite: a colliding name gets an 8 character random suffix before the
//!   extension (`report.Ab3dE9xQ.json`).
//! - Target folders are created on demand.
//! - `retry_blocking` re-runs a synchronous operation on the blocking pool until it succeeds,
//!   the budget runs out, or the error is declared fatal.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;

/// Folder receiving successfully processed files and monthly bundles.
pub const DONE_DIR: &str = "Done";
/// Folder receiving files whose conversion failed.
pub const ERROR_DIR: &str = "Error";

const SUFFIX_LEN: usize = 8;

/// Random alphanumeric suffix used to resolve name collisions.
#[must_use]
pub fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// `<stem>.<suffix><.ext>` for `file_name`.
#[must_use]
pub fn suffixed_name(file_name: &str, suffix: &str) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map_or_else(|| file_name.to_string(), |stem| stem.to_string_lossy().into_owned());
    match path.extension() {
        Some(ext) => format!("{stem}.{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{suffix}"),
    }
}

/// A path inside `dir` named after `file_name` that does not exist yet.
#[must_use]
pub fn collision_free_target(dir: &Path, file_name: &str) -> PathBuf {
    let direct = dir.join(file_name);
    if !direct.exists() {
        return direct;
    }
    loop {
        let candidate = dir.join(suffixed_name(file_name, &random_suffix()));
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// Move `source` into `<parent>/<folder>/`, returning the final path.
///
/// # Errors
///
/// Returns an IO error when the folder cannot be created or the rename fails.
pub fn move_into(source: &Path, folder: &str) -> PipelineResult<PathBuf> {
    let invalid = || {
        PipelineError::io(
            "disposition.resolve",
            source,
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    };
    let parent = source.parent().ok_or_else(invalid)?;
    let file_name = source
        .file_name()
        .ok_or_else(invalid)?
        .to_string_lossy()
        .into_owned();

    let target_dir = parent.join(folder);
    fs::create_dir_all(&target_dir)
        .map_err(|err| PipelineError::io("disposition.create_dir", &target_dir, err))?;
    let target = collision_free_target(&target_dir, &file_name);
    fs::rename(source, &target)
        .map_err(|err| PipelineError::io("disposition.rename", source, err))?;
    debug!(from = %source.display(), to = %target.display(), "file moved");
    Ok(target)
}

/// Delete `source`; a file that is already gone counts as deleted.
///
/// # Errors
///
/// Returns an IO error for any other failure.
pub fn delete(source: &Path) -> PipelineResult<()> {
    match fs::remove_file(source) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PipelineError::io("disposition.delete", source, err)),
    }
}

/// Retry `operation` on the blocking pool within `policy`.
///
/// Errors for which `is_fatal` returns `true` stop the retry immediately, as does `should_stop`
/// turning `true` between attempts.
///
/// # Errors
///
/// Returns the last error once the budget is exhausted or a stop is requested, or the fatal
/// error.
pub async fn retry_blocking<T, F, S>(
    policy: RetryPolicy,
    operation: F,
    is_fatal: fn(&PipelineError) -> bool,
    should_stop: S,
) -> PipelineResult<T>
where
    T: Send + 'static,
    F: Fn() -> PipelineResult<T> + Clone + Send + 'static,
    S: Fn() -> bool,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        let op = operation.clone();
        let result = tokio::task::spawn_blocking(op)
            .await
            .map_err(|source| PipelineError::Task {
                operation: "disposition.retry",
                source,
            })?;
        match result {
            Ok(value) => return Ok(value),
            Err(err) if is_fatal(&err) || attempt >= attempts || should_stop() => return Err(err),
            Err(err) => {
                debug!(attempt, error = %err, "post-process step failed; retrying");
            }
        }
        attempt += 1;
        tokio::time::sleep(policy.interval).await;
    }
}
