//! Monthly zip bundles for processed source files.
//!
//! # Design
//! - Each source queues files already moved into `Done/`; a flush appends them to
//!   `Done/<yyyyMM>.zip` in batches of ten.
//! - One process-wide [`ArchiveGate`] serialises flushes. A flush that cannot take the gate is a
//!   no-op and the queue is kept for later.
//! - A month's first batch is written to `<yyyyMM>.zip.tmp` and renamed into place. Later
//!   batches are appended in place; the bundle's central directory is saved to
//!   `<yyyyMM>.zip.undo` first and written back if the append fails or was interrupted, so the
//!   bundle stays valid up to the last committed batch. Sources are deleted only after their
//!   batch is committed.
//! - A failed batch goes back to the front of the queue for the next flush.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use chrono::Local;
use convoy_events::Event;
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::disposition::{random_suffix, suffixed_name};
use crate::error::{PipelineError, PipelineResult};
use crate::signals::{HealthFlag, Signals};

/// Files committed per bundle update.
pub const BATCH_SIZE: usize = 10;
/// Queue depth that forces an immediate flush.
pub const AUTO_FLUSH_THRESHOLD: usize = 50;

/// Process-wide lock allowing one archive flush at a time.
#[derive(Clone, Default)]
pub struct ArchiveGate(Arc<Mutex<()>>);

impl ArchiveGate {
    /// Fresh, unlocked gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Result of a flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush held the gate; nothing was done.
    Busy,
    /// Nothing was queued.
    Empty,
    /// Files were committed to `bundle`.
    Flushed {
        /// Bundle that received the files.
        bundle: PathBuf,
        /// Number of files added.
        files: usize,
    },
}

/// Per-source archive queue.
pub struct ArchiveBatcher {
    source: String,
    done_dir: PathBuf,
    queue: Mutex<VecDeque<PathBuf>>,
    gate: ArchiveGate,
    signals: Signals,
    health: HealthFlag,
}

impl ArchiveBatcher {
    /// Batcher writing bundles into `done_dir`.
    #[must_use]
    pub fn new(source: impl Into<String>, done_dir: PathBuf, gate: ArchiveGate, signals: Signals) -> Self {
        let source = source.into();
        Self {
            health: HealthFlag::new(format!("archive:{source}")),
            source,
            done_dir,
            queue: Mutex::new(VecDeque::new()),
            gate,
            signals,
        }
    }

    /// Queue a file that already lives in `Done/`.
    ///
    /// Returns `true` when the queue has grown past [`AUTO_FLUSH_THRESHOLD`].
    pub fn push(&self, path: PathBuf) -> bool {
        let mut queue = self.lock_queue();
        queue.push_back(path);
        queue.len() > AUTO_FLUSH_THRESHOLD
    }

    /// Files waiting for the next flush.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    /// Bundle path for the current month.
    #[must_use]
    pub fn current_bundle(&self) -> PathBuf {
        self.done_dir
            .join(format!("{}.zip", Local::now().format("%Y%m")))
    }

    /// Commit every queued file to the current month's bundle.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first batch that could not be committed; that batch and all
    /// later files stay queued.
    pub fn flush(&self) -> PipelineResult<FlushOutcome> {
        let _gate = match self.gate.0.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(FlushOutcome::Busy),
        };
        if self.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let bundle = self.current_bundle();
        let mut total = 0;
        loop {
            let batch: Vec<PathBuf> = {
                let mut queue = self.lock_queue();
                let take = queue.len().min(BATCH_SIZE);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            match commit_batch(&bundle, &batch) {
                Ok(committed) => {
                    for path in &committed {
                        if let Err(err) = fs::remove_file(path) {
                            warn!(source = %self.source, path = %path.display(), error = %err, "archived file could not be deleted");
                        }
                    }
                    total += committed.len();
                }
                Err(err) => {
                    let mut queue = self.lock_queue();
                    for path in batch.into_iter().rev() {
                        queue.push_front(path);
                    }
                    drop(queue);
                    warn!(source = %self.source, bundle = %bundle.display(), error = %err, "archive batch failed; files kept for next flush");
                    self.health.mark_degraded(&self.signals, "archive flush failed");
                    if total > 0 {
                        self.record_flush(&bundle, total);
                    }
                    return Err(err);
                }
            }
        }

        self.health.mark_recovered(&self.signals);
        self.record_flush(&bundle, total);
        Ok(FlushOutcome::Flushed {
            bundle,
            files: total,
        })
    }

    fn record_flush(&self, bundle: &Path, files: usize) {
        info!(source = %self.source, bundle = %bundle.display(), files, "archive flushed");
        self.signals.metrics.add_archived_files(files);
        self.signals.publish(Event::ArchiveFlushed {
            source: self.source.clone(),
            bundle: bundle.display().to_string(),
            files,
        });
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<PathBuf>> {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Append `batch` to `bundle`; returns the files that were added. Missing files are skipped.
fn commit_batch(bundle: &Path, batch: &[PathBuf]) -> PipelineResult<Vec<PathBuf>> {
    if let Some(parent) = bundle.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| PipelineError::io("archive.create_dir", parent, err))?;
    }
    if let Some(journal) = UndoJournal::load(bundle)? {
        warn!(bundle = %bundle.display(), "interrupted archive append rolled back");
        journal.restore(bundle)?;
    }

    let mut sources = Vec::with_capacity(batch.len());
    for path in batch {
        match File::open(path) {
            Ok(file) => sources.push((path.clone(), file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(PipelineError::io("archive.read_source", path, err)),
        }
    }
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    if bundle.exists() {
        append_to_bundle(bundle, sources)
    } else {
        create_bundle(bundle, sources)
    }
}

/// First batch of the month: written aside and renamed into place.
fn create_bundle(bundle: &Path, sources: Vec<(PathBuf, File)>) -> PipelineResult<Vec<PathBuf>> {
    let staging = bundle.with_extension("zip.tmp");
    let result = File::create(&staging)
        .map_err(|err| PipelineError::io("archive.create", &staging, err))
        .and_then(|file| write_entries(ZipWriter::new(file), HashSet::new(), sources, &staging))
        .and_then(|committed| {
            fs::rename(&staging, bundle)
                .map_err(|err| PipelineError::io("archive.commit", bundle, err))?;
            Ok(committed)
        });
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

/// Later batches: appended in place, with the old central directory journaled for rollback.
fn append_to_bundle(bundle: &Path, sources: Vec<(PathBuf, File)>) -> PipelineResult<Vec<PathBuf>> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(bundle)
        .map_err(|err| PipelineError::io("archive.open", bundle, err))?;
    let (names, directory_start) = {
        let mut archive =
            ZipArchive::new(&mut file).map_err(|err| PipelineError::zip("archive.read", bundle, err))?;
        let names: HashSet<String> = archive.file_names().map(str::to_string).collect();
        let mut directory_start = None::<u64>;
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|err| PipelineError::zip("archive.read", bundle, err))?;
            let start = entry.central_header_start();
            directory_start = Some(directory_start.map_or(start, |current| current.min(start)));
        }
        (names, directory_start.unwrap_or(0))
    };

    let journal = UndoJournal::record(bundle, &mut file, directory_start)?;
    let result = ZipWriter::new_append(file)
        .map_err(|err| PipelineError::zip("archive.append", bundle, err))
        .and_then(|writer| write_entries(writer, names, sources, bundle));
    match result {
        Ok(committed) => {
            journal.discard();
            Ok(committed)
        }
        Err(err) => {
            if let Err(restore_err) = journal.restore(bundle) {
                warn!(bundle = %bundle.display(), error = %restore_err, "archive rollback failed; journal kept for next flush");
            }
            Err(err)
        }
    }
}

fn write_entries(
    mut writer: ZipWriter<File>,
    mut names: HashSet<String>,
    sources: Vec<(PathBuf, File)>,
    target: &Path,
) -> PipelineResult<Vec<PathBuf>> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut committed = Vec::with_capacity(sources.len());
    for (path, mut source) in sources {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut entry = file_name.clone();
        while names.contains(&entry) {
            entry = suffixed_name(&file_name, &random_suffix());
        }

        writer
            .start_file(entry.clone(), options)
            .map_err(|err| PipelineError::zip("archive.start_entry", target, err))?;
        io::copy(&mut source, &mut writer)
            .map_err(|err| PipelineError::io("archive.write_entry", &path, err))?;
        names.insert(entry);
        committed.push(path);
    }

    let file = writer
        .finish()
        .map_err(|err| PipelineError::zip("archive.finish", target, err))?;
    file.sync_all()
        .map_err(|err| PipelineError::io("archive.sync", target, err))?;
    Ok(committed)
}

/// Bytes of a bundle from its central directory to the end, kept on disk while a batch is
/// appended. Layout: little-endian `u64` offset followed by the saved bytes.
struct UndoJournal {
    path: PathBuf,
    offset: u64,
    tail: Vec<u8>,
}

impl UndoJournal {
    fn path_for(bundle: &Path) -> PathBuf {
        bundle.with_extension("zip.undo")
    }

    fn record(bundle: &Path, file: &mut File, offset: u64) -> PipelineResult<Self> {
        let mut tail = Vec::new();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_to_end(&mut tail))
            .map_err(|err| PipelineError::io("archive.journal_read", bundle, err))?;
        let journal = Self {
            path: Self::path_for(bundle),
            offset,
            tail,
        };
        let mut bytes = Vec::with_capacity(8 + journal.tail.len());
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&journal.tail);
        File::create(&journal.path)
            .and_then(|mut out| {
                out.write_all(&bytes)?;
                out.sync_all()
            })
            .map_err(|err| PipelineError::io("archive.journal_write", &journal.path, err))?;
        Ok(journal)
    }

    fn load(bundle: &Path) -> PipelineResult<Option<Self>> {
        let path = Self::path_for(bundle);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PipelineError::io("archive.journal_load", &path, err)),
        };
        let Some((offset, tail)) = bytes.split_first_chunk::<8>() else {
            warn!(journal = %path.display(), "truncated archive journal discarded");
            let _ = fs::remove_file(&path);
            return Ok(None);
        };
        Ok(Some(Self {
            offset: u64::from_le_bytes(*offset),
            tail: tail.to_vec(),
            path,
        }))
    }

    /// Put the saved central directory back and drop the journal.
    fn restore(&self, bundle: &Path) -> PipelineResult<()> {
        OpenOptions::new()
            .write(true)
            .open(bundle)
            .and_then(|mut file| {
                file.set_len(self.offset)?;
                file.seek(SeekFrom::Start(self.offset))?;
                file.write_all(&self.tail)?;
                file.sync_all()
            })
            .map_err(|err| PipelineError::io("archive.rollback", bundle, err))?;
        self.discard();
        Ok(())
    }

    fn discard(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(journal = %self.path.display(), error = %err, "archive journal not removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_events::EventBus;
    use convoy_telemetry::Metrics;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn batcher(dir: &Path, gate: ArchiveGate) -> TestResult<ArchiveBatcher> {
        let signals = Signals::new(EventBus::new(), Metrics::new()?);
        Ok(ArchiveBatcher::new("line-1", dir.join("Done"), gate, signals))
    }

    fn queue_files(batcher: &ArchiveBatcher, done: &Path, names: &[&str]) -> TestResult<()> {
        fs::create_dir_all(done)?;
        for name in names {
            let path = done.join(name);
            fs::write(&path, name.as_bytes())?;
            batcher.push(path);
        }
        Ok(())
    }

    fn entries(bundle: &Path) -> TestResult<Vec<String>> {
        let archive = ZipArchive::new(File::open(bundle)?)?;
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        Ok(names)
    }

    #[test]
    fn flush_commits_every_file_once_and_deletes_sources() -> TestResult<()> {
        let dir = TempDir::new()?;
        let done = dir.path().join("Done");
        let batcher = batcher(dir.path(), ArchiveGate::new())?;
        let names: Vec<String> = (0..23).map(|i| format!("f{i:02}.json")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        queue_files(&batcher, &done, &refs)?;

        let outcome = batcher.flush()?;
        let bundle = batcher.current_bundle();
        assert_eq!(outcome, FlushOutcome::Flushed { bundle: bundle.clone(), files: 23 });
        assert_eq!(entries(&bundle)?, names);
        assert!(refs.iter().all(|name| !done.join(name).exists()));
        assert!(batcher.is_empty());

        let mut archive = ZipArchive::new(File::open(&bundle)?)?;
        let mut contents = String::new();
        archive.by_name("f07.json")?.read_to_string(&mut contents)?;
        assert_eq!(contents, "f07.json");
        Ok(())
    }

    #[test]
    fn flush_appends_and_renames_colliding_entries() -> TestResult<()> {
        let dir = TempDir::new()?;
        let done = dir.path().join("Done");
        let batcher = batcher(dir.path(), ArchiveGate::new())?;
        queue_files(&batcher, &done, &["a.json"])?;
        batcher.flush()?;
        queue_files(&batcher, &done, &["a.json", "b.json"])?;
        batcher.flush()?;

        let names = entries(&batcher.current_bundle())?;
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"a.json".to_string()));
        assert!(names.contains(&"b.json".to_string()));
        assert!(names.iter().any(|name| name.starts_with("a.") && name.len() == "a..json".len() + 8));
        Ok(())
    }

    #[test]
    fn flush_skips_missing_files_and_is_noop_when_gate_is_held() -> TestResult<()> {
        let dir = TempDir::new()?;
        let done = dir.path().join("Done");
        let gate = ArchiveGate::new();
        let batcher = batcher(dir.path(), gate.clone())?;
        assert_eq!(batcher.flush()?, FlushOutcome::Empty);

        queue_files(&batcher, &done, &["a.json"])?;
        batcher.push(done.join("ghost.json"));
        {
            let _held = gate.0.lock();
            assert_eq!(batcher.flush()?, FlushOutcome::Busy);
            assert_eq!(batcher.len(), 2);
        }
        let outcome = batcher.flush()?;
        assert!(matches!(outcome, FlushOutcome::Flushed { files: 1, .. }));
        Ok(())
    }

    #[test]
    fn later_batches_append_in_place_without_side_files() -> TestResult<()> {
        let dir = TempDir::new()?;
        let done = dir.path().join("Done");
        let batcher = batcher(dir.path(), ArchiveGate::new())?;
        queue_files(&batcher, &done, &["a.json"])?;
        batcher.flush()?;
        let bundle = batcher.current_bundle();
        let first_len = fs::metadata(&bundle)?.len();

        queue_files(&batcher, &done, &["b.json", "c.json"])?;
        batcher.flush()?;

        assert!(fs::metadata(&bundle)?.len() > first_len);
        assert_eq!(entries(&bundle)?, vec!["a.json", "b.json", "c.json"]);
        let leftovers: Vec<_> = fs::read_dir(&done)?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        let bundle_name = bundle
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        assert_eq!(leftovers, vec![bundle_name]);
        Ok(())
    }

    #[test]
    fn interrupted_append_is_rolled_back_before_the_next_batch() -> TestResult<()> {
        let dir = TempDir::new()?;
        let done = dir.path().join("Done");
        let batcher = batcher(dir.path(), ArchiveGate::new())?;
        queue_files(&batcher, &done, &["a.json"])?;
        batcher.flush()?;
        let bundle = batcher.current_bundle();
        let committed = fs::read(&bundle)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&bundle)?;
        let journal = UndoJournal::record(&bundle, &mut file, 0)?;
        file.set_len(u64::try_from(committed.len())? / 2)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(b"torn entry")?;
        drop(file);
        assert!(journal.path.exists());
        assert!(ZipArchive::new(File::open(&bundle)?).is_err());

        queue_files(&batcher, &done, &["b.json"])?;
        batcher.flush()?;
        assert_eq!(entries(&bundle)?, vec!["a.json", "b.json"]);
        assert!(!journal.path.exists());
        Ok(())
    }

    #[test]
    fn failed_batch_stays_queued() -> TestResult<()> {
        let dir = TempDir::new()?;
        let done = dir.path().join("Done");
        let batcher = batcher(dir.path(), ArchiveGate::new())?;
        queue_files(&batcher, &done, &["a.json"])?;
        fs::write(batcher.current_bundle(), b"not a zip")?;

        assert!(batcher.flush().is_err());
        assert_eq!(batcher.len(), 1);
        assert!(done.join("a.json").exists());
        Ok(())
    }

    #[test]
    fn push_reports_auto_flush_threshold() -> TestResult<()> {
        let dir = TempDir::new()?;
        let batcher = batcher(dir.path(), ArchiveGate::new())?;
        let over: Vec<bool> = (0..=AUTO_FLUSH_THRESHOLD)
            .map(|i| batcher.push(PathBuf::from(format!("/done/{i}.json"))))
            .collect();
        assert!(over[..AUTO_FLUSH_THRESHOLD].iter().all(|flag| !flag));
        assert!(over[AUTO_FLUSH_THRESHOLD]);
        Ok(())
    }
}
