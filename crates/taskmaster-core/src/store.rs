//! On-disk repository for task sets.
//!
//! Every mutation goes through [`Store::update`], which holds the per-set lock
//! file for the duration of load, mutate, validate and save. The shared
//! `index.json` is rewritten under its own lock. Readers never lock; atomic
//! writes guarantee they see a complete snapshot.

use crate::autoloop::LoopControl;
use crate::config::Config;
use crate::error::{Result, TaskError};
use crate::graph::{self, GraphReport};
use crate::index::Index;
use crate::io;
use crate::paths;
use crate::taskset::TaskSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Locks older than this are assumed to belong to a crashed writer.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(120);

/// How long a writer waits for `index.lock` before giving up.
const INDEX_LOCK_WAIT: Duration = Duration::from_secs(5);
const INDEX_LOCK_POLL: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// SetLock
// ---------------------------------------------------------------------------

/// Exclusive writer marker for one task set, or for `index.json`.
/// Removed on drop.
#[derive(Debug)]
pub struct SetLock {
    path: PathBuf,
}

impl SetLock {
    fn acquire(root: &Path, slug: &str) -> Result<Self> {
        Self::try_acquire(&paths::lock_path(root, slug), &format!("task set {slug}"))
    }

    /// Every set writer contends on `index.lock`; poll until it frees up.
    fn acquire_index(root: &Path) -> Result<Self> {
        let path = paths::index_lock_path(root);
        let deadline = Instant::now() + INDEX_LOCK_WAIT;
        loop {
            match Self::try_acquire(&path, paths::INDEX_FILE) {
                Err(TaskError::Locked(_)) if Instant::now() < deadline => {
                    thread::sleep(INDEX_LOCK_POLL)
                }
                other => return other,
            }
        }
    }

    fn try_acquire(path: &Path, what: &str) -> Result<Self> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Self::is_stale(path) {
                    tracing::warn!(lock = %what, path = %path.display(), "removing stale lock");
                    io::remove_if_exists(path)?;
                    return Self::create(path).map_err(|_| TaskError::Locked(what.to_string()));
                }
                Err(TaskError::Locked(what.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "PID={}", std::process::id())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .is_some_and(|age| age > STALE_LOCK_AFTER)
    }
}

impl Drop for SetLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open an initialized project.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !paths::taskmaster_dir(&root).is_dir() {
            return Err(TaskError::NotInitialized);
        }
        Ok(Self { root })
    }

    /// Create `.taskmaster/` with a default config and empty index.
    /// Existing files are left alone.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        io::ensure_dir(&paths::sets_dir(&root))?;
        if !paths::config_path(&root).exists() {
            Config::default().save(&root)?;
        }
        if !paths::index_path(&root).exists() {
            Index::default().save(&root)?;
        }
        tracing::debug!(root = %root.display(), "initialized store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> Result<Config> {
        Config::load(&self.root)
    }

    pub fn exists(&self, slug: &str) -> bool {
        paths::state_path(&self.root, slug).exists()
    }

    // -----------------------------------------------------------------------
    // Task sets
    // -----------------------------------------------------------------------

    pub fn create_set(&self, slug: &str, title: &str) -> Result<TaskSet> {
        self.create_set_with(slug, title, |set| Ok(set.clone()))
    }

    /// Build a new set in memory, apply `f` and validate it before anything
    /// is written. A rejected batch leaves no set behind.
    pub fn create_set_with<T, F>(&self, slug: &str, title: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskSet) -> Result<T>,
    {
        paths::validate_slug(slug)?;
        if self.exists(slug) {
            return Err(TaskError::TaskSetExists(slug.to_string()));
        }
        let mut set = TaskSet::new(slug, title);
        let out = f(&mut set)?;
        prepare(&mut set)?;

        io::ensure_dir(&paths::set_dir(&self.root, slug))?;
        let _lock = SetLock::acquire(&self.root, slug)?;
        if self.exists(slug) {
            return Err(TaskError::TaskSetExists(slug.to_string()));
        }
        self.save(&set)?;
        Ok(out)
    }

    /// Read a set; the summary is always recomputed, never trusted from disk.
    pub fn load(&self, slug: &str) -> Result<TaskSet> {
        let path = paths::state_path(&self.root, slug);
        if !path.exists() {
            return Err(TaskError::TaskSetNotFound(slug.to_string()));
        }
        let mut set: TaskSet = io::read_json(&path)?;
        set.recompute_summary();
        Ok(set)
    }

    /// All sets, ordered by slug.
    pub fn list(&self) -> Result<Vec<TaskSet>> {
        let dir = paths::sets_dir(&self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut slugs: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(paths::STATE_FILE).exists())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        slugs.sort();
        slugs.iter().map(|s| self.load(s)).collect()
    }

    pub fn index(&self) -> Result<Index> {
        Index::load(&self.root)
    }

    /// Rebuild `index.json` from the state files on disk.
    pub fn rebuild_index(&self) -> Result<Index> {
        let _lock = SetLock::acquire_index(&self.root)?;
        let sets = self.list()?;
        let index = Index::from_sets(&sets);
        index.save(&self.root)?;
        Ok(index)
    }

    /// Take the writer lock without mutating anything.
    pub fn lock(&self, slug: &str) -> Result<SetLock> {
        if !self.exists(slug) {
            return Err(TaskError::TaskSetNotFound(slug.to_string()));
        }
        SetLock::acquire(&self.root, slug)
    }

    /// Apply `f` under the set's writer lock.
    ///
    /// The set is validated after `f` runs; cycles or dangling references
    /// abort the update and nothing is written.
    pub fn update<T, F>(&self, slug: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskSet) -> Result<T>,
    {
        let _lock = self.lock(slug)?;
        let mut set = self.load(slug)?;
        let out = f(&mut set)?;
        prepare(&mut set)?;
        self.save(&set)?;
        Ok(out)
    }

    /// Caller holds the set lock; the index has its own, since every set
    /// writes into it.
    fn save(&self, set: &TaskSet) -> Result<()> {
        io::write_json(&paths::state_path(&self.root, &set.slug), set)?;
        let _lock = SetLock::acquire_index(&self.root)?;
        let mut index = self.index()?;
        index.upsert(set);
        index.save(&self.root)
    }

    // -----------------------------------------------------------------------
    // Loop control
    // -----------------------------------------------------------------------

    pub fn load_loop(&self, slug: &str) -> Result<Option<LoopControl>> {
        let path = paths::loop_path(&self.root, slug);
        if !path.exists() {
            return Ok(None);
        }
        io::read_json(&path).map(Some)
    }

    /// Record a new loop. Fails while another loop is active.
    pub fn begin_loop(&self, control: &LoopControl) -> Result<()> {
        if !self.exists(&control.set) {
            return Err(TaskError::TaskSetNotFound(control.set.clone()));
        }
        if self.load_loop(&control.set)?.is_some() {
            return Err(TaskError::LoopActive(control.set.clone()));
        }
        self.save_loop(control)
    }

    pub fn save_loop(&self, control: &LoopControl) -> Result<()> {
        io::write_json(&paths::loop_path(&self.root, &control.set), control)
    }

    /// Delete the loop metadata only. Returns false when no loop was active.
    pub fn clear_loop(&self, slug: &str) -> Result<bool> {
        io::remove_if_exists(&paths::loop_path(&self.root, slug))
    }
}

/// Validate and refresh the summary ahead of a write.
fn prepare(set: &mut TaskSet) -> Result<()> {
    let report = graph::validate(set)?;
    log_repairs(set, &report);
    set.recompute_summary();
    Ok(())
}

fn log_repairs(set: &TaskSet, report: &GraphReport) {
    if !report.repairs.is_empty() {
        tracing::info!(
            set = %set.slug,
            repairs = report.repairs.len(),
            "graph repaired before save"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
