//! The storage engine for OCI layout directories.
//!
//! An [`OciDir`] owns a filesystem backend and the in-memory bookkeeping that
//! coordinates concurrent users of the layouts stored in it:
//!
//! - the index of each layout is only ever replaced by writing a temporary
//!   file next to `index.json` and renaming it into place, so readers see
//!   either the old or the new document in full;
//! - read-modify-write cycles on an index happen under the engine mutex, so
//!   two updates of the same layout never interleave;
//! - per-path GC locks and modified flags tell an external collector when
//!   it is safe and worthwhile to reclaim content (see [`crate::gc`]);
//! - per-path semaphores bound concurrent content writes (see
//!   [`crate::throttle`]).
//!
//! A caller mutating a layout typically does:
//!
//! ```no_run
//! # async fn f(dir: &ocistore::OciDir, r: &ocistore::Reference,
//! #            manifest: oci_spec::image::Descriptor) -> ocistore::Result<()> {
//! dir.gc_lock(r);
//! if let Some(throttle) = dir.throttle(r, true) {
//!     let _permit = throttle.acquire_owned().await.unwrap();
//!     // write blobs and the manifest
//! }
//! let result = dir.update_index(r, manifest, false);
//! dir.mark_modified(r);
//! dir.gc_unlock(r);
//! result
//! # }
//! ```
//!
//! Operations are available on [`OciDir`] directly, each taking the engine
//! mutex for its own duration, and on the [`OciDirGuard`] returned by
//! [`OciDir::lock`] for callers composing several operations under one
//! acquisition.

use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use oci_spec::image::{Descriptor, ImageIndex};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, dispatcher::DefaultGuard, trace, Dispatch};

use crate::{
    error::{Error, IoContext, Result, Step},
    fs::{DirFs, LayoutFs, TempFile},
    gc::{GcState, GcTracker},
    layout::{
        decode_index, encode_index, index_create, LayoutMarker, IMAGE_LAYOUT_FILE, INDEX_FILE,
        INDEX_TMP_PATTERN,
    },
    reference::Reference,
    resolve::{index_get, index_remove, index_set, tag_list},
    throttle::ThrottleMap,
    util::{join_path, IoKindFilter},
};

/// Concurrent content writes allowed per layout path by default.
pub const DEFAULT_THROTTLE: usize = 3;

/// Construction-time settings of an [`OciDir`].
///
/// The serializable part can be read from TOML:
///
/// ```toml
/// gc = true
/// throttle = 3
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OciDirConfig {
    /// Whether [`OciDir::close`] runs garbage collection.
    pub gc: bool,

    /// Concurrent content writes per layout path; zero disables throttling.
    pub throttle: usize,

    /// Where the engine's log events go.  `None` discards them; pass
    /// `tracing::dispatcher::get_default(Dispatch::clone)` to follow the
    /// caller's subscriber.
    #[serde(skip)]
    pub log: Option<Dispatch>,
}

impl Default for OciDirConfig {
    fn default() -> Self {
        Self {
            gc: true,
            throttle: DEFAULT_THROTTLE,
            log: None,
        }
    }
}

impl OciDirConfig {
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// An external garbage collector for one layout.
///
/// [`OciDir::close`] calls this only when GC is enabled, nobody holds a GC
/// lock on the path and the path was modified.  The engine mutex is held for
/// the duration, so no new GC lock can be taken mid-sweep.
pub trait GcSweep {
    /// Reclaims content under `path` not reachable from `index`.
    fn sweep(&self, fs: &dyn LayoutFs, path: &str, index: &ImageIndex) -> io::Result<()>;
}

#[derive(Debug)]
struct State {
    gc: GcTracker,
    throttle: ThrottleMap,
}

/// Storage engine for the OCI layouts under one filesystem root.
#[derive(Debug)]
pub struct OciDir {
    fs: Arc<dyn LayoutFs>,
    gc: bool,
    log: Dispatch,
    state: Mutex<State>,
}

fn invalid_layout(path: &str, reason: &str, source: io::Error) -> Error {
    Error::InvalidLayout {
        path: PathBuf::from(path),
        reason: format!("{IMAGE_LAYOUT_FILE} {reason}"),
        source: Some(source),
    }
}

impl OciDir {
    pub fn new(fs: Arc<dyn LayoutFs>, config: OciDirConfig) -> Self {
        Self {
            fs,
            gc: config.gc,
            log: config.log.unwrap_or_else(Dispatch::none),
            state: Mutex::new(State {
                gc: GcTracker::default(),
                throttle: ThrottleMap::new(config.throttle),
            }),
        }
    }

    /// An engine over the directory at `path`, created if missing.
    pub fn open_dir(path: impl AsRef<Path>, config: OciDirConfig) -> Result<Self> {
        let path = path.as_ref();
        let fs = DirFs::create_ambient(path).with_step(Step::Open, path)?;
        Ok(Self::new(Arc::new(fs), config))
    }

    pub fn fs(&self) -> &Arc<dyn LayoutFs> {
        &self.fs
    }

    /// Takes the engine mutex.
    ///
    /// The guard's operations don't lock again, so several of them can be
    /// composed into one critical section.
    pub fn lock(&self) -> OciDirGuard<'_> {
        let log = tracing::dispatcher::set_default(&self.log);
        OciDirGuard {
            dir: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
            _log: log,
        }
    }

    /// Prevents garbage collection of the layout of `r` until a matching
    /// [`OciDir::gc_unlock`].
    pub fn gc_lock(&self, r: &Reference) {
        let mut guard = self.lock();
        let path = r.path_key();
        guard.state.gc.lock(&path);
        trace!("gc lock {path}: {:?}", guard.state.gc.get(&path));
    }

    /// Releases one GC lock.  Extra unlocks are ignored.
    pub fn gc_unlock(&self, r: &Reference) {
        let mut guard = self.lock();
        let path = r.path_key();
        guard.state.gc.unlock(&path);
        trace!("gc unlock {path}: {:?}", guard.state.gc.get(&path));
    }

    /// Records that content under the layout of `r` changed.
    pub fn mark_modified(&self, r: &Reference) {
        self.lock().state.gc.mark_modified(&r.path_key());
    }

    pub fn gc_state(&self, r: &Reference) -> GcState {
        self.lock().state.gc.get(&r.path_key())
    }

    /// The semaphore bounding content writes under the layout of `r`.
    ///
    /// Reads are never throttled, and neither is anything when the configured
    /// capacity is zero; both give `None`.
    pub fn throttle(&self, r: &Reference, put: bool) -> Option<Arc<Semaphore>> {
        if !put {
            return None;
        }
        let mut guard = self.lock();
        let path = r.path_key();
        let throttle = guard.state.throttle.get(&path);
        if throttle.is_some() {
            trace!("throttle {path}: capacity {}", guard.state.throttle.capacity());
        }
        throttle
    }

    /// Runs `sweeper` over the layout of `r` if garbage collection is enabled
    /// and the layout is unlocked and modified.
    ///
    /// Returns whether a sweep ran.  The modified flag is cleared only after a
    /// successful sweep.
    pub fn close(&self, r: &Reference, sweeper: &dyn GcSweep) -> Result<bool> {
        if !self.gc {
            return Ok(false);
        }
        let mut guard = self.lock();
        let path = r.path_key();
        let state = guard.state.gc.get(&path);
        if !state.collectable() {
            debug!("skipping gc of {path}: {state:?}");
            return Ok(false);
        }
        let index = guard.read_index(r)?;
        debug!("running gc on {path}");
        sweeper
            .sweep(self.fs.as_ref(), &path, &index)
            .with_step(Step::Sweep, &path)?;
        guard.state.gc.clear_modified(&path);
        Ok(true)
    }

    pub fn init_index(&self, r: &Reference) -> Result<()> {
        self.lock().init_index(r)
    }

    pub fn valid(&self, r: &Reference) -> Result<()> {
        self.lock().valid(r)
    }

    pub fn read_index(&self, r: &Reference) -> Result<ImageIndex> {
        self.lock().read_index(r)
    }

    pub fn write_index(&self, r: &Reference, index: &ImageIndex) -> Result<()> {
        self.lock().write_index(r, index)
    }

    pub fn update_index(&self, r: &Reference, descriptor: Descriptor, child: bool) -> Result<()> {
        self.lock().update_index(r, descriptor, child)
    }

    pub fn resolve(&self, r: &Reference) -> Result<Descriptor> {
        self.lock().resolve(r)
    }

    pub fn tag_list(&self, r: &Reference) -> Result<Vec<String>> {
        self.lock().tag_list(r)
    }

    pub fn tag_delete(&self, r: &Reference) -> Result<()> {
        self.lock().tag_delete(r)
    }

    /// Same as [`OciDir::read_index`], on the blocking thread pool.
    pub async fn read_index_async(self: &Arc<Self>, r: Reference) -> Result<ImageIndex> {
        let self_ = Arc::clone(self);
        tokio::task::spawn_blocking(move || self_.read_index(&r)).await?
    }

    /// Same as [`OciDir::update_index`], on the blocking thread pool.
    pub async fn update_index_async(
        self: &Arc<Self>,
        r: Reference,
        descriptor: Descriptor,
        child: bool,
    ) -> Result<()> {
        let self_ = Arc::clone(self);
        tokio::task::spawn_blocking(move || self_.update_index(&r, descriptor, child)).await?
    }
}

/// Exclusive access to an [`OciDir`], released on drop.
pub struct OciDirGuard<'a> {
    dir: &'a OciDir,
    state: MutexGuard<'a, State>,
    _log: DefaultGuard,
}

impl OciDirGuard<'_> {
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.dir.fs.open(path).with_step(Step::Open, path)?;
        let mut buf = vec![];
        file.read_to_end(&mut buf).with_step(Step::Read, path)?;
        Ok(buf)
    }

    fn ensure_dir(&self, dir: &str) -> Result<()> {
        self.dir
            .fs
            .mkdir_all(dir)
            .filter_kind(io::ErrorKind::AlreadyExists)
            .with_step(Step::Mkdir, dir)?;
        Ok(())
    }

    fn write_marker(&self, path: &str) -> Result<()> {
        let marker = LayoutMarker::default().encode()?;
        let mut file = self.dir.fs.create(path).with_step(Step::Create, path)?;
        file.write_all(&marker).with_step(Step::Write, path)?;
        file.close().with_step(Step::Close, path)
    }

    /// Creates the layout of `r` unless its marker file already exists.
    pub fn init_index(&self, r: &Reference) -> Result<()> {
        let dir = r.path_key();
        let marker = join_path(&dir, IMAGE_LAYOUT_FILE);
        if self.dir.fs.stat(&marker).is_ok() {
            return Ok(());
        }
        debug!("initializing oci layout at {dir}");
        self.ensure_dir(&dir)?;
        self.write_marker(&marker)
    }

    /// Checks that the layout of `r` has a marker with the supported version.
    pub fn valid(&self, r: &Reference) -> Result<()> {
        let path = join_path(&r.path_key(), IMAGE_LAYOUT_FILE);
        let mut file = self
            .dir
            .fs
            .open(&path)
            .map_err(|source| invalid_layout(&path, "cannot be opened", source))?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)
            .map_err(|source| invalid_layout(&path, "cannot be read", source))?;
        LayoutMarker::decode(&buf, Path::new(&path))?.check_version()
    }

    pub fn read_index(&self, r: &Reference) -> Result<ImageIndex> {
        self.valid(r)?;
        let path = join_path(&r.path_key(), INDEX_FILE);
        let bytes = self.read_file(&path)?;
        decode_index(&bytes, Path::new(&path))
    }

    /// Atomically replaces the index of `r`, rewriting the layout marker.
    pub fn write_index(&self, r: &Reference, index: &ImageIndex) -> Result<()> {
        let dir = r.path_key();
        let index_path = join_path(&dir, INDEX_FILE);

        self.ensure_dir(&dir)?;
        self.write_marker(&join_path(&dir, IMAGE_LAYOUT_FILE))?;

        let bytes = encode_index(index)?;
        let TempFile {
            path: tmp_path,
            mut file,
        } = self
            .dir
            .fs
            .create_temp(&dir, INDEX_TMP_PATTERN)
            .with_step(Step::CreateTemp, &index_path)?;
        let written = file.write_all(&bytes);
        let closed = file.close();
        written.with_step(Step::Write, &tmp_path)?;
        closed.with_step(Step::Close, &tmp_path)?;

        self.dir
            .fs
            .rename(&tmp_path, &index_path)
            .with_step(Step::Rename, &index_path)?;
        debug!(
            "wrote {index_path} with {} manifests",
            index.manifests().len()
        );
        Ok(())
    }

    /// Places `descriptor` in the index of `r`.
    ///
    /// A missing layout or index starts from an empty index.  Child entries
    /// (manifests referenced from a manifest list) are not listed in the
    /// index, but still cause a missing index to be created.  The index is
    /// only written when it changed.
    pub fn update_index(&self, r: &Reference, descriptor: Descriptor, child: bool) -> Result<()> {
        let (mut index, mut changed) = match self.read_index(r) {
            Ok(index) => (index, false),
            Err(err) if err.is_not_found() => {
                debug!("starting new index for {r}: {err}");
                (index_create(), true)
            }
            Err(err) => return Err(err),
        };
        if !child {
            changed |= index_set(&mut index, r, descriptor);
        }
        if changed {
            self.write_index(r, &index)?;
        } else {
            trace!("index of {r} unchanged");
        }
        Ok(())
    }

    /// The index entry selected by `r`.
    pub fn resolve(&self, r: &Reference) -> Result<Descriptor> {
        index_get(&self.read_index(r)?, r)
    }

    pub fn tag_list(&self, r: &Reference) -> Result<Vec<String>> {
        Ok(tag_list(&self.read_index(r)?))
    }

    /// Removes the entries selected by `r` and marks the layout modified.
    pub fn tag_delete(&mut self, r: &Reference) -> Result<()> {
        let mut index = self.read_index(r)?;
        let removed = index_remove(&mut index, r)?;
        debug!("removing {removed} entries for {r}");
        self.write_index(r, &index)?;
        self.state.gc.mark_modified(&r.path_key());
        Ok(())
    }
}
