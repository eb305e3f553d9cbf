//! Concurrent-safe storage engine for OCI Image Layout directories.
//!
//! An OCI layout is a directory holding an `oci-layout` version marker, an
//! `index.json` listing the top-level manifests, and content-addressed blobs.
//! This crate maintains the marker and the index for any number of layouts
//! under one filesystem root, with:
//!
//! - atomic index replacement (temporary file plus rename);
//! - serialized read-modify-write updates of each index;
//! - deterministic resolution of entries by tag or digest, with duplicate
//!   pruning on update;
//! - advisory GC locks and modified tracking for an external collector;
//! - per-layout throttling of concurrent content writes.
//!
//! Blob transfer, manifest validation and the collector's sweep itself are
//! left to the caller.
//!
//! ```no_run
//! use ocistore::{OciDir, OciDirConfig, Reference};
//!
//! let dir = OciDir::open_dir("/var/lib/layouts", OciDirConfig::default())?;
//! let r = Reference::parse("app:v1");
//! dir.init_index(&r)?;
//! for tag in dir.tag_list(&r)? {
//!     println!("{tag}");
//! }
//! # Ok::<(), ocistore::Error>(())
//! ```

pub mod error;
pub mod fs;
pub mod gc;
pub mod layout;
pub mod ocidir;
pub mod reference;
pub mod resolve;
pub mod throttle;

#[cfg(any(test, feature = "test"))]
pub mod test;

mod util;

pub use error::{Error, ErrorKind, Result, Step};
pub use fs::{DirFs, LayoutFs, MemFs};
pub use gc::GcState;
pub use ocidir::{GcSweep, OciDir, OciDirConfig, OciDirGuard, DEFAULT_THROTTLE};
pub use reference::Reference;
pub use util::clean_path;

// Re-export the OCI types that appear in the API
pub use oci_spec::image::{Descriptor, ImageIndex};
