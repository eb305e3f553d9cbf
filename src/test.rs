//! Helpers shared by unit and integration tests.

use std::{ffi::OsString, path::PathBuf};

use oci_spec::image::{Descriptor, DescriptorBuilder, Digest, MediaType};
use sha2::Sha256;
use tempfile::TempDir;

use crate::layout::set_ref_name;

fn tmpdir_base() -> OsString {
    std::env::var_os("OCISTORE_TEST_TMPDIR").unwrap_or_else(|| std::env::temp_dir().into())
}

/// A scratch directory, under `$OCISTORE_TEST_TMPDIR` when set.
pub fn tempdir() -> TempDir {
    let base = PathBuf::from(tmpdir_base());
    std::fs::create_dir_all(&base).unwrap();
    TempDir::with_prefix_in("ocistore-test-", base).unwrap()
}

/// The sha256 digest of `content`.
pub fn digest_of(content: &[u8]) -> Digest {
    use sha2::Digest as _;

    format!("sha256:{}", hex::encode(Sha256::digest(content)))
        .parse()
        .unwrap()
}

/// An untagged image manifest descriptor for `content`.
pub fn descriptor(content: &[u8]) -> Descriptor {
    DescriptorBuilder::default()
        .media_type(MediaType::ImageManifest)
        .digest(digest_of(content))
        .size(content.len() as u64)
        .build()
        .unwrap()
}

/// Like [`descriptor`], carrying a tag annotation.
pub fn tagged(content: &[u8], tag: &str) -> Descriptor {
    let mut desc = descriptor(content);
    set_ref_name(&mut desc, tag);
    desc
}
