//! Encoding of the two metadata files at the root of an OCI layout.
//!
//! ```text
//! <root>/
//! ├── oci-layout      # {"imageLayoutVersion": "1.0.0"}
//! ├── index.json      # image index listing the top-level manifests
//! └── blobs/...       # content, managed outside this crate
//! ```
//!
//! Nothing here performs I/O; see [`crate::ocidir`] for how the files are
//! read and atomically replaced.

use std::{collections::HashMap, path::Path};

use oci_spec::image::{Descriptor, ImageIndex, MediaType};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the layout marker file.
pub const IMAGE_LAYOUT_FILE: &str = "oci-layout";

/// Name of the index file.
pub const INDEX_FILE: &str = "index.json";

/// Pattern for temporary index files, created next to [`INDEX_FILE`].
pub const INDEX_TMP_PATTERN: &str = "index.json.*.tmp";

/// The only layout version this crate reads or writes.
pub const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

/// Annotation carrying the tag of an index entry.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Annotation containerd writes with the full image name.  Recognized, never
/// written, and given no special treatment by lookups.
pub const ANNOTATION_CONTAINERD_IMAGE_NAME: &str = "io.containerd.image.name";

const INDEX_SCHEMA_VERSION: u32 = 2;

/// Contents of the `oci-layout` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    pub image_layout_version: String,
}

impl Default for LayoutMarker {
    fn default() -> Self {
        Self {
            image_layout_version: IMAGE_LAYOUT_VERSION.to_string(),
        }
    }
}

impl LayoutMarker {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| Error::Encode {
            what: IMAGE_LAYOUT_FILE,
            source,
        })
    }

    /// Parses a marker read from `path`.
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn check_version(&self) -> Result<()> {
        if self.image_layout_version != IMAGE_LAYOUT_VERSION {
            return Err(Error::VersionMismatch {
                expected: IMAGE_LAYOUT_VERSION.to_string(),
                found: self.image_layout_version.clone(),
            });
        }
        Ok(())
    }
}

/// An empty image index with an empty annotation map.
pub fn index_create() -> ImageIndex {
    let mut index = ImageIndex::default();
    index
        .set_schema_version(INDEX_SCHEMA_VERSION)
        .set_media_type(Some(MediaType::ImageIndex))
        .set_manifests(vec![])
        .set_annotations(Some(HashMap::new()));
    index
}

pub fn encode_index(index: &ImageIndex) -> Result<Vec<u8>> {
    serde_json::to_vec(index).map_err(|source| Error::Encode {
        what: INDEX_FILE,
        source,
    })
}

/// Parses an index read from `path`.
pub fn decode_index(bytes: &[u8], path: &Path) -> Result<ImageIndex> {
    serde_json::from_slice(bytes).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// The tag annotation of a descriptor, if present and non-empty.
pub fn ref_name(descriptor: &Descriptor) -> Option<&str> {
    descriptor
        .annotations()
        .as_ref()?
        .get(ANNOTATION_REF_NAME)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

/// Sets the tag annotation of a descriptor, keeping its other annotations.
pub fn set_ref_name(descriptor: &mut Descriptor, tag: &str) {
    let mut annotations = descriptor.annotations().clone().unwrap_or_default();
    annotations.insert(ANNOTATION_REF_NAME.to_string(), tag.to_string());
    descriptor.set_annotations(Some(annotations));
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::descriptor;

    #[test]
    fn test_marker() {
        let bytes = LayoutMarker::default().encode().unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"imageLayoutVersion":"1.0.0"}"#
        );
        let marker = LayoutMarker::decode(&bytes, Path::new(IMAGE_LAYOUT_FILE)).unwrap();
        marker.check_version().unwrap();

        let marker = LayoutMarker::decode(
            br#"{"imageLayoutVersion":"2.0.0"}"#,
            Path::new(IMAGE_LAYOUT_FILE),
        )
        .unwrap();
        let err = marker.check_version().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::VersionMismatch);

        let err = LayoutMarker::decode(b"{", Path::new(IMAGE_LAYOUT_FILE)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
        let err = LayoutMarker::decode(b"{}", Path::new(IMAGE_LAYOUT_FILE)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
    }

    #[test]
    fn test_empty_index() {
        let index = index_create();
        let json: serde_json::Value = serde_json::from_slice(&encode_index(&index).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": [],
                "annotations": {},
            })
        );
    }

    #[test]
    fn test_index_roundtrip() {
        let mut tagged = descriptor(b"one");
        set_ref_name(&mut tagged, "v1");
        let mut qualified = descriptor(b"two");
        set_ref_name(&mut qualified, "registry.example/app:v2");
        let untagged = descriptor(b"three");

        for manifests in [vec![], vec![tagged.clone()], vec![tagged, qualified, untagged]] {
            let mut index = index_create();
            index.set_manifests(manifests);
            let bytes = encode_index(&index).unwrap();
            let decoded = decode_index(&bytes, Path::new(INDEX_FILE)).unwrap();
            assert_eq!(decoded, index);
        }
    }

    #[test]
    fn test_descriptor_json() {
        let mut desc = descriptor(b"one");
        set_ref_name(&mut desc, "v1");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["mediaType"], "application/vnd.oci.image.manifest.v1+json");
        assert_eq!(json["size"], 3);
        assert_eq!(json["annotations"][ANNOTATION_REF_NAME], "v1");
        assert!(json["digest"].as_str().unwrap().starts_with("sha256:"));
    }

    #[test]
    fn test_ref_name() {
        let mut desc = descriptor(b"x");
        assert_eq!(ref_name(&desc), None);
        set_ref_name(&mut desc, "");
        assert_eq!(ref_name(&desc), None);
        set_ref_name(&mut desc, "v1");
        assert_eq!(ref_name(&desc), Some("v1"));

        let mut annotations = desc.annotations().clone().unwrap();
        annotations.insert(ANNOTATION_CONTAINERD_IMAGE_NAME.into(), "docker.io/x:v1".into());
        desc.set_annotations(Some(annotations));
        set_ref_name(&mut desc, "v2");
        assert_eq!(ref_name(&desc), Some("v2"));
        assert_eq!(desc.annotations().as_ref().unwrap().len(), 2);
    }
}
