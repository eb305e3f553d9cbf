//! Finding and placing entries in an image index.
//!
//! An entry's identity is its tag annotation when it has one, and its digest
//! otherwise.  Insertion order matters: lookups return the first match, and
//! [`index_set`] keeps the first matching slot while pruning later
//! duplicates, which converges an index that has accumulated several entries
//! for one reference back to a single entry.
//!
//! Tag lookups fall back to matching a `:<tag>` suffix, so entries annotated
//! with a fully qualified name (`registry.example/app:v1`) are found by their
//! bare tag.  Two images from different repositories sharing a tag are
//! ambiguous under this rule; the first entry wins.

use oci_spec::image::{Descriptor, ImageIndex};

use crate::{
    error::{Error, Result},
    layout::{ref_name, set_ref_name},
    reference::Reference,
};

fn digest_matches(descriptor: &Descriptor, digest: &str) -> bool {
    descriptor.digest().to_string() == digest
}

/// Returns the entry selected by `r`.
pub fn index_get(index: &ImageIndex, r: &Reference) -> Result<Descriptor> {
    let manifests = index.manifests();

    let found = if let Some(digest) = r.digest() {
        manifests.iter().find(|m| digest_matches(m, digest))
    } else if let Some(tag) = r.lookup_tag() {
        let suffix = format!(":{tag}");
        manifests
            .iter()
            .find(|m| ref_name(m) == Some(tag))
            .or_else(|| {
                manifests
                    .iter()
                    .find(|m| ref_name(m).is_some_and(|name| name.ends_with(&suffix)))
            })
    } else {
        None
    };

    found
        .cloned()
        .ok_or_else(|| Error::NotFound(r.to_string()))
}

/// Inserts `descriptor` into the index under the identity of `r`.
///
/// A tagged reference stamps its tag onto the descriptor.  The first entry
/// with the same identity (an untagged entry with the same digest, or an
/// entry with the same tag) is replaced in place and any later entries with
/// that identity are removed; without a match the descriptor is appended.
///
/// Returns whether the index changed.
pub fn index_set(index: &mut ImageIndex, r: &Reference, mut descriptor: Descriptor) -> bool {
    let tag = r.tag();
    if let Some(tag) = tag {
        set_ref_name(&mut descriptor, tag);
    }

    let digest = descriptor.digest().clone();
    let same_identity = |m: &Descriptor| match ref_name(m) {
        None => *m.digest() == digest,
        Some(name) => tag == Some(name),
    };

    let mut manifests = index.manifests().clone();
    match manifests.iter().position(|m| same_identity(m)) {
        Some(pos) => {
            manifests[pos] = descriptor;
            for i in (pos + 1..manifests.len()).rev() {
                if same_identity(&manifests[i]) {
                    manifests.remove(i);
                }
            }
        }
        None => manifests.push(descriptor),
    }

    let changed = manifests != *index.manifests();
    if changed {
        index.set_manifests(manifests);
    }
    changed
}

/// Removes the entries selected by `r`: every entry carrying its tag, or for
/// a digest-only reference every untagged entry with that digest.
///
/// Tags match exactly: unlike [`index_get`] there is no `:<tag>` suffix
/// fallback, so an entry named `registry/app:v1` resolves by `v1` but is only
/// removed by its full name.
///
/// Returns the number of entries removed, failing when nothing matched.
pub fn index_remove(index: &mut ImageIndex, r: &Reference) -> Result<usize> {
    let mut manifests = index.manifests().clone();
    let before = manifests.len();

    match (r.tag(), r.digest()) {
        (Some(tag), _) => manifests.retain(|m| ref_name(m) != Some(tag)),
        (None, Some(digest)) => {
            manifests.retain(|m| ref_name(m).is_some() || !digest_matches(m, digest))
        }
        (None, None) => {}
    }

    let removed = before - manifests.len();
    if removed == 0 {
        return Err(Error::NotFound(r.to_string()));
    }
    index.set_manifests(manifests);
    Ok(removed)
}

/// The distinct tags in the index, in index order.
pub fn tag_list(index: &ImageIndex) -> Vec<String> {
    let mut tags: Vec<String> = vec![];
    for name in index.manifests().iter().filter_map(ref_name) {
        if !tags.iter().any(|t| t == name) {
            tags.push(name.to_string());
        }
    }
    tags
}
