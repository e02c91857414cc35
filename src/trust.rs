//! Content trust policy.
//!
//! A policy names images and registry organizations whose references must
//! be pulled and extracted with content trust verification enabled. The
//! verification itself is carried out by the image backend; this module
//! only decides whether it is required.

use std::collections::BTreeSet;

use serde::Deserialize;

/// Organization assumed for bare Docker Hub names such as `nginx`.
const IMPLICIT_ORG: &str = "library";

const SHA256_DIGEST_SEPARATOR: &str = "@sha256:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustPolicy {
    /// Image names, optionally with a tag or digest.
    #[serde(default, rename = "image")]
    pub image_matches: BTreeSet<String>,
    /// Registry organizations such as `linuxkit`.
    #[serde(default, rename = "org")]
    pub org_matches: BTreeSet<String>,
}

impl TrustPolicy {
    pub fn is_empty(&self) -> bool {
        self.image_matches.is_empty() && self.org_matches.is_empty()
    }

    /// Whether `reference` must be verified before use.
    pub fn requires_trust(&self, reference: &str) -> bool {
        self.matches_image(reference) || self.matches_org(reference)
    }

    fn matches_image(&self, reference: &str) -> bool {
        if self.image_matches.contains(reference) {
            return true;
        }
        if let Some(name) = strip_tag(reference) {
            if self.image_matches.contains(name) {
                return true;
            }
        }
        // Only sha256 digests are recognized here.
        match reference.split_once(SHA256_DIGEST_SEPARATOR) {
            Some((name, _)) => self.image_matches.contains(name),
            None => false,
        }
    }

    fn matches_org(&self, reference: &str) -> bool {
        match organization(reference) {
            Some(org) => self.org_matches.contains(org),
            None => false,
        }
    }
}

/// Strip a trailing `:tag` (and anything after it, such as a digest).
///
/// Returns `None` when the reference carries no tag. A `:` before the last
/// `/` belongs to a registry port and is not a tag.
fn strip_tag(reference: &str) -> Option<&str> {
    let name_and_tag = reference
        .split_once('@')
        .map_or(reference, |(name, _)| name);
    let name_start = name_and_tag.rfind('/').map_or(0, |slash| slash + 1);
    let colon = name_and_tag[name_start..].rfind(':')?;
    Some(&name_and_tag[..name_start + colon])
}

/// Organization implied by the reference path.
///
/// `nginx` is `library`, `org/repo` is `org` and `registry/org/repo` is
/// `org`. An empty reference has no organization.
fn organization(reference: &str) -> Option<&str> {
    if reference.is_empty() {
        return None;
    }
    let segments: Vec<&str> = reference.split('/').collect();
    match segments.as_slice() {
        [_] => Some(IMPLICIT_ORG),
        [org, _] => Some(*org),
        [_, org, ..] => Some(*org),
        [] => None,
    }
}
