//! Debian version ordering helpers.
//!
//! Supersession decisions compare versions under Debian semantics (epoch,
//! upstream component, revision component), never lexically.

use crate::{MetadataError, Result};
use debversion::Version;
use std::cmp::Ordering;

/// Parse a Debian version string.
pub fn parse(version: &str) -> Result<Version> {
    version
        .parse::<Version>()
        .map_err(|e| MetadataError::InvalidVersion {
            version: version.to_string(),
            reason: e.to_string(),
        })
}

/// Whether a version names a native package (no Debian revision component).
pub fn is_native(version: &Version) -> bool {
    version.debian_revision.is_none()
}

/// Compare only the upstream components of two versions, Debian-style.
pub fn upstream_cmp(a: &Version, b: &Version) -> Ordering {
    let a_upstream = Version {
        epoch: None,
        upstream_version: a.upstream_version.clone(),
        debian_revision: None,
    };
    let b_upstream = Version {
        epoch: None,
        upstream_version: b.upstream_version.clone(),
        debian_revision: None,
    };
    a_upstream.cmp(&b_upstream)
}
