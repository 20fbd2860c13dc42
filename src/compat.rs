//! Deciding which artifacts can run here, and which of those to prefer.

use std::cmp::Ordering;
use crate::catalog::Candidate;
use crate::grammar::ArtifactName;
use crate::platform::{LibcVersion, LocalLibc, OsVersion, PlatformFingerprint};

/// Brings a centralized-runtime requirement to two-digit minor form:
/// `14.2` means `14.20`.
pub fn normalize_runtime(required: LibcVersion) -> LibcVersion {
    if required.minor < 10 {
        LibcVersion::new(required.major, required.minor * 10, required.patch)
    } else {
        required
    }
}

/// The libc ordering rule artifacts have always been judged by.
///
/// The second branch compares minors without looking at majors, so a
/// `1.5` runtime is accepted for a `2.3` requirement. Published artifacts
/// depend on this acceptance behavior; do not tighten it here.
pub fn loosely_satisfies(local: LibcVersion, required: LibcVersion) -> bool {
    if local.major > required.major {
        return true;
    }
    if local.minor > required.minor {
        return true;
    }
    local.patch >= required.patch
}

fn os_at_least(local: OsVersion, required: OsVersion) -> bool {
    local.major > required.major
        || (local.major == required.major && local.minor >= required.minor)
}

/// Whether an artifact built for `parsed` can be loaded on `fingerprint`.
pub fn is_suitable(
    parsed: &ArtifactName,
    fingerprint: &PlatformFingerprint,
    requires_native_api: bool,
) -> bool {
    if requires_native_api {
        match fingerprint.native_api {
            Some(local) if parsed.native_api <= local => {}
            _ => return false,
        }
    }
    if parsed.os != fingerprint.os || !os_at_least(fingerprint.os_version, parsed.os_version()) {
        return false;
    }
    if parsed.libc != fingerprint.libc {
        return false;
    }
    match &fingerprint.libc_version {
        LocalLibc::Installed(runtimes) => {
            let required = normalize_runtime(parsed.libc_version());
            runtimes
                .iter()
                .any(|&runtime| loosely_satisfies(runtime, required))
        }
        LocalLibc::Single(local) => loosely_satisfies(*local, parsed.libc_version()),
    }
}

/// Most-preferred first: newest native API, then newest OS, then newest libc.
///
/// Only meaningful between names that already passed [`is_suitable`] for the
/// same host, so OS and libc families are equal.
pub fn preference(a: &ArtifactName, b: &ArtifactName) -> Ordering {
    b.native_api
        .cmp(&a.native_api)
        .then(b.os_major.cmp(&a.os_major))
        .then(b.os_minor.cmp(&a.os_minor))
        .then(b.libc_major.cmp(&a.libc_major))
        .then(b.libc_minor.cmp(&a.libc_minor))
        .then(b.libc_patch.unwrap_or(0).cmp(&a.libc_patch.unwrap_or(0)))
}

/// Sorts suitable candidates in place, most-preferred first. Stable.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| preference(&a.name, &b.name));
}
