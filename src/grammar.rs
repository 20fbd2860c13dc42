//! Artifact file names.
//!
//! A prebuilt binary is published under a name that encodes everything needed
//! to judge it without downloading it:
//!
//! ```text
//! v{version}-m{module_abi}-n{native_api}-{os}_{major}.{minor}-{libc}_{major}.{minor}[.{patch}]-{arch}
//! ```
//!
//! The package version, module ABI and architecture are matched literally
//! against the local values; the rest is captured and judged later by
//! [`crate::compat`].

use regex::Regex;
use crate::platform::{LibcVersion, OsVersion};

/// The judged fields of an artifact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub native_api: u32,
    pub os: String,
    pub os_major: u32,
    pub os_minor: u32,
    pub libc: String,
    pub libc_major: u32,
    pub libc_minor: u32,
    pub libc_patch: Option<u32>,
}

impl ArtifactName {
    pub fn os_version(&self) -> OsVersion {
        OsVersion {
            major: self.os_major,
            minor: self.os_minor,
        }
    }

    /// The libc requirement, with an absent patch level read as `0`.
    pub fn libc_version(&self) -> LibcVersion {
        LibcVersion::new(self.libc_major, self.libc_minor, self.libc_patch.unwrap_or(0))
    }
}

/// Recognizes artifact names built for one package version, module ABI and
/// architecture.
#[derive(Debug, Clone)]
pub struct ArtifactGrammar {
    version: String,
    module_abi: String,
    arch: String,
    pattern: Regex,
}

impl ArtifactGrammar {
    /// Builds the matcher for the given literal fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting pattern cannot be compiled.
    pub fn new(version: &str, module_abi: &str, arch: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"^v{}-m{}-n(\d+)-([A-Za-z0-9]+)_(\d+)\.(\d+)-([A-Za-z0-9]+)_(\d+)\.(\d+)(?:\.(\d+))?-{}$",
            regex::escape(version),
            regex::escape(module_abi),
            regex::escape(arch),
        ))?;
        Ok(Self {
            version: version.to_string(),
            module_abi: module_abi.to_string(),
            arch: arch.to_string(),
            pattern,
        })
    }

    /// Parses an artifact stem (the file name without its binary suffix).
    ///
    /// Returns `None` for names that are not artifacts for this host, which
    /// is not an error: release pages carry plenty of those.
    pub fn parse(&self, stem: &str) -> Option<ArtifactName> {
        let caps = self.pattern.captures(stem)?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        Some(ArtifactName {
            native_api: number(1)?,
            os: caps.get(2)?.as_str().to_string(),
            os_major: number(3)?,
            os_minor: number(4)?,
            libc: caps.get(5)?.as_str().to_string(),
            libc_major: number(6)?,
            libc_minor: number(7)?,
            libc_patch: match caps.get(8) {
                Some(_) => Some(number(8)?),
                None => None,
            },
        })
    }

    /// Writes the stem this grammar would accept for `name`.
    pub fn format(&self, name: &ArtifactName) -> String {
        let mut libc = format!("{}_{}.{}", name.libc, name.libc_major, name.libc_minor);
        if let Some(patch) = name.libc_patch {
            libc.push_str(&format!(".{patch}"));
        }
        format!(
            "v{}-m{}-n{}-{}_{}.{}-{}-{}",
            self.version,
            self.module_abi,
            name.native_api,
            name.os,
            name.os_major,
            name.os_minor,
            libc,
            self.arch,
        )
    }
}
