//! The `prebin.toml` manifest and the per-run options layered over it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use semver::Version;
use crate::catalog::DEFAULT_API_HOST;
use crate::error::ConfigError;
use crate::platform::{AbiVersions, Overrides};

/// Default manifest file name, looked up in the current directory.
pub const MANIFEST_FILE: &str = "prebin.toml";

/// Represents the contents of a `prebin.toml` file.
///
/// Every field is optional at this level so that a missing one can be
/// reported by name; [`PrebinToml::into_config`] does the checking.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct PrebinToml {
    /// The native package and where its release lives.
    pub package: PackageSection,
    /// How to build the package locally.
    pub build: BuildSection,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct PackageSection {
    pub name: Option<String>,
    /// The package version (semantic versioning, no leading `v`).
    pub version: Option<String>,
    /// `owner/repo`, or a repository URL on the release host.
    pub repository: Option<String>,
    /// Where the installed binary is written.
    pub destination: Option<PathBuf>,
    /// Whether the package loads through the versioned native API.
    pub native_api: bool,
    pub api_host: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct BuildSection {
    pub command: Option<String>,
    pub prebuild: Option<String>,
    pub package_manager: Option<String>,
    /// Stage the release's minbuild archive before building. Defaults to on.
    pub minbuild: Option<bool>,
    pub minbuild_dir: Option<PathBuf>,
    /// Build-time tools, name to version.
    pub dependencies: BTreeMap<String, String>,
}

/// A validated manifest with every path made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub name: String,
    pub version: String,
    /// Always `owner/repo`.
    pub repository: String,
    pub destination: PathBuf,
    pub native_api: bool,
    pub api_host: String,
    /// The directory the manifest lives in. Builds run here.
    pub root: PathBuf,
    pub build: BuildConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub command: String,
    pub prebuild: Option<String>,
    pub package_manager: Option<String>,
    pub dependencies: BTreeMap<String, String>,
    pub minbuild: bool,
    pub minbuild_dir: PathBuf,
}

impl PrebinToml {
    /// Loads a `PrebinToml` from a file path.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or deserialized.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PrebinToml, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the manifest and resolves relative paths against `root`.
    ///
    /// # Errors
    /// Returns the first missing or malformed field.
    pub fn into_config(self, root: &Path) -> Result<Config, ConfigError> {
        let package = self.package;
        let name = required(package.name, "package.name")?;
        let version = required(package.version, "package.version")?;
        Version::parse(&version).map_err(|err| ConfigError::Invalid {
            field: "package.version",
            reason: err.to_string(),
        })?;
        let repository = normalize_repository(&required(package.repository, "package.repository")?)?;
        let destination = package
            .destination
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("package.destination"))?;
        let api_host = match package.api_host {
            Some(host) if !host.trim().is_empty() => host.trim().trim_end_matches('/').to_string(),
            _ => DEFAULT_API_HOST.to_string(),
        };

        let build = self.build;
        let command = required(build.command, "build.command")?;
        let package_manager = build.package_manager.filter(|pm| !pm.trim().is_empty());
        let minbuild_dir = match build.minbuild_dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        };

        Ok(Config {
            name,
            version,
            repository,
            destination: root.join(destination),
            native_api: package.native_api,
            api_host,
            root: root.to_path_buf(),
            build: BuildConfig {
                command,
                prebuild: build.prebuild.filter(|p| !p.trim().is_empty()),
                package_manager,
                dependencies: build.dependencies,
                minbuild: build.minbuild.unwrap_or(true),
                minbuild_dir,
            },
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(field))
}

/// Reduces a repository reference to `owner/repo`.
///
/// Accepts the bare form as well as `https://github.com/owner/repo(.git)`,
/// `git+https://...` and `github:owner/repo`.
pub fn normalize_repository(value: &str) -> Result<String, ConfigError> {
    let mut rest = value.trim();
    for prefix in ["git+", "github:"] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    for prefix in ["https://github.com/", "http://github.com/", "ssh://git@github.com/", "git@github.com:"] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);

    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(format!("{owner}/{repo}")),
        _ => Err(ConfigError::Invalid {
            field: "package.repository",
            reason: format!("expected owner/repo, got `{value}`"),
        }),
    }
}

/// A yes/no switch that can also be scoped to a list of package names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageToggle {
    All(bool),
    Only(Vec<String>),
}

impl PackageToggle {
    /// `true`, `1`, `yes`, `on` and the empty string switch on; `false`, `0`,
    /// `no` and `off` switch off; anything else is a comma-separated list of
    /// package names.
    pub fn parse(value: &str) -> PackageToggle {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "true" | "1" | "yes" | "on" => PackageToggle::All(true),
            "false" | "0" | "no" | "off" => PackageToggle::All(false),
            _ => PackageToggle::Only(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect(),
            ),
        }
    }

    pub fn enabled_for(&self, package: &str) -> bool {
        match self {
            PackageToggle::All(on) => *on,
            PackageToggle::Only(names) => names.iter().any(|name| name == package),
        }
    }
}

/// Everything about a run that does not come from the manifest.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip prebuilt binaries and build locally.
    pub build_from_source: bool,
    /// Build locally when no prebuilt binary could be installed.
    pub fallback_to_build: bool,
    /// Discard build command output.
    pub quiet_build: bool,
    /// Overrides the manifest's package manager.
    pub package_manager: Option<String>,
    pub overrides: Overrides,
    pub abi: AbiVersions,
}
