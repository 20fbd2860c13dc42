//! Host fingerprint detection.
//!
//! The fingerprint is what decides which prebuilt artifacts can run here: the
//! OS family and version, the C runtime family and version(s), the CPU
//! architecture and the two ABI numbers the invoking runtime exposes. Every
//! platform axis can be overridden; whatever is not overridden is detected
//! through a per-family [`FamilyDetector`] that asks the host via a [`Probe`].
//!
//! Detection never guesses. A version that cannot be read leaves the
//! fingerprint incomplete, which sends the run down the build path.

use std::fmt;
use std::str::FromStr;
use regex::{Captures, Regex};
use tracing::{debug, info};
use crate::compat::normalize_runtime;
use crate::error::DetectError;
use crate::probe::Probe;

/// Libc family whose runtimes live in a central registry, several at a time.
pub const CENTRAL_RUNTIME_LIBC: &str = "msvc";

const RUNTIME_REGISTRY_KEY: &str = r"HKLM\SOFTWARE\Microsoft\VisualStudio\14.0\VC\Runtimes";

/// An operating system version reduced to `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
}

/// A C runtime version. Missing patch levels read as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibcVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl LibcVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for LibcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The C runtime(s) available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalLibc {
    /// One libc, one version.
    Single(LibcVersion),
    /// Every runtime version currently registered; any of them may satisfy a
    /// requirement.
    Installed(Vec<LibcVersion>),
}

impl fmt::Display for LocalLibc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalLibc::Single(version) => write!(f, "{version}"),
            LocalLibc::Installed(versions) => {
                let list: Vec<String> = versions.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", list.join(", "))
            }
        }
    }
}

/// The OS families detection knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Linux,
    Darwin,
    FreeBsd,
    Windows,
}

impl PlatformFamily {
    /// The family this binary was compiled for, if it is one we can query.
    pub fn host() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Darwin),
            "freebsd" => Some(Self::FreeBsd),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Maps an artifact OS name back to its family.
    pub fn from_os_name(name: &str) -> Option<Self> {
        match name {
            "linux" => Some(Self::Linux),
            "darwin" => Some(Self::Darwin),
            "freebsd" => Some(Self::FreeBsd),
            "win32" => Some(Self::Windows),
            _ => None,
        }
    }

    /// The OS name used in artifact file names.
    pub fn os_name(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::FreeBsd => "freebsd",
            Self::Windows => "win32",
        }
    }

    fn detector(self) -> &'static dyn FamilyDetector {
        match self {
            Self::Linux => &LinuxDetector,
            Self::Darwin => &DarwinDetector,
            Self::FreeBsd => &FreeBsdDetector,
            Self::Windows => &WindowsDetector,
        }
    }
}

/// Everything known about the host, computed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformFingerprint {
    pub os: String,
    pub os_version: OsVersion,
    pub libc: String,
    pub libc_version: LocalLibc,
    pub arch: String,
    pub module_abi: String,
    /// Only guaranteed when the package declares native-API use.
    pub native_api: Option<u32>,
}

/// A caller-supplied value for one platform axis: `name[_major.minor[.patch]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisOverride {
    pub name: String,
    pub version: Option<LibcVersion>,
}

impl FromStr for AxisOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("override must not be empty".to_string());
        }
        if let Some((name, version)) = s.rsplit_once('_') {
            if let (false, Some(version)) = (name.is_empty(), parse_dotted(version)) {
                return Ok(Self {
                    name: name.to_string(),
                    version: Some(version),
                });
            }
        }
        Ok(Self {
            name: s.to_string(),
            version: None,
        })
    }
}

/// Parses `major.minor` or `major.minor.patch`, digits only.
fn parse_dotted(text: &str) -> Option<LibcVersion> {
    let parts: Vec<&str> = text.split('.').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let mut numbers = Vec::with_capacity(3);
    for part in parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        numbers.push(part.parse::<u32>().ok()?);
    }
    Some(LibcVersion::new(
        numbers[0],
        numbers[1],
        numbers.get(2).copied().unwrap_or(0),
    ))
}

/// Per-axis overrides. Anything set here replaces detection for that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub arch: Option<AxisOverride>,
    pub libc: Option<AxisOverride>,
    pub platform: Option<AxisOverride>,
}

/// The ABI numbers exposed by the invoking runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbiVersions {
    pub module_abi: Option<String>,
    pub native_api: Option<u32>,
}

/// A libc family with a possibly-unknown version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedLibc {
    pub family: String,
    pub version: Option<LocalLibc>,
}

/// How one OS family answers the two detection questions.
trait FamilyDetector {
    fn os_version(&self, probe: &dyn Probe) -> Option<OsVersion>;
    fn libc(&self, probe: &dyn Probe, os_version: Option<OsVersion>) -> Option<DetectedLibc>;
}

struct LinuxDetector;
struct DarwinDetector;
struct FreeBsdDetector;
struct WindowsDetector;

impl FamilyDetector for LinuxDetector {
    fn os_version(&self, probe: &dyn Probe) -> Option<OsVersion> {
        first_os_version(&probe.query("uname", &["-r"])?)
    }

    fn libc(&self, probe: &dyn Probe, _os_version: Option<OsVersion>) -> Option<DetectedLibc> {
        let primary = probe
            .query("getconf", &["GNU_LIBC_VERSION"])
            .as_deref()
            .and_then(parse_getconf);
        if let Some(version) = primary {
            return Some(DetectedLibc {
                family: "glibc".to_string(),
                version: Some(LocalLibc::Single(version)),
            });
        }
        debug!("getconf gave no glibc version, trying ldd");
        parse_ldd(&probe.query("ldd", &["--version"])?)
    }
}

impl FamilyDetector for DarwinDetector {
    fn os_version(&self, probe: &dyn Probe) -> Option<OsVersion> {
        first_os_version(&probe.query("sw_vers", &["-productVersion"])?)
    }

    fn libc(&self, _probe: &dyn Probe, os_version: Option<OsVersion>) -> Option<DetectedLibc> {
        Some(libc_from_os(PlatformFamily::Darwin, os_version))
    }
}

impl FamilyDetector for FreeBsdDetector {
    fn os_version(&self, probe: &dyn Probe) -> Option<OsVersion> {
        first_os_version(&probe.query("freebsd-version", &[])?)
    }

    fn libc(&self, _probe: &dyn Probe, os_version: Option<OsVersion>) -> Option<DetectedLibc> {
        Some(libc_from_os(PlatformFamily::FreeBsd, os_version))
    }
}

impl FamilyDetector for WindowsDetector {
    fn os_version(&self, probe: &dyn Probe) -> Option<OsVersion> {
        first_os_version(&probe.query("cmd", &["/C", "ver"])?)
    }

    fn libc(&self, probe: &dyn Probe, _os_version: Option<OsVersion>) -> Option<DetectedLibc> {
        let versions = probe
            .query("reg", &["query", RUNTIME_REGISTRY_KEY, "/s", "/v", "Version"])
            .map(|output| parse_runtime_versions(&output))
            .unwrap_or_default();
        Some(DetectedLibc {
            family: CENTRAL_RUNTIME_LIBC.to_string(),
            version: (!versions.is_empty()).then_some(LocalLibc::Installed(versions)),
        })
    }
}

/// Families without independent libc versioning reuse the OS version.
/// Spells a Rust target architecture the way artifact names do, e.g.
/// `x86_64` as `x64`. Unknown names pass through.
pub fn artifact_arch(rust_arch: &str) -> &str {
    match rust_arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

fn libc_from_os(family: PlatformFamily, os_version: Option<OsVersion>) -> DetectedLibc {
    DetectedLibc {
        family: family.os_name().to_string(),
        version: os_version.map(|v| LocalLibc::Single(LibcVersion::new(v.major, v.minor, 0))),
    }
}

fn first_os_version(text: &str) -> Option<OsVersion> {
    let re = Regex::new(r"(\d+)\.(\d+)").ok()?;
    let caps = re.captures(text)?;
    Some(OsVersion {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
    })
}

fn version_from_captures(caps: &Captures) -> Option<LibcVersion> {
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    let patch = match caps.get(3) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    Some(LibcVersion::new(major, minor, patch))
}

fn parse_getconf(text: &str) -> Option<LibcVersion> {
    let re = Regex::new(r"glibc\s+(\d+)\.(\d+)(?:\.(\d+))?").ok()?;
    version_from_captures(&re.captures(text)?)
}

struct LibcSignature {
    family: &'static str,
    marker: &'static str,
    version: &'static str,
}

const LDD_SIGNATURES: [LibcSignature; 2] = [
    LibcSignature {
        family: "glibc",
        marker: r"GLIBC|GNU libc",
        version: r"(?m)^ldd\b.*?(\d+)\.(\d+)(?:\.(\d+))?[ \t]*\r?$",
    },
    LibcSignature {
        family: "musl",
        marker: r"musl libc",
        version: r"(?m)^Version\s+(\d+)\.(\d+)(?:\.(\d+))?",
    },
];

fn parse_ldd(text: &str) -> Option<DetectedLibc> {
    for signature in &LDD_SIGNATURES {
        if !Regex::new(signature.marker).ok()?.is_match(text) {
            continue;
        }
        let version = Regex::new(signature.version)
            .ok()?
            .captures(text)
            .and_then(|caps| version_from_captures(&caps));
        return Some(DetectedLibc {
            family: signature.family.to_string(),
            version: version.map(LocalLibc::Single),
        });
    }
    None
}

fn parse_runtime_versions(text: &str) -> Vec<LibcVersion> {
    let Ok(re) = Regex::new(r"Version\s+REG_SZ\s+v?(\d+)\.(\d+)\.(\d+)") else {
        return Vec::new();
    };
    let mut versions: Vec<LibcVersion> = re
        .captures_iter(text)
        .filter_map(|caps| version_from_captures(&caps))
        .collect();
    versions.sort_by_key(|v| (v.major, v.minor, v.patch));
    versions.dedup();
    versions
}

fn local_libc_from_override(name: &str, version: LibcVersion) -> LocalLibc {
    if name == CENTRAL_RUNTIME_LIBC {
        // written in the same shorthand as artifact names
        LocalLibc::Installed(vec![normalize_runtime(version)])
    } else {
        LocalLibc::Single(version)
    }
}

/// Builds the host fingerprint, preferring overrides over detection.
///
/// # Errors
///
/// Returns a [`DetectError`] when any axis stays unknown; the caller is
/// expected to fall back to building from source.
pub fn detect_fingerprint(
    probe: &dyn Probe,
    overrides: &Overrides,
    abi: &AbiVersions,
    requires_native_api: bool,
) -> Result<PlatformFingerprint, DetectError> {
    let host = PlatformFamily::host();

    let (os, family, os_version) = match &overrides.platform {
        Some(platform) => {
            let family = PlatformFamily::from_os_name(&platform.name);
            let version = match (platform.version, family) {
                (Some(v), _) => Some(OsVersion {
                    major: v.major,
                    minor: v.minor,
                }),
                (None, Some(f)) if Some(f) == host => f.detector().os_version(probe),
                (None, _) => None,
            };
            (platform.name.clone(), family, version)
        }
        None => {
            let family = host.ok_or_else(|| {
                DetectError::UnsupportedPlatform(std::env::consts::OS.to_string())
            })?;
            (
                family.os_name().to_string(),
                Some(family),
                family.detector().os_version(probe),
            )
        }
    };
    let os_version = os_version.ok_or(DetectError::UnknownVersion("os"))?;

    let detected = || family.and_then(|f| f.detector().libc(probe, Some(os_version)));
    let (libc, libc_version) = match &overrides.libc {
        Some(libc) => match libc.version {
            Some(v) => (libc.name.clone(), Some(local_libc_from_override(&libc.name, v))),
            None => {
                let version = detected()
                    .filter(|d| d.family == libc.name)
                    .and_then(|d| d.version);
                (libc.name.clone(), version)
            }
        },
        None => {
            let detected = detected().ok_or(DetectError::UnknownLibc)?;
            (detected.family, detected.version)
        }
    };
    let libc_version = libc_version.ok_or(DetectError::UnknownVersion("libc"))?;

    let arch = overrides
        .arch
        .as_ref()
        .map(|a| a.name.clone())
        .unwrap_or_else(|| artifact_arch(std::env::consts::ARCH).to_string());

    let module_abi = abi
        .module_abi
        .clone()
        .filter(|abi| !abi.is_empty())
        .ok_or(DetectError::MissingModuleAbi)?;
    if requires_native_api && abi.native_api.is_none() {
        return Err(DetectError::MissingNativeApi);
    }

    let fingerprint = PlatformFingerprint {
        os,
        os_version,
        libc,
        libc_version,
        arch,
        module_abi,
        native_api: abi.native_api,
    };
    info!(
        os = %fingerprint.os,
        os_version = %fingerprint.os_version,
        libc = %fingerprint.libc,
        libc_version = %fingerprint.libc_version,
        arch = %fingerprint.arch,
        module_abi = %fingerprint.module_abi,
        native_api = ?fingerprint.native_api,
        "detected platform"
    );
    Ok(fingerprint)
}
