//! Error types for every stage of a resolve-or-build run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single HTTP retrieval, including checksum verification.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("could not create http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} was not found (404)")]
    NotFound { url: String },

    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("redirect from {url} has no Location header")]
    MissingLocation { url: String },

    #[error("more than {max} redirects while fetching {url}")]
    TooManyRedirects { url: String, max: usize },

    #[error("expected {expected} content from {url}, got '{actual}'")]
    ContentType {
        url: String,
        expected: &'static str,
        actual: String,
    },

    #[error("checksum from {url} is {len} characters long, expected 64")]
    ChecksumLength { url: String, len: usize },

    #[error("checksum from {url} is not a hexadecimal digest")]
    MalformedChecksum { url: String },

    #[error("sha256 mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {}: expected {expected} bytes, got {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while fetching or interpreting release metadata.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("malformed release metadata: {0}")]
    Metadata(String),

    #[error("release {tag} has no assets")]
    NoAssets { tag: String },

    #[error("release {tag} is a draft")]
    Draft { tag: String },

    #[error("release {tag} is a prerelease")]
    Prerelease { tag: String },

    #[error("could not build artifact name matcher: {0}")]
    Grammar(#[from] regex::Error),
}

/// Reasons the host fingerprint could not be completed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DetectError {
    #[error("unsupported platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("could not determine the {0} version")]
    UnknownVersion(&'static str),

    #[error("could not determine the libc family")]
    UnknownLibc,

    #[error("module ABI version is not known")]
    MissingModuleAbi,

    #[error("native API version is not known")]
    MissingNativeApi,
}

/// Missing or malformed settings. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures of the local build pipeline. Always fatal.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed with {status}")]
    Failed { command: String, status: String },
}

/// Failures while staging a minbuild archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("i/o error while extracting {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive entry escapes the staging directory: {}", .0.display())]
    UnsafePath(PathBuf),
}
