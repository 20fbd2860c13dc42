//! # Prebin Core Library
//!
//! This crate contains the core logic of the `prebin` tool, which installs a
//! native module from a prebuilt binary published on a release page, and builds
//! it from source when no prebuilt binary fits the host.
//!
//! A release page carries binaries whose file names encode the platform they
//! were built for, each with a `.sha256sum` sibling. `prebin` fingerprints the
//! host, picks the best binary the host can load, downloads it with checksum
//! and size verification, and otherwise runs the package's build pipeline,
//! optionally seeded with a `minbuild` source archive from the same release.
//!
//! ## Modules Overview
//! - [`platform`] – Host fingerprint detection and per-axis overrides
//! - [`probe`] – The command-query seam detection goes through
//! - [`grammar`] – Parsing and formatting artifact file names
//! - [`compat`] – Suitability rules and preference ranking
//! - [`catalog`] – Release metadata and asset classification
//! - [`transfer`] – Redirect handling, streaming digests and verified downloads
//! - [`archive`] – Unpacking minbuild archives safely
//! - [`builder`] – The local build pipeline
//! - [`config`] – The `prebin.toml` manifest and run-time options
//! - [`orchestrator`] – The resolve-or-build state machine
//! - [`error`] – Error types shared by all of the above

pub mod platform;
pub mod probe;
pub mod grammar;
pub mod compat;
pub mod catalog;
pub mod transfer;
pub mod archive;
pub mod builder;
pub mod config;
pub mod orchestrator;
pub mod error;

pub use platform::{AbiVersions, AxisOverride, Overrides, PlatformFingerprint};
pub use probe::{Probe, SystemProbe};
pub use builder::{BuildRunner, BuildStep, ShellRunner};
pub use config::*;
pub use orchestrator::*;
pub use transfer::TransferEngine;
