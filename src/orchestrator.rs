//! Resolve-or-build, as an explicit state machine.
//!
//! ```text
//! Start ─┬─ build from source ──────────────────────────► BuildOnly ─► Done
//!        └─► DetectPlatform ─► FetchCatalog ─┬─► ResolveMinbuild ─┐
//!                                            └───────────────────┴─► SelectBinary ─► FetchBinary ─► Done
//! any failure on the way ─► FallbackBuild ─► Done
//! ```
//!
//! The fingerprint and the classified release are computed at most once per
//! run and kept on the [`Orchestrator`].

use std::fs;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use crate::archive::extract_archive;
use crate::builder::{plan_build, run_build, BuildRunner};
use crate::catalog::{
    classify, fetch_release, BinaryMatcher, Candidate, MinbuildArtifact, ReleaseResolution,
};
use crate::config::{Config, RunOptions};
use crate::error::{ArchiveError, CatalogError, DetectError};
use crate::grammar::ArtifactGrammar;
use crate::platform::{detect_fingerprint, PlatformFingerprint};
use crate::probe::Probe;
use crate::transfer::{Decode, TransferEngine};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A verified prebuilt binary was written to the destination.
    Installed,
    /// The package was built locally.
    Built,
    Failed,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self != Outcome::Failed
    }

    pub fn exit_code(self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug)]
enum State {
    Start,
    DetectPlatform,
    FetchCatalog,
    ResolveMinbuild(MinbuildArtifact),
    SelectBinary,
    FetchBinary(Candidate),
    /// Carries the reason prebuilt installation was abandoned.
    FallbackBuild(String),
    BuildOnly,
    Done(Outcome),
}

/// Drives one install of one package.
pub struct Orchestrator<'a> {
    config: &'a Config,
    options: &'a RunOptions,
    engine: TransferEngine,
    probe: &'a dyn Probe,
    runner: &'a mut dyn BuildRunner,
    fingerprint: Option<PlatformFingerprint>,
    release: Option<ReleaseResolution>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        options: &'a RunOptions,
        engine: TransferEngine,
        probe: &'a dyn Probe,
        runner: &'a mut dyn BuildRunner,
    ) -> Self {
        Self {
            config,
            options,
            engine,
            probe,
            runner,
            fingerprint: None,
            release: None,
        }
    }

    /// Runs the state machine to completion. Never panics; every failure
    /// ends in [`Outcome::Failed`].
    pub fn run(&mut self) -> Outcome {
        let mut state = State::Start;
        loop {
            debug!(?state, "entering state");
            state = match state {
                State::Start if self.options.build_from_source => State::BuildOnly,
                State::Start => State::DetectPlatform,
                State::DetectPlatform => self.detect_platform(),
                State::FetchCatalog => self.fetch_catalog(),
                State::ResolveMinbuild(artifact) => match self.stage_minbuild(&artifact) {
                    Ok(()) => State::SelectBinary,
                    Err(err) => State::FallbackBuild(format!("could not stage minbuild inputs: {err}")),
                },
                State::SelectBinary => self.select_binary(),
                State::FetchBinary(candidate) => self.fetch_binary(&candidate),
                State::FallbackBuild(reason) => self.fallback_build(&reason),
                State::BuildOnly => self.build_only(),
                State::Done(outcome) => {
                    info!(?outcome, package = %self.config.name, "finished");
                    return outcome;
                }
            };
        }
    }

    /// The fingerprint computed by this run, if detection got that far.
    pub fn fingerprint(&self) -> Option<&PlatformFingerprint> {
        self.fingerprint.as_ref()
    }

    /// Detects the host fingerprint once and caches it.
    pub fn detect(&mut self) -> Result<&PlatformFingerprint, DetectError> {
        let fingerprint = match self.fingerprint.take() {
            Some(cached) => cached,
            None => detect_fingerprint(
                self.probe,
                &self.options.overrides,
                &self.options.abi,
                self.config.native_api,
            )?,
        };
        Ok(self.fingerprint.insert(fingerprint))
    }

    /// Fetches and classifies the release once and caches the result.
    ///
    /// Binaries are only classified when a fingerprint is known.
    pub fn release(&mut self) -> Result<&ReleaseResolution, CatalogError> {
        let resolution = match self.release.take() {
            Some(cached) => cached,
            None => self.resolve_release()?,
        };
        Ok(self.release.insert(resolution))
    }

    fn resolve_release(&self) -> Result<ReleaseResolution, CatalogError> {
        let config = self.config;
        let assets = fetch_release(&self.engine, &config.api_host, &config.repository, &config.version)?;
        let grammar = match &self.fingerprint {
            Some(fp) => Some(ArtifactGrammar::new(&config.version, &fp.module_abi, &fp.arch)?),
            None => None,
        };
        let matcher = match (&grammar, &self.fingerprint) {
            (Some(grammar), Some(fingerprint)) => Some(BinaryMatcher {
                grammar,
                fingerprint,
                requires_native_api: config.native_api,
            }),
            _ => None,
        };
        Ok(classify(assets, &config.version, matcher))
    }

    fn detect_platform(&mut self) -> State {
        match self.detect() {
            Ok(_) => State::FetchCatalog,
            Err(err) => State::FallbackBuild(format!("platform detection incomplete: {err}")),
        }
    }

    fn fetch_catalog(&mut self) -> State {
        let minbuild_enabled = self.config.build.minbuild;
        match self.release() {
            Ok(release) => match &release.minbuild {
                Some(artifact) if minbuild_enabled => State::ResolveMinbuild(artifact.clone()),
                _ => State::SelectBinary,
            },
            Err(err) => State::FallbackBuild(format!("release catalog unavailable: {err}")),
        }
    }

    fn select_binary(&mut self) -> State {
        match self.release.as_ref().and_then(ReleaseResolution::best) {
            Some(best) => {
                info!(artifact = %best.asset.name, "selected prebuilt binary");
                State::FetchBinary(best.clone())
            }
            None => State::FallbackBuild("no compatible prebuilt binary in the release".to_string()),
        }
    }

    fn fetch_binary(&mut self, candidate: &Candidate) -> State {
        let dest = &self.config.destination;
        match self.engine.download_verified(candidate.source(), dest, Decode::Auto) {
            Ok(written) => {
                info!(
                    dest = %dest.display(),
                    bytes = written.bytes,
                    sha256 = %written.sha256,
                    "installed prebuilt binary"
                );
                State::Done(Outcome::Installed)
            }
            Err(err) => State::FallbackBuild(format!("could not install {}: {err}", candidate.asset.name)),
        }
    }

    /// Downloads the minbuild archive into a scratch directory and unpacks
    /// it into the staging directory.
    fn stage_minbuild(&self, artifact: &MinbuildArtifact) -> Result<(), ArchiveError> {
        let dir = &self.config.build.minbuild_dir;
        fs::create_dir_all(dir).map_err(|source| ArchiveError::Io {
            path: dir.clone(),
            source,
        })?;
        let scratch = tempfile::Builder::new()
            .prefix(".prebin-minbuild")
            .tempdir_in(dir)
            .map_err(|source| ArchiveError::Io {
                path: dir.clone(),
                source,
            })?;
        let archive = scratch.path().join(&artifact.asset.name);
        self.engine.download_verified(artifact.source(), &archive, Decode::Auto)?;
        let entries = extract_archive(&archive, dir)?;
        info!(dir = %dir.display(), entries, "staged minbuild inputs");
        Ok(())
    }

    fn fallback_build(&mut self, reason: &str) -> State {
        warn!(reason, "no prebuilt binary installed");
        if !self.options.fallback_to_build {
            error!(package = %self.config.name, "building from source is disabled; giving up");
            return State::Done(Outcome::Failed);
        }
        self.build()
    }

    fn build_only(&mut self) -> State {
        info!(package = %self.config.name, "building from source as requested");
        if self.config.build.minbuild {
            let artifact = match self.release() {
                Ok(release) => release.minbuild.clone(),
                Err(err) => {
                    debug!(%err, "no release catalog for minbuild inputs");
                    None
                }
            };
            if let Some(artifact) = artifact {
                if let Err(err) = self.stage_minbuild(&artifact) {
                    warn!(%err, "continuing without minbuild inputs");
                }
            }
        }
        self.build()
    }

    fn build(&mut self) -> State {
        let steps = match plan_build(&self.config.build, self.options.package_manager.as_deref()) {
            Ok(steps) => steps,
            Err(err) => {
                error!(%err, "invalid build configuration");
                return State::Done(Outcome::Failed);
            }
        };
        match run_build(&mut *self.runner, &steps) {
            Ok(()) => {
                info!(package = %self.config.name, "build finished");
                State::Done(Outcome::Built)
            }
            Err(err) => {
                error!(%err, "build failed");
                State::Done(Outcome::Failed)
            }
        }
    }
}
