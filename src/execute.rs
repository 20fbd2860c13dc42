use std::process::ExitCode;
use anyhow::{anyhow, Context, Result};
use prebin::*;
use crate::cli::{CLI, PrebinCommand};

pub fn execute(cli: CLI) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let options = run_options(&cli, &config.name)?;
    let engine = TransferEngine::new()?;
    let mut runner = ShellRunner::new(&config.root, options.quiet_build);
    let mut orchestrator = Orchestrator::new(&config, &options, engine, &SystemProbe, &mut runner);

    match cli.command.unwrap_or(PrebinCommand::Install) {
        PrebinCommand::Install => Ok(orchestrator.run().exit_code()),
        PrebinCommand::Detect => {
            let fingerprint = orchestrator.detect()?;
            println!("os:         {} {}", fingerprint.os, fingerprint.os_version);
            println!("libc:       {} {}", fingerprint.libc, fingerprint.libc_version);
            println!("arch:       {}", fingerprint.arch);
            println!("module abi: {}", fingerprint.module_abi);
            if let Some(native_api) = fingerprint.native_api {
                println!("native api: {}", native_api);
            }
            Ok(ExitCode::SUCCESS)
        }
        PrebinCommand::Candidates => {
            orchestrator.detect()?;
            let release = orchestrator.release()?;
            if release.candidates.is_empty() {
                println!("No suitable prebuilt binaries in v{}", config.version);
            }
            for candidate in &release.candidates {
                println!("{} ({} bytes)", candidate.asset.name, candidate.asset.size);
            }
            if let Some(minbuild) = &release.minbuild {
                println!("minbuild: {}", minbuild.asset.name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Loads and validates the manifest. Relative paths in it are taken relative
/// to the manifest's own directory.
fn load_config(cli: &CLI) -> Result<Config> {
    let manifest = PrebinToml::load(&cli.manifest)?;
    let root = match cli.manifest.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => std::env::current_dir().context("could not determine the current directory")?,
    };
    let root = std::path::absolute(&root)
        .with_context(|| format!("could not resolve {}", root.display()))?;
    let mut config = manifest.into_config(&root)?;
    if let Some(host) = cli.api_host.as_deref().filter(|h| !h.trim().is_empty()) {
        config.api_host = host.trim().trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn run_options(cli: &CLI, package: &str) -> Result<RunOptions> {
    Ok(RunOptions {
        build_from_source: PackageToggle::parse(&cli.build_from_source).enabled_for(package),
        fallback_to_build: PackageToggle::parse(&cli.fallback_to_build).enabled_for(package),
        quiet_build: cli.quiet_build,
        package_manager: cli.package_manager.clone().filter(|pm| !pm.trim().is_empty()),
        overrides: Overrides {
            arch: parse_override(cli.arch.as_deref(), "--arch")?,
            libc: parse_override(cli.libc.as_deref(), "--libc")?,
            platform: parse_override(cli.platform.as_deref(), "--platform")?,
        },
        abi: AbiVersions {
            module_abi: cli.module_abi.clone().filter(|abi| !abi.trim().is_empty()),
            native_api: cli.native_api,
        },
    })
}

fn parse_override(value: Option<&str>, flag: &str) -> Result<Option<AxisOverride>> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.parse::<AxisOverride>()
                .map_err(|err| anyhow!("invalid {flag} value `{v}`: {err}"))
        })
        .transpose()
}
