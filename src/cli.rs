use std::path::PathBuf;
use clap::{Parser, Subcommand};
use prebin::MANIFEST_FILE;

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: Option<PrebinCommand>,

    /// Path to the package manifest
    #[clap(long, global = true, default_value = MANIFEST_FILE)]
    pub manifest: PathBuf,

    /// Skip prebuilt binaries and build locally: true, false, or a comma-separated list of package names
    #[clap(
        long,
        global = true,
        env = "PREBIN_BUILD_FROM_SOURCE",
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub build_from_source: String,

    /// Build locally when no prebuilt binary can be installed. Same values as --build-from-source
    #[clap(
        long,
        global = true,
        env = "PREBIN_FALLBACK_TO_BUILD",
        num_args = 0..=1,
        require_equals = true,
        default_value = "true",
        default_missing_value = "true"
    )]
    pub fallback_to_build: String,

    /// Discard the output of build commands
    #[clap(long, global = true, env = "PREBIN_QUIET_BUILD")]
    pub quiet_build: bool,

    /// Architecture to resolve for instead of the host's
    #[clap(long, global = true, env = "PREBIN_ARCH")]
    pub arch: Option<String>,

    /// C runtime to resolve for: <family>[_<major>.<minor>[.<patch>]]
    #[clap(long, global = true, env = "PREBIN_LIBC")]
    pub libc: Option<String>,

    /// Operating system to resolve for: <os>[_<major>.<minor>]
    #[clap(long, global = true, env = "PREBIN_PLATFORM")]
    pub platform: Option<String>,

    /// Module ABI version of the runtime that loads the binary
    #[clap(long, global = true, env = "PREBIN_MODULE_ABI")]
    pub module_abi: Option<String>,

    /// Native API version of the runtime that loads the binary
    #[clap(long, global = true, env = "PREBIN_NATIVE_API")]
    pub native_api: Option<u32>,

    /// Package manager used to install build dependencies
    #[clap(long, global = true, env = "PREBIN_PACKAGE_MANAGER")]
    pub package_manager: Option<String>,

    /// Release API host, e.g. for a mirror
    #[clap(long, global = true, env = "PREBIN_API_HOST")]
    pub api_host: Option<String>,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum PrebinCommand {
    /// Installs a verified prebuilt binary, or builds from source. The default
    Install,
    /// Prints the platform fingerprint artifacts are matched against
    Detect,
    /// Lists the release's prebuilt binaries that suit this host, most-preferred first. Nothing is downloaded
    Candidates,
}
