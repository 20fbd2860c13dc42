use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use flate2::write::GzEncoder;
use flate2::Compression;
use mockito::{Mock, Server};
use prebin::error::BuildError;
use prebin::*;
use serde_json::json;
use sha2::{Digest, Sha256};
use tempfile::{tempdir, TempDir};

const VERSION: &str = "1.4.0";
const RELEASE_PATH: &str = "/repos/acme/fastcodec/releases/tags/v1.4.0";

/// Platform detection must never reach the host in these tests.
struct NoProbe;

impl Probe for NoProbe {
    fn query(&self, _program: &str, _args: &[&str]) -> Option<String> {
        None
    }
}

#[derive(Default)]
struct Recorder {
    ran: Vec<BuildStep>,
    fail_on: Option<&'static str>,
}

impl BuildRunner for Recorder {
    fn run(&mut self, step: &BuildStep) -> Result<(), BuildError> {
        self.ran.push(step.clone());
        if self.fail_on == Some(step.label()) {
            return Err(BuildError::Failed {
                command: step.command_line(),
                status: "exit status: 2".to_string(),
            });
        }
        Ok(())
    }
}

fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn config(server: &Server, root: &Path) -> Config {
    Config {
        name: "fastcodec".to_string(),
        version: VERSION.to_string(),
        repository: "acme/fastcodec".to_string(),
        destination: root.join("build").join("fastcodec.node"),
        native_api: true,
        api_host: server.url(),
        root: root.to_path_buf(),
        build: BuildConfig {
            command: "make".to_string(),
            prebuild: None,
            package_manager: None,
            dependencies: BTreeMap::new(),
            minbuild: true,
            minbuild_dir: root.join("src"),
        },
    }
}

/// A glibc 2.31 / linux 5.15 / x86_64 host with module ABI 115 and native API 8.
fn options() -> RunOptions {
    RunOptions {
        build_from_source: false,
        fallback_to_build: true,
        quiet_build: true,
        package_manager: None,
        overrides: Overrides {
            arch: Some("x86_64".parse().unwrap()),
            libc: Some("glibc_2.31".parse().unwrap()),
            platform: Some("linux_5.15".parse().unwrap()),
        },
        abi: AbiVersions {
            module_abi: Some("115".to_string()),
            native_api: Some(8),
        },
    }
}

/// A file served from `/dl/<name>` plus its `.sha256sum` sibling.
struct Published {
    asset: serde_json::Value,
    checksum: serde_json::Value,
    file: Mock,
    sum: Mock,
}

fn publish(server: &mut Server, name: &str, content_type: &str, payload: &[u8], hits: usize) -> Published {
    let url = format!("{}/dl/{name}", server.url());
    let file = server
        .mock("GET", format!("/dl/{name}").as_str())
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(payload)
        .expect(hits)
        .create();
    let sum = server
        .mock("GET", format!("/dl/{name}.sha256sum").as_str())
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(sha256(payload))
        .expect(hits)
        .create();
    Published {
        asset: json!({
            "name": name,
            "browser_download_url": url,
            "content_type": content_type,
            "size": payload.len(),
            "state": "uploaded",
        }),
        checksum: json!({
            "name": format!("{name}.sha256sum"),
            "browser_download_url": format!("{url}.sha256sum"),
            "content_type": "text/plain",
            "size": 64,
            "state": "uploaded",
        }),
        file,
        sum,
    }
}

fn serve_release(server: &mut Server, prerelease: bool, published: &[&Published]) -> Mock {
    let assets: Vec<serde_json::Value> = published
        .iter()
        .flat_map(|p| [p.asset.clone(), p.checksum.clone()])
        .collect();
    let body = json!({
        "tag_name": format!("v{VERSION}"),
        "draft": false,
        "prerelease": prerelease,
        "assets": assets,
    });
    server
        .mock("GET", RELEASE_PATH)
        .with_status(200)
        .with_header("content-type", "application/json; charset=utf-8")
        .with_body(body.to_string())
        .expect(1)
        .create()
}

fn minbuild_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let data = b"all: ; touch fastcodec.node\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "Makefile", &data[..]).unwrap();
    let tar = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

fn run(config: &Config, options: &RunOptions, recorder: &mut Recorder) -> Outcome {
    Orchestrator::new(config, options, TransferEngine::new().unwrap(), &NoProbe, recorder).run()
}

fn workspace() -> TempDir {
    tempdir().unwrap()
}

#[test]
fn test_installs_single_exact_match() {
    let mut server = Server::new();
    let dir = workspace();
    let payload = b"prebuilt for glibc 2.17".to_vec();
    let binary = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.17-x86_64.node",
        "application/octet-stream",
        &payload,
        1,
    );
    let release = serve_release(&mut server, false, &[&binary]);

    let config = config(&server, dir.path());
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Installed);

    assert_eq!(fs::read(&config.destination).unwrap(), payload);
    assert!(recorder.ran.is_empty());
    release.assert();
    binary.file.assert();
    binary.sum.assert();
}

#[test]
fn test_installs_newest_suitable_libc() {
    let mut server = Server::new();
    let dir = workspace();
    let older = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.10-x86_64.node",
        "application/octet-stream",
        b"glibc 2.10 build",
        0,
    );
    let newer = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.12-x86_64.node",
        "application/octet-stream",
        b"glibc 2.12 build",
        1,
    );
    let _release = serve_release(&mut server, false, &[&older, &newer]);

    let config = config(&server, dir.path());
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Installed);

    assert_eq!(fs::read(&config.destination).unwrap(), b"glibc 2.12 build");
    older.file.assert();
    newer.file.assert();
}

#[test]
fn test_prerelease_falls_back_to_build() {
    let mut server = Server::new();
    let dir = workspace();
    let binary = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.17-x86_64.node",
        "application/octet-stream",
        b"never fetched",
        0,
    );
    let _release = serve_release(&mut server, true, &[&binary]);

    let config = config(&server, dir.path());
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Built);

    assert_eq!(recorder.ran, vec![BuildStep::Build("make".to_string())]);
    assert!(!config.destination.exists());
    binary.file.assert();
}

#[test]
fn test_no_suitable_binary_without_fallback_fails() {
    let mut server = Server::new();
    let dir = workspace();
    let musl = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-musl_1.2.4-x86_64.node",
        "application/octet-stream",
        b"musl build",
        0,
    );
    let _release = serve_release(&mut server, false, &[&musl]);

    let config = config(&server, dir.path());
    let mut options = options();
    options.fallback_to_build = false;
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options, &mut recorder), Outcome::Failed);

    assert!(recorder.ran.is_empty());
    assert!(!config.destination.exists());
}

#[test]
fn test_checksum_mismatch_falls_back_to_build() {
    let mut server = Server::new();
    let dir = workspace();
    let name = "v1.4.0-m115-n8-linux_5.10-glibc_2.17-x86_64.node";
    let payload = b"tampered".to_vec();
    let url = format!("{}/dl/{name}", server.url());
    let _file = server
        .mock("GET", format!("/dl/{name}").as_str())
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body(&payload)
        .create();
    let _sum = server
        .mock("GET", format!("/dl/{name}.sha256sum").as_str())
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(sha256(b"the real thing"))
        .create();
    let body = json!({
        "assets": [
            {"name": name, "browser_download_url": url, "content_type": "application/octet-stream",
             "size": payload.len(), "state": "uploaded"},
            {"name": format!("{name}.sha256sum"), "browser_download_url": format!("{url}.sha256sum"),
             "content_type": "text/plain", "size": 64, "state": "uploaded"},
        ]
    });
    let _release = server
        .mock("GET", RELEASE_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create();

    let config = config(&server, dir.path());
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Built);
    assert!(!config.destination.exists());
    assert_eq!(recorder.ran.len(), 1);
}

#[test]
fn test_missing_release_falls_back_to_build() {
    let mut server = Server::new();
    let dir = workspace();
    let _release = server.mock("GET", RELEASE_PATH).with_status(404).create();

    let config = config(&server, dir.path());
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Built);
}

#[test]
fn test_minbuild_is_staged_before_install() {
    let mut server = Server::new();
    let dir = workspace();
    let archive = minbuild_archive();
    let minbuild = publish(&mut server, "v1.4.0-minbuild.tar.gz", "application/gzip", &archive, 1);
    let binary = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.17-x86_64.node",
        "application/octet-stream",
        b"binary",
        1,
    );
    let _release = serve_release(&mut server, false, &[&minbuild, &binary]);

    let config = config(&server, dir.path());
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Installed);

    let makefile = config.build.minbuild_dir.join("Makefile");
    assert_eq!(fs::read(makefile).unwrap(), b"all: ; touch fastcodec.node\n");
    // the scratch download is gone
    let leftovers: Vec<_> = fs::read_dir(&config.build.minbuild_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("Makefile")]);
    minbuild.file.assert();
}

#[test]
fn test_build_from_source_stages_minbuild_and_skips_binaries() {
    let mut server = Server::new();
    let dir = workspace();
    let minbuild = publish(&mut server, "v1.4.0-minbuild.tar.gz", "application/gzip", &minbuild_archive(), 1);
    let binary = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.17-x86_64.node",
        "application/octet-stream",
        b"binary",
        0,
    );
    let _release = serve_release(&mut server, false, &[&minbuild, &binary]);

    let mut config = config(&server, dir.path());
    config.build.prebuild = Some("make configure".to_string());
    config.build.package_manager = Some("npm".to_string());
    config.build.dependencies.insert("node-gyp".to_string(), "10.0.0".to_string());
    let mut options = options();
    options.build_from_source = true;
    let mut recorder = Recorder::default();
    assert_eq!(run(&config, &options, &mut recorder), Outcome::Built);

    assert!(config.build.minbuild_dir.join("Makefile").exists());
    assert_eq!(
        recorder.ran,
        vec![
            BuildStep::Dependencies {
                package_manager: "npm".to_string(),
                packages: vec!["node-gyp@10.0.0".to_string()],
            },
            BuildStep::Prebuild("make configure".to_string()),
            BuildStep::Build("make".to_string()),
        ]
    );
    binary.file.assert();
}

#[test]
fn test_failed_build_step_stops_pipeline() {
    let mut server = Server::new();
    let dir = workspace();
    let _release = server.mock("GET", RELEASE_PATH).with_status(404).create();

    let mut config = config(&server, dir.path());
    config.build.prebuild = Some("make configure".to_string());
    let mut recorder = Recorder {
        fail_on: Some("prebuild"),
        ..Recorder::default()
    };
    assert_eq!(run(&config, &options(), &mut recorder), Outcome::Failed);
    assert_eq!(recorder.ran, vec![BuildStep::Prebuild("make configure".to_string())]);
}

#[test]
fn test_release_is_fetched_once() {
    let mut server = Server::new();
    let dir = workspace();
    let binary = publish(
        &mut server,
        "v1.4.0-m115-n8-linux_5.10-glibc_2.17-x86_64.node",
        "application/octet-stream",
        b"binary",
        0,
    );
    let release_mock = serve_release(&mut server, false, &[&binary]);

    let config = config(&server, dir.path());
    let options = options();
    let mut recorder = Recorder::default();
    let mut orchestrator =
        Orchestrator::new(&config, &options, TransferEngine::new().unwrap(), &NoProbe, &mut recorder);
    orchestrator.detect().unwrap();
    let first = orchestrator.release().unwrap().clone();
    let second = orchestrator.release().unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(first.candidates.len(), 1);
    release_mock.assert();
}
