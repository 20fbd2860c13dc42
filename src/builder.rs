//! The local build used when no prebuilt binary is installed.
//!
//! A build is planned as a list of [`BuildStep`]s and handed to a
//! [`BuildRunner`], which stops at the first step that fails.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::info;
use crate::config::BuildConfig;
use crate::error::{BuildError, ConfigError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    /// `<package_manager> install name@version...`
    Dependencies {
        package_manager: String,
        packages: Vec<String>,
    },
    Prebuild(String),
    Build(String),
}

impl BuildStep {
    pub fn label(&self) -> &'static str {
        match self {
            BuildStep::Dependencies { .. } => "dependencies",
            BuildStep::Prebuild(_) => "prebuild",
            BuildStep::Build(_) => "build",
        }
    }

    pub fn command_line(&self) -> String {
        match self {
            BuildStep::Dependencies {
                package_manager,
                packages,
            } => format!("{} install {}", package_manager, packages.join(" ")),
            BuildStep::Prebuild(line) | BuildStep::Build(line) => line.clone(),
        }
    }
}

/// Lays out the steps of a build: dependencies, pre-build, build.
///
/// `package_manager` takes precedence over the one in `build`.
///
/// # Errors
///
/// Fails when dependencies are declared but no package manager is known.
pub fn plan_build(
    build: &BuildConfig,
    package_manager: Option<&str>,
) -> Result<Vec<BuildStep>, ConfigError> {
    let mut steps = Vec::new();
    if !build.dependencies.is_empty() {
        let package_manager = package_manager
            .or(build.package_manager.as_deref())
            .filter(|pm| !pm.trim().is_empty())
            .ok_or(ConfigError::Missing("build.package_manager"))?;
        steps.push(BuildStep::Dependencies {
            package_manager: package_manager.to_string(),
            packages: build
                .dependencies
                .iter()
                .map(|(name, version)| format!("{name}@{version}"))
                .collect(),
        });
    }
    if let Some(prebuild) = &build.prebuild {
        steps.push(BuildStep::Prebuild(prebuild.clone()));
    }
    steps.push(BuildStep::Build(build.command.clone()));
    Ok(steps)
}

/// Executes build steps. The seam between the state machine and processes.
pub trait BuildRunner {
    fn run(&mut self, step: &BuildStep) -> Result<(), BuildError>;
}

/// Runs steps as blocking child processes in one working directory.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    cwd: PathBuf,
    quiet: bool,
}

impl ShellRunner {
    pub fn new(cwd: impl Into<PathBuf>, quiet: bool) -> Self {
        Self {
            cwd: cwd.into(),
            quiet,
        }
    }
}

#[cfg(windows)]
fn shell(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", line]);
    command
}

#[cfg(not(windows))]
fn shell(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", line]);
    command
}

impl BuildRunner for ShellRunner {
    fn run(&mut self, step: &BuildStep) -> Result<(), BuildError> {
        let mut command = match step {
            BuildStep::Dependencies {
                package_manager,
                packages,
            } => {
                let mut command = Command::new(package_manager);
                command.arg("install").args(packages);
                command
            }
            BuildStep::Prebuild(line) | BuildStep::Build(line) => shell(line),
        };
        command.current_dir(&self.cwd);
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let line = step.command_line();
        let status = command.status().map_err(|source| BuildError::Spawn {
            command: line.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Failed {
                command: line,
                status: status.to_string(),
            })
        }
    }
}

/// Runs `steps` in order, stopping at the first failure.
pub fn run_build(runner: &mut dyn BuildRunner, steps: &[BuildStep]) -> Result<(), BuildError> {
    for step in steps {
        info!(step = step.label(), command = %step.command_line(), "running build step");
        runner.run(step)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn build_config() -> BuildConfig {
        BuildConfig {
            command: "make".to_string(),
            prebuild: None,
            package_manager: None,
            dependencies: BTreeMap::new(),
            minbuild: true,
            minbuild_dir: PathBuf::from("."),
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
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_plan_build_only() {
        let steps = plan_build(&build_config(), None).unwrap();
        assert_eq!(steps, vec![BuildStep::Build("make".to_string())]);
    }

    #[test]
    fn test_plan_full_order() {
        let mut build = build_config();
        build.prebuild = Some("make configure".to_string());
        build.package_manager = Some("npm".to_string());
        build.dependencies.insert("node-gyp".to_string(), "10.0.0".to_string());
        build.dependencies.insert("bindings".to_string(), "1.5.0".to_string());

        let steps = plan_build(&build, None).unwrap();
        assert_eq!(
            steps,
            vec![
                BuildStep::Dependencies {
                    package_manager: "npm".to_string(),
                    packages: vec!["bindings@1.5.0".to_string(), "node-gyp@10.0.0".to_string()],
                },
                BuildStep::Prebuild("make configure".to_string()),
                BuildStep::Build("make".to_string()),
            ]
        );
        assert_eq!(steps[0].command_line(), "npm install bindings@1.5.0 node-gyp@10.0.0");

        let overridden = plan_build(&build, Some("pnpm")).unwrap();
        assert!(matches!(
            &overridden[0],
            BuildStep::Dependencies { package_manager, .. } if package_manager == "pnpm"
        ));
    }

    #[test]
    fn test_dependencies_need_package_manager() {
        let mut build = build_config();
        build.dependencies.insert("node-gyp".to_string(), "10.0.0".to_string());
        assert!(matches!(
            plan_build(&build, None),
            Err(ConfigError::Missing("build.package_manager"))
        ));
    }

    #[test]
    fn test_run_build_stops_at_first_failure() {
        let steps = vec![
            BuildStep::Prebuild("configure".to_string()),
            BuildStep::Build("make".to_string()),
        ];
        let mut recorder = Recorder {
            fail_on: Some("prebuild"),
            ..Recorder::default()
        };
        assert!(run_build(&mut recorder, &steps).is_err());
        assert_eq!(recorder.ran, vec![BuildStep::Prebuild("configure".to_string())]);
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ShellRunner::new(dir.path(), true);
        runner
            .run(&BuildStep::Build("echo built > out.txt".to_string()))
            .unwrap();
        assert!(dir.path().join("out.txt").exists());

        let err = runner.run(&BuildStep::Build("exit 3".to_string())).unwrap_err();
        assert!(matches!(err, BuildError::Failed { .. }));

        let err = runner
            .run(&BuildStep::Dependencies {
                package_manager: "prebin-no-such-pm-12345".to_string(),
                packages: vec!["x@1.0.0".to_string()],
            })
            .unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
    }
}
