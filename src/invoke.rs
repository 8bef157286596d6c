//! Default build-tool adapter.
//!
//! The engine core only emits invocation descriptors; this adapter turns a
//! configuration into environment variables the external tool can read
//! (`KILN_SETTING_*`, `KILN_OPTION_*`, `KILN_REQUIRE_*`), runs the command,
//! and reports the produced files under the output directory. A timeout is
//! caller policy, surfaced as a timed-out build outcome.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::lifecycle::{BuildInvocation, BuildOutcome, BuildTool, LifecycleError};
use crate::recipe::Recipe;
use crate::requirements::Resolution;
use crate::settings::Configuration;

/// Runs invocation descriptors through `std::process::Command`.
#[derive(Debug, Clone)]
pub struct CommandTool {
    working_dir: PathBuf,
    output_dir: PathBuf,
    timeout: Option<Duration>,
    dry_run: bool,
    verbose: bool,
}

impl CommandTool {
    pub fn new(working_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            output_dir: output_dir.into(),
            timeout: None,
            dry_run: false,
            verbose: false,
        }
    }

    /// Kill the tool and report a timed-out build after this long.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Log the command without executing it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// List produced files relative to the output directory.
    fn collect_outputs(&self, output_dir: &Path) -> Vec<PathBuf> {
        let mut outputs: Vec<PathBuf> = WalkDir::new(output_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(output_dir)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();
        outputs.sort();
        outputs
    }
}

fn env_key(prefix: &str, name: &str) -> String {
    format!("KILN_{}_{}", prefix, name.to_uppercase().replace('-', "_"))
}

impl BuildTool for CommandTool {
    fn configure(
        &self,
        recipe: &Recipe,
        config: &Configuration,
        resolution: &Resolution,
    ) -> Result<BuildInvocation, LifecycleError> {
        let mut env: Vec<(String, String)> = Vec::new();
        for (name, value) in config.settings() {
            env.push((env_key("SETTING", name), value.to_string()));
        }
        for (name, value) in config.options() {
            env.push((env_key("OPTION", name), value.to_string()));
        }
        for pin in resolution.pinned() {
            env.push((env_key("REQUIRE", &pin.name), pin.to_string()));
        }
        env.push((
            "KILN_OUTPUT_DIR".to_string(),
            self.output_dir.display().to_string(),
        ));

        Ok(BuildInvocation {
            command: recipe.build.tool.clone(),
            args: Vec::new(),
            working_dir: self.working_dir.clone(),
            env,
            output_dir: self.output_dir.clone(),
        })
    }

    fn invoke(&self, invocation: &BuildInvocation) -> BuildOutcome {
        if self.verbose || self.dry_run {
            eprintln!(
                "[{}] {} {}",
                if self.dry_run { "dry-run" } else { "exec" },
                invocation.command,
                invocation.args.join(" ")
            );
        }
        if self.dry_run {
            return BuildOutcome::Success {
                outputs: Vec::new(),
            };
        }

        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(invocation.env.iter().cloned())
            .stdin(Stdio::null());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(_) => return BuildOutcome::Failed { code: None },
        };

        let status = match self.timeout {
            None => child.wait(),
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => break Ok(status),
                        Ok(None) if Instant::now() >= deadline => {
                            let _ = child.kill();
                            let _ = child.wait();
                            return BuildOutcome::TimedOut;
                        }
                        Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        match status {
            Ok(status) if status.success() => BuildOutcome::Success {
                outputs: self.collect_outputs(&invocation.output_dir),
            },
            Ok(status) => BuildOutcome::Failed {
                code: status.code(),
            },
            Err(_) => BuildOutcome::Failed { code: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::settings::Profile;

    fn sh(script: &str, working_dir: &Path, output_dir: &Path) -> BuildInvocation {
        BuildInvocation {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: working_dir.to_path_buf(),
            env: Vec::new(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    #[test]
    fn test_configure_translates_settings_to_env() {
        let recipe = Recipe::parse(
            r#"
[package]
name = "vkaEngine"
version = "0.0.1"
requires = ["glm/0.9.9.1@g-truc/stable"]

[settings]
os = ["linux"]
build_type = ["release"]

[options.shared]
values = [false, true]
default = false
"#,
        )
        .unwrap();

        let index = MemoryIndex::new();
        index.publish("glm/0.9.9.1@g-truc/stable".parse().unwrap(), Default::default());
        let resolution = recipe.requirement_set().resolve(&index).unwrap();

        let mut profile = Profile::default();
        profile.settings.insert("os".into(), "linux".into());
        profile.settings.insert("build_type".into(), "release".into());
        let config = recipe.matrix().instantiate(&profile).unwrap();

        let tool = CommandTool::new("work", "out");
        let invocation = tool.configure(&recipe, &config, &resolution).unwrap();

        assert_eq!(invocation.command, "cmake");
        let env: std::collections::HashMap<_, _> = invocation.env.iter().cloned().collect();
        assert_eq!(env.get("KILN_SETTING_OS").map(String::as_str), Some("linux"));
        assert_eq!(
            env.get("KILN_SETTING_BUILD_TYPE").map(String::as_str),
            Some("release")
        );
        assert_eq!(
            env.get("KILN_OPTION_SHARED").map(String::as_str),
            Some("false")
        );
        assert_eq!(
            env.get("KILN_REQUIRE_GLM").map(String::as_str),
            Some("glm/0.9.9.1@g-truc/stable")
        );
    }

    #[test]
    fn test_invoke_collects_outputs() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        // The tool runs inside the output dir and drops a library there.
        let tool = CommandTool::new(&out, &out);
        let invocation = sh("mkdir -p build && touch build/libvka.a", &out, &out);

        match tool.invoke(&invocation) {
            BuildOutcome::Success { outputs } => {
                assert!(outputs.contains(&PathBuf::from("build/libvka.a")));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_invoke_reports_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = CommandTool::new(dir.path(), dir.path());
        match tool.invoke(&sh("exit 3", dir.path(), dir.path())) {
            BuildOutcome::Failed { code } => assert_eq!(code, Some(3)),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_invoke_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool =
            CommandTool::new(dir.path(), dir.path()).timeout(Duration::from_millis(100));
        match tool.invoke(&sh("sleep 5", dir.path(), dir.path())) {
            BuildOutcome::TimedOut => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_command_is_a_failed_build() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = CommandTool::new(dir.path(), dir.path());
        let invocation = BuildInvocation {
            command: "kiln-no-such-tool".to_string(),
            args: Vec::new(),
            working_dir: dir.path().to_path_buf(),
            env: Vec::new(),
            output_dir: dir.path().to_path_buf(),
        };
        assert!(matches!(
            tool.invoke(&invocation),
            BuildOutcome::Failed { code: None }
        ));
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = CommandTool::new(dir.path(), dir.path()).dry_run(true);
        let marker = dir.path().join("marker");
        let script = format!("touch {}", marker.display());
        match tool.invoke(&sh(&script, dir.path(), dir.path())) {
            BuildOutcome::Success { outputs } => assert!(outputs.is_empty()),
            other => panic!("expected success, got {other:?}"),
        }
        assert!(!marker.exists());
    }
}
