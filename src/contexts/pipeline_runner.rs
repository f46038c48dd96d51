//! The "run myapp" sequence: launch, wait for the port, run the tests, publish.
//!
//! Every external effect goes through one of the collaborator traits below, so the state
//! machine itself never touches processes or sockets.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::{FailedStep, LogEntry, PipelineRun, PipelineState, StepStatus, VcsStep};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no command configured")]
    EmptyCommand,
    #[error("working directory {} is outside the project root", .0.display())]
    OutsideRoot(PathBuf),
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Result of one external command: success flag and stdout+stderr combined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestRunOutcome {
    Passed { output: String },
    Failed { exit_code: Option<i32>, output: String },
    /// The wall-clock ceiling was hit and the run was terminated
    TimedOut { output: String },
}

/// Starts a command without waiting for it
pub trait Launcher {
    fn launch(&mut self, command: &[String], working_dir: &Path) -> Result<(), LaunchError>;
}

pub trait PortProbe {
    /// One connection attempt
    fn is_open(&mut self, host: &str, port: u16) -> bool;
}

pub trait TestRunner {
    /// Runs the suite to completion or until the runner's own timeout
    fn run(&mut self, suite: &Path) -> io::Result<TestRunOutcome>;
}

pub trait Vcs {
    fn run(&mut self, args: &[&str]) -> CommandOutput;
}

/// The only place that recognises an empty commit. Matches git's literal wording.
pub fn is_nothing_to_commit(output: &str) -> bool {
    output.contains("nothing to commit")
}

pub struct PipelineRunner<'a, L, P, T, V> {
    config: &'a Config,
    launcher: L,
    probe: P,
    tests: T,
    vcs: V,
}

impl<'a, L, P, T, V> PipelineRunner<'a, L, P, T, V>
where
    L: Launcher,
    P: PortProbe,
    T: TestRunner,
    V: Vcs,
{
    pub fn new(config: &'a Config, launcher: L, probe: P, tests: T, vcs: V) -> Self {
        Self {
            config,
            launcher,
            probe,
            tests,
            vcs,
        }
    }

    /// Runs the whole sequence. `observer` sees every log entry as soon as it is recorded.
    pub fn run(&mut self, observer: &mut dyn FnMut(&LogEntry)) -> PipelineRun {
        let mut run = PipelineRun::new();
        if self.launch(&mut run, observer)
            && self.wait_for_port(&mut run, observer)
            && self.run_tests(&mut run, observer)
            && self.publish(&mut run, observer)
        {
            self.deploy(&mut run, observer);
        }
        info!("Pipeline finished: {}", run.state());
        run
    }

    fn launch(&mut self, run: &mut PipelineRun, observer: &mut dyn FnMut(&LogEntry)) -> bool {
        let root = self.config.project_root.path();
        let command = &self.config.pipeline.launch_command;
        observer(run.transition(
            PipelineState::Launching,
            "launch",
            StepStatus::Running,
            format!("Starting `{}` in {}", command.join(" "), root.display()),
        ));
        match self.launcher.launch(command, root) {
            Ok(()) => {
                observer(run.record("launch", StepStatus::Success, "Service start requested"));
                true
            }
            Err(e) => {
                observer(run.transition(
                    PipelineState::Failed(FailedStep::Launch),
                    "launch",
                    StepStatus::Failure,
                    e.to_string(),
                ));
                false
            }
        }
    }

    fn wait_for_port(&mut self, run: &mut PipelineRun, observer: &mut dyn FnMut(&LogEntry)) -> bool {
        let settings = &self.config.pipeline;
        observer(run.transition(
            PipelineState::WaitingForPort,
            "port",
            StepStatus::Running,
            format!(
                "Waiting for {}:{} ({} attempts, {} ms apart)",
                settings.host, settings.port, settings.port_attempts, settings.port_delay_ms
            ),
        ));

        for attempt in 1..=settings.port_attempts {
            if self.probe.is_open(&settings.host, settings.port) {
                observer(run.record(
                    "port",
                    StepStatus::Success,
                    format!("Port {} open after {} attempt(s)", settings.port, attempt),
                ));
                return true;
            }
            debug!("Port {} closed (attempt {}/{})", settings.port, attempt, settings.port_attempts);
            if attempt < settings.port_attempts {
                thread::sleep(settings.port_delay());
            }
        }

        observer(run.transition(
            PipelineState::Failed(FailedStep::Port),
            "port",
            StepStatus::Failure,
            format!(
                "Port {} did not open after {} attempts",
                settings.port, settings.port_attempts
            ),
        ));
        false
    }

    fn run_tests(&mut self, run: &mut PipelineRun, observer: &mut dyn FnMut(&LogEntry)) -> bool {
        let settings = &self.config.pipeline;
        let suite = match self.suite_path() {
            Ok(suite) => suite,
            Err(reason) => {
                warn!("{}", reason);
                observer(run.transition(
                    PipelineState::Failed(FailedStep::TestsSkipped),
                    "tests",
                    StepStatus::Skipped,
                    format!("{}; skipping tests and publishing", reason),
                ));
                return false;
            }
        };

        observer(run.transition(
            PipelineState::Testing,
            "tests",
            StepStatus::Running,
            format!("Running `{} {}`", settings.test_command, suite.display()),
        ));

        let (state, status, text) = match self.tests.run(&suite) {
            Ok(TestRunOutcome::Passed { output }) => {
                observer(run.record("tests", StepStatus::Success, output));
                return true;
            }
            Ok(TestRunOutcome::Failed { exit_code, output }) => {
                let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
                (
                    PipelineState::Failed(FailedStep::Tests),
                    StepStatus::Failure,
                    format!("Tests failed (exit code {})\n{}", code, output),
                )
            }
            Ok(TestRunOutcome::TimedOut { output }) => (
                PipelineState::Failed(FailedStep::Tests),
                StepStatus::Failure,
                format!(
                    "Tests timed out after {} s and were terminated\n{}",
                    settings.test_timeout_secs, output
                ),
            ),
            Err(e) => (
                PipelineState::Failed(FailedStep::Tests),
                StepStatus::Failure,
                format!("Failed to run `{}`: {}", settings.test_command, e),
            ),
        };
        observer(run.transition(state, "tests", status, text));
        false
    }

    /// The configured suite, if it names an existing file or directory below the root.
    fn suite_path(&self) -> Result<PathBuf, String> {
        let root = &self.config.project_root;
        let configured = self
            .config
            .pipeline
            .test_suite
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| "No test suite configured".to_string())?;

        let suite = root.join(configured);
        let usable = suite != root.path()
            && root.contains(&suite)
            && (suite.is_dir() || suite.is_file());
        if usable {
            Ok(suite)
        } else {
            Err(format!("Test suite not found at {}", suite.display()))
        }
    }

    fn publish(&mut self, run: &mut PipelineRun, observer: &mut dyn FnMut(&LogEntry)) -> bool {
        let settings = &self.config.pipeline;
        observer(run.transition(
            PipelineState::Publishing,
            "publish",
            StepStatus::Running,
            format!("Publishing to {}/{}", settings.remote, settings.branch),
        ));

        let steps: [(VcsStep, Vec<&str>); 4] = [
            (VcsStep::Add, vec!["add", "."]),
            (VcsStep::Commit, vec!["commit", "-m", settings.commit_message.as_str()]),
            (VcsStep::Pull, vec!["pull", settings.remote.as_str(), settings.branch.as_str()]),
            (VcsStep::Push, vec!["push", settings.remote.as_str(), settings.branch.as_str()]),
        ];

        for (step, args) in steps {
            let name = format!("git {}", step);
            let result = self.vcs.run(&args);
            if result.success {
                observer(run.record(&name, StepStatus::Success, result.output));
            } else if step == VcsStep::Commit && is_nothing_to_commit(&result.output) {
                observer(run.record(&name, StepStatus::Success, "Nothing to commit"));
            } else {
                observer(run.transition(
                    PipelineState::Failed(FailedStep::Publish(step)),
                    &name,
                    StepStatus::Failure,
                    result.output,
                ));
                return false;
            }
        }

        observer(run.transition(
            PipelineState::Done,
            "publish",
            StepStatus::Success,
            format!("Changes pushed to {}/{}", settings.remote, settings.branch),
        ));
        true
    }

    /// Fire-and-forget. A failure is logged but the run stays `Done`.
    fn deploy(&mut self, run: &mut PipelineRun, observer: &mut dyn FnMut(&LogEntry)) {
        let Some(command) = &self.config.pipeline.deploy_command else {
            return;
        };
        let root = self.config.project_root.path();
        match self.launcher.launch(command, root) {
            Ok(()) => observer(run.record(
                "deploy",
                StepStatus::Success,
                format!("Started `{}`", command.join(" ")),
            )),
            Err(e) => observer(run.record("deploy", StepStatus::Failure, e.to_string())),
        }
    }
}
