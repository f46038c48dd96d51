use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::contexts::{LaunchError, Launcher, TestRunOutcome, TestRunner};
use crate::project_root::ProjectRoot;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

/// Starts commands in the background with their output appended to a log file.
///
/// The child is reaped on a helper thread so it never lingers as a zombie.
pub struct DetachedLauncher {
    root: ProjectRoot,
    output_log: PathBuf,
}

impl DetachedLauncher {
    pub fn new(root: ProjectRoot, output_log: impl Into<PathBuf>) -> Self {
        Self {
            root,
            output_log: output_log.into(),
        }
    }

    fn open_log(&self) -> io::Result<File> {
        if let Some(parent) = self.output_log.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_log)
    }
}

impl Launcher for DetachedLauncher {
    fn launch(&mut self, command: &[String], working_dir: &Path) -> Result<(), LaunchError> {
        let (program, args) = command.split_first().ok_or(LaunchError::EmptyCommand)?;
        if !working_dir.is_dir() || !self.root.contains(working_dir) {
            return Err(LaunchError::OutsideRoot(working_dir.to_path_buf()));
        }

        let spawn_error = |source: io::Error| LaunchError::Spawn {
            program: program.clone(),
            source,
        };
        let stdout = self.open_log().map_err(spawn_error)?;
        let stderr = stdout.try_clone().map_err(spawn_error)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(spawn_error)?;

        info!(
            "Started `{}` (pid {}), output in {}",
            command.join(" "),
            child.id(),
            self.output_log.display()
        );
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

/// Runs `<program> <suite>` with a hard wall-clock ceiling.
///
/// Stdout and stderr are read line by line into one channel, so the captured text keeps the
/// order in which lines arrived. The suite runs in its own process group, and a timeout
/// terminates the whole group.
pub struct CommandTestRunner {
    program: String,
    working_dir: PathBuf,
    timeout: Duration,
    grace: Duration,
}

impl CommandTestRunner {
    pub fn new(
        program: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            timeout,
            grace,
        }
    }

    pub fn from_settings(settings: &PipelineSettings, root: &ProjectRoot) -> Self {
        Self::new(
            settings.test_command.clone(),
            root.path(),
            settings.test_timeout(),
            settings.terminate_grace(),
        )
    }
}

impl TestRunner for CommandTestRunner {
    fn run(&mut self, suite: &Path) -> io::Result<TestRunOutcome> {
        let mut command = Command::new(&self.program);
        command
            .arg(suite)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // own group, so a timeout can reach everything the suite started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn()?;
        debug!("Started `{} {}` (pid {})", self.program, suite.display(), child.id());

        let (tx, rx) = mpsc::channel();
        spawn_line_reader(child.stdout.take(), tx.clone());
        spawn_line_reader(child.stderr.take(), tx);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if start.elapsed() >= self.timeout => {
                    warn!(
                        "`{}` exceeded {:?}; terminating",
                        self.program, self.timeout
                    );
                    terminate(&mut child, self.grace);
                    break None;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    terminate(&mut child, Duration::ZERO);
                    return Err(e);
                }
            }
        };

        let output = collect_output(&rx, OUTPUT_DRAIN);
        Ok(match status {
            Some(status) if status.success() => TestRunOutcome::Passed { output },
            Some(status) => TestRunOutcome::Failed {
                exit_code: status.code(),
                output,
            },
            None => TestRunOutcome::TimedOut { output },
        })
    }
}

/// Reader threads are never joined: a leftover process holding the pipe must not block us.
fn spawn_line_reader<R: Read + Send + 'static>(stream: Option<R>, tx: Sender<String>) {
    let Some(stream) = stream else {
        return;
    };
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

/// Lines received until both streams close or `drain` runs out, whichever comes first.
fn collect_output(rx: &Receiver<String>, drain: Duration) -> String {
    let deadline = Instant::now() + drain;
    let mut lines = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(line) => lines.push(line),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                debug!("Output streams still open after {:?}; keeping what arrived", drain);
                lines.extend(rx.try_iter());
                break;
            }
        }
    }
    lines.join("\n")
}

/// SIGTERM to the whole process group, then SIGKILL once the grace period runs out.
fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(child.id() as i32);
        if killpg(group, Signal::SIGTERM).is_ok() {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if let Ok(Some(_)) = child.try_wait() {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        // the leader may be gone while the rest of its group lives on
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            debug!("SIGKILL to process group {} failed: {}", group, e);
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill() {
        debug!("kill after grace period failed: {}", e);
    }
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("suite.sh");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let suite = script(&dir, "echo out\necho err 1>&2\nexit 3\n");
        let mut runner =
            CommandTestRunner::new("sh", dir.path(), Duration::from_secs(10), Duration::ZERO);

        match runner.run(&suite).unwrap() {
            TestRunOutcome::Failed { exit_code, output } => {
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn passing_suite() {
        let dir = TempDir::new().unwrap();
        let suite = script(&dir, "echo '1 test, 1 passed'\n");
        let mut runner =
            CommandTestRunner::new("sh", dir.path(), Duration::from_secs(10), Duration::ZERO);
        assert_eq!(
            runner.run(&suite).unwrap(),
            TestRunOutcome::Passed {
                output: "1 test, 1 passed".to_string()
            }
        );
    }

    #[test]
    fn slow_suite_is_terminated() {
        let dir = TempDir::new().unwrap();
        let suite = script(&dir, "echo started\nexec sleep 30\n");
        let mut runner = CommandTestRunner::new(
            "sh",
            dir.path(),
            Duration::from_millis(300),
            Duration::from_millis(200),
        );

        let started = Instant::now();
        let outcome = runner.run(&suite).unwrap();
        assert!(matches!(outcome, TestRunOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_reaches_grandchildren_holding_the_pipes() {
        let dir = TempDir::new().unwrap();
        let suite = script(&dir, "echo started\nsleep 30\necho finished\n");
        let mut runner = CommandTestRunner::new(
            "sh",
            dir.path(),
            Duration::from_millis(300),
            Duration::from_millis(200),
        );

        let started = Instant::now();
        let outcome = runner.run(&suite).unwrap();
        let elapsed = started.elapsed();
        match outcome {
            TestRunOutcome::TimedOut { output } => {
                assert!(output.contains("started"));
                assert!(!output.contains("finished"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[test]
    fn background_process_does_not_hold_up_a_finished_suite() {
        let dir = TempDir::new().unwrap();
        let suite = script(&dir, "sleep 30 &\necho done\n");
        let mut runner =
            CommandTestRunner::new("sh", dir.path(), Duration::from_secs(10), Duration::ZERO);

        let started = Instant::now();
        let outcome = runner.run(&suite).unwrap();
        assert!(matches!(outcome, TestRunOutcome::Passed { ref output } if output.contains("done")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut runner = CommandTestRunner::new(
            "autodev-no-such-test-runner",
            dir.path(),
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert!(runner.run(dir.path()).is_err());
    }

    #[test]
    fn launcher_refuses_outside_directories() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        let mut launcher = DetachedLauncher::new(root, dir.path().join(".autodev/service.log"));

        assert!(matches!(
            launcher.launch(&["true".to_string()], outside.path()),
            Err(LaunchError::OutsideRoot(_))
        ));
        assert!(matches!(
            launcher.launch(&[], dir.path()),
            Err(LaunchError::EmptyCommand)
        ));
    }

    #[test]
    fn launcher_appends_output_to_log() {
        let dir = TempDir::new().unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        let log = dir.path().join(".autodev/service.log");
        let mut launcher = DetachedLauncher::new(root, &log);

        launcher
            .launch(&["sh".into(), "-c".into(), "echo booted".into()], dir.path())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if fs::read_to_string(&log).unwrap_or_default().contains("booted") {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("service output never reached {}", log.display());
    }
}
