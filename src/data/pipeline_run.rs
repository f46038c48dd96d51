use std::fmt;

/// Status attached to each log entry of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl StepStatus {
    fn marker(self) -> &'static str {
        match self {
            StepStatus::Pending => "…",
            StepStatus::Running => "▶️",
            StepStatus::Success => "✅",
            StepStatus::Failure => "❌",
            StepStatus::Skipped => "⚠️",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Publishing sub-steps, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsStep {
    Add,
    Commit,
    Pull,
    Push,
}

impl fmt::Display for VcsStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            VcsStep::Add => "add",
            VcsStep::Commit => "commit",
            VcsStep::Pull => "pull",
            VcsStep::Push => "push",
        };
        f.write_str(s)
    }
}

/// Where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStep {
    Launch,
    Port,
    /// The test suite is not configured or missing. Publishing is skipped, but this is
    /// reported apart from a real test failure.
    TestsSkipped,
    Tests,
    Publish(VcsStep),
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailedStep::Launch => f.write_str("launch"),
            FailedStep::Port => f.write_str("port"),
            FailedStep::TestsSkipped => f.write_str("tests-skipped"),
            FailedStep::Tests => f.write_str("tests"),
            FailedStep::Publish(step) => write!(f, "publish:{}", step),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Launching,
    WaitingForPort,
    Testing,
    Publishing,
    Done,
    Failed(FailedStep),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineState::NotStarted => f.write_str("not started"),
            PipelineState::Launching => f.write_str("launching"),
            PipelineState::WaitingForPort => f.write_str("waiting for port"),
            PipelineState::Testing => f.write_str("testing"),
            PipelineState::Publishing => f.write_str("publishing"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed(step) => write!(f, "failed({})", step),
        }
    }
}

/// One immutable line of a run's log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub step: String,
    pub status: StepStatus,
    pub text: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        let mut line = format!("* {} {}: {}", self.status.marker(), self.step, self.status);
        let text = self.text.trim_end();
        if !text.is_empty() {
            if text.contains('\n') {
                line.push_str(&format!("\n```\n{}\n```", text));
            } else {
                line.push_str(&format!(" - {}", text));
            }
        }
        line.push('\n');
        line
    }
}

/// A single execution of the run/test/publish sequence
#[derive(Debug, Clone)]
pub struct PipelineRun {
    state: PipelineState,
    entries: Vec<LogEntry>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            state: PipelineState::NotStarted,
            entries: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Moves to `state` and records the transition
    pub(crate) fn transition(
        &mut self,
        state: PipelineState,
        step: &str,
        status: StepStatus,
        text: impl Into<String>,
    ) -> &LogEntry {
        self.state = state;
        self.record(step, status, text)
    }

    /// Records an entry without changing state (used for the deploy hand-off)
    pub(crate) fn record(&mut self, step: &str, status: StepStatus, text: impl Into<String>) -> &LogEntry {
        self.entries.push(LogEntry {
            step: step.to_string(),
            status,
            text: text.into(),
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Markdown summary: a heading followed by every entry in order
    pub fn summary(&self) -> String {
        let mut out = String::from("### MyApp Execution Sequence\n\n");
        for entry in &self.entries {
            out.push_str(&entry.render());
        }
        out.push_str(&format!("\nFinal state: {}\n", self.state));
        out
    }
}
