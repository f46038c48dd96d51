use std::time::Instant;

use autodev::data::{LogEntry, PipelineRun, StepStatus};

/// Prints pipeline log entries as they arrive and a closing summary.
pub struct PipelineProgress {
    entries: usize,
    failed: usize,
    start_time: Instant,
}

impl PipelineProgress {
    pub fn new() -> Self {
        Self {
            entries: 0,
            failed: 0,
            start_time: Instant::now(),
        }
    }

    pub fn show(&mut self, entry: &LogEntry) {
        self.entries += 1;
        if entry.status == StepStatus::Failure {
            self.failed += 1;
        }
        println!(
            "[{:>5.1}s] {}",
            self.start_time.elapsed().as_secs_f64(),
            entry.render().trim_end()
        );
    }

    pub fn finish(&self, run: &PipelineRun) {
        let elapsed = self.start_time.elapsed();
        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("  Final state: {}", run.state());
        println!("  Entries:     {}", self.entries);
        println!("  Failures:    {}", self.failed);
        println!("  Duration:    {:.2}s", elapsed.as_secs_f64());
        println!("{}", "=".repeat(60));
    }
}
