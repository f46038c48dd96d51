use anyhow::{bail, Context, Result};
use std::fmt::Display;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::warn;

mod progress;

use autodev::action_log::ActionLog;
use autodev::collaborators::{
    CommandTestRunner, DetachedLauncher, GeminiClient, GitCli, TcpPortProbe,
};
use autodev::config::Config;
use autodev::contexts::{
    extract_commit_id, is_run_command, ChatSession, FileWriter, ModelClient, PathResolver,
    PipelineRunner, ResponseParser, RevertDesk, SessionError, WriteOutcome, REVERT_SEARCH_DEPTH,
    RUN_COMMAND,
};
use autodev::data::{Diagnostic, FileProposal, PipelineRun, PipelineState};
use autodev::registries::PromptRegistry;
use progress::PipelineProgress;

const PROMPTS_DIR: &str = "agents";
const SERVICE_LOG: &str = ".autodev/service.log";
const DEFAULT_LOG_LINES: usize = 50;

pub async fn chat(config: &Config) -> Result<()> {
    run_blocking(config, chat_loop).await
}

pub async fn ask(prompt: Vec<String>, apply: bool, config: &Config) -> Result<()> {
    let text = prompt.join(" ");
    if text.trim().is_empty() {
        bail!("Nothing to ask");
    }

    run_blocking(config, move |config| {
        let log = ActionLog::new(&config.action_log);
        if is_run_command(&text) {
            return match execute_pipeline(config, &log) {
                Some(run) => ensure_done(&run),
                None => Ok(()),
            };
        }

        let mut session = open_session(config)?;
        send_and_report(&mut session, &text, config)?;
        if apply {
            let failures = apply_all(&session, config, &log);
            if failures > 0 {
                bail!("{} proposal(s) could not be written", failures);
            }
        }
        Ok(())
    })
    .await
}

pub async fn parse(file: PathBuf, apply: bool, config: &Config) -> Result<()> {
    run_blocking(config, move |config| {
        let text = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read reply file {}", file.display()))?;
        let outcome = ResponseParser::new(&config.project_root, &config.layout).parse(&text);

        print_diagnostics(&outcome.diagnostics);
        if outcome.proposals.is_empty() {
            println!("No file proposals found in {}", file.display());
            return Ok(());
        }
        list_proposals(&outcome.proposals, config);
        if !apply {
            return Ok(());
        }

        let log = ActionLog::new(&config.action_log);
        let writer = FileWriter::new(&config.project_root);
        let mut failures = 0;
        for proposal in &outcome.proposals {
            let label = proposal_label(proposal, config);
            if !proposal.is_applicable() {
                println!("⊚ Skipping {} (no file location)", label);
            } else if config.dry_run {
                println!("[DRY RUN] Would {} {}", planned_action(proposal), label);
            } else if !report_write(&label, writer.apply_proposal(proposal), &log) {
                failures += 1;
            }
        }
        if failures > 0 {
            bail!("{} proposal(s) could not be written", failures);
        }
        Ok(())
    })
    .await
}

pub async fn locate(name: String, config: &Config) -> Result<()> {
    let resolver = PathResolver::new(&config.project_root, &config.layout);
    match resolver.locate(&name) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("No file found for '{}'", name),
    }
}

pub async fn run(config: &Config) -> Result<()> {
    run_blocking(config, |config| {
        let log = ActionLog::new(&config.action_log);
        match execute_pipeline(config, &log) {
            Some(run) => ensure_done(&run),
            None => Ok(()),
        }
    })
    .await
}

pub async fn commits(count: usize, config: &Config) -> Result<()> {
    run_blocking(config, move |config| {
        let log = ActionLog::new(&config.action_log);
        list_commits(config, &log, count)
    })
    .await
}

pub async fn revert(sha: String, tag: Option<String>, config: &Config) -> Result<()> {
    run_blocking(config, move |config| {
        let log = ActionLog::new(&config.action_log);
        revert_commit(config, &log, &sha, tag.as_deref())
    })
    .await
}

pub async fn log(count: usize, config: &Config) -> Result<()> {
    print_log(&ActionLog::new(&config.action_log), count)
}

/// Model calls, child processes and stdin all block, so they run off the async runtime.
async fn run_blocking<T, F>(config: &Config, work: F) -> Result<T>
where
    F: FnOnce(&Config) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let config = config.clone();
    tokio::task::spawn_blocking(move || work(&config))
        .await
        .context("Background task failed")?
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Empty,
    Quit,
    Run,
    /// One-based, as listed
    Apply(usize),
    ApplyAll,
    Show,
    Log(usize),
    Commits,
    Revert { id: String, tag: Option<String> },
    Prompt(String),
}

impl ChatCommand {
    /// Only exact command shapes are commands; anything else goes to the model.
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ChatCommand::Empty;
        }
        if is_run_command(line) {
            return ChatCommand::Run;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let prompt = || ChatCommand::Prompt(line.to_string());
        let keyword = words[0].to_ascii_lowercase();
        match (keyword.as_str(), &words[1..]) {
            ("quit" | "exit", []) => ChatCommand::Quit,
            ("show", []) => ChatCommand::Show,
            ("commits", []) => ChatCommand::Commits,
            ("log", []) => ChatCommand::Log(DEFAULT_LOG_LINES),
            ("log", [n]) => n.parse().map(ChatCommand::Log).unwrap_or_else(|_| prompt()),
            ("apply", [all]) if all.eq_ignore_ascii_case("all") => ChatCommand::ApplyAll,
            ("apply", [n]) => n.parse().map(ChatCommand::Apply).unwrap_or_else(|_| prompt()),
            ("revert", [id, rest @ ..]) if rest.len() <= 1 && extract_commit_id(id) == Some(*id) => {
                ChatCommand::Revert {
                    id: id.to_string(),
                    tag: rest.first().map(|tag| tag.to_string()),
                }
            }
            _ => prompt(),
        }
    }
}

fn chat_loop(config: &Config) -> Result<()> {
    let mut session = open_session(config)?;
    let log = ActionLog::new(&config.action_log);

    println!("autodev chat in {}", config.project_root.path().display());
    println!(
        "Ask for changes, or use: {}, apply <n>, apply all, show, log [n], commits, revert <sha> [tag], quit",
        RUN_COMMAND
    );
    if config.dry_run {
        println!("[DRY RUN] Nothing will be written or executed");
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\n> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read from stdin")?;

        let result = match ChatCommand::parse(&line) {
            ChatCommand::Empty => Ok(()),
            ChatCommand::Quit => break,
            ChatCommand::Run => {
                if let Some(run) = execute_pipeline(config, &log) {
                    session.record_pipeline_summary(RUN_COMMAND, run.summary());
                }
                Ok(())
            }
            ChatCommand::Apply(number) => {
                apply_one(&session, number, config, &log);
                Ok(())
            }
            ChatCommand::ApplyAll => {
                apply_all(&session, config, &log);
                Ok(())
            }
            ChatCommand::Show => {
                show_proposals(session.pending_proposals(), config);
                Ok(())
            }
            ChatCommand::Log(count) => print_log(&log, count),
            ChatCommand::Commits => list_commits(config, &log, REVERT_SEARCH_DEPTH),
            ChatCommand::Revert { id, tag } => revert_commit(config, &log, &id, tag.as_deref()),
            ChatCommand::Prompt(text) => {
                send_and_report(&mut session, &text, config).map_err(anyhow::Error::from)
            }
        };
        if let Err(e) = result {
            eprintln!("✗ {:#}", e);
        }
    }

    println!("Bye");
    Ok(())
}

fn open_session(config: &Config) -> Result<ChatSession<'_, GeminiClient>> {
    let model =
        GeminiClient::from_settings(&config.model).context("Failed to set up the model client")?;
    let template = PromptRegistry::new(config.project_root.join(PROMPTS_DIR))
        .assistant()
        .context("Failed to load the assistant prompt")?;
    Ok(ChatSession::new(config, model, template))
}

/// Streams the reply to stdout, then lists diagnostics and proposals.
fn send_and_report<M: ModelClient>(
    session: &mut ChatSession<'_, M>,
    text: &str,
    config: &Config,
) -> Result<(), SessionError> {
    let mut streamed = false;
    let result = session.send(text, &mut |chunk| {
        streamed = true;
        print!("{}", chunk);
        let _ = io::stdout().flush();
    });
    println!();

    let turn = result?;
    if !streamed {
        println!("{}", turn.text);
    }
    print_diagnostics(&turn.diagnostics);
    list_proposals(&turn.proposals, config);
    Ok(())
}

fn apply_one<M: ModelClient>(
    session: &ChatSession<'_, M>,
    number: usize,
    config: &Config,
    log: &ActionLog,
) {
    let pending = session.pending_proposals();
    let Some(proposal) = number.checked_sub(1).and_then(|index| pending.get(index)) else {
        if pending.is_empty() {
            eprintln!("✗ {}", SessionError::NoPendingProposals);
        } else {
            eprintln!("✗ No proposal {} (choose 1-{})", number, pending.len());
        }
        return;
    };

    let label = proposal_label(proposal, config);
    if config.dry_run {
        println!("[DRY RUN] Would {} {}", planned_action(proposal), label);
        return;
    }
    let result = session.apply(number - 1).map(|(_, outcome)| outcome);
    report_write(&label, result, log);
}

/// Returns the number of proposals that failed to write.
fn apply_all<M: ModelClient>(session: &ChatSession<'_, M>, config: &Config, log: &ActionLog) -> usize {
    let pending = session.pending_proposals();
    if pending.is_empty() {
        eprintln!("✗ {}", SessionError::NoPendingProposals);
        return 0;
    }
    for (index, proposal) in pending.iter().enumerate() {
        if !proposal.is_applicable() {
            println!("⊚ Skipping [{}] (no file location)", index + 1);
        } else if config.dry_run {
            println!(
                "[DRY RUN] Would {} {}",
                planned_action(proposal),
                proposal_label(proposal, config)
            );
        }
    }
    if config.dry_run {
        return 0;
    }

    let mut failures = 0;
    for (index, result) in session.apply_all() {
        let label = proposal_label(&pending[index], config);
        if !report_write(&label, result.map(|(_, outcome)| outcome), log) {
            failures += 1;
        }
    }
    failures
}

/// Prints and records the result of one write. Returns true on success.
fn report_write<E: Display>(label: &str, result: Result<WriteOutcome, E>, log: &ActionLog) -> bool {
    match result {
        Ok(outcome) => {
            println!("✓ {} {}", outcome.verb(), label);
            record(log, &format!("{} {}", outcome.verb(), label));
            true
        }
        Err(e) => {
            eprintln!("✗ Failed to write {}: {}", label, e);
            record(log, &format!("Failed to write {}: {}", label, e));
            false
        }
    }
}

fn proposal_label(proposal: &FileProposal, config: &Config) -> String {
    proposal
        .resolved_path()
        .and_then(|path| config.project_root.relative_display(path))
        .unwrap_or_else(|| proposal.declared_path().to_string())
}

fn planned_action(proposal: &FileProposal) -> &'static str {
    match proposal.resolved_path() {
        Some(path) if path.exists() => "update",
        _ => "create",
    }
}

fn list_proposals(proposals: &[FileProposal], config: &Config) {
    if proposals.is_empty() {
        return;
    }
    println!("\nProposed changes:");
    for (index, proposal) in proposals.iter().enumerate() {
        let status = match proposal.resolved_path() {
            Some(path) if path.exists() => "updates existing file",
            Some(_) => "new file",
            None => "cannot be applied",
        };
        println!(
            "  [{}] {} ({}, {})",
            index + 1,
            proposal_label(proposal, config),
            proposal.language(),
            status
        );
    }
}

fn show_proposals(proposals: &[FileProposal], config: &Config) {
    if proposals.is_empty() {
        println!("No pending proposals");
        return;
    }
    for (index, proposal) in proposals.iter().enumerate() {
        println!(
            "\n--- [{}] {} ---\n```{}\n{}\n```",
            index + 1,
            proposal_label(proposal, config),
            proposal.language(),
            proposal.content()
        );
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("⚠ {}", diagnostic);
    }
}

/// Runs the pipeline with live progress. Returns `None` on a dry run.
fn execute_pipeline(config: &Config, log: &ActionLog) -> Option<PipelineRun> {
    let root = &config.project_root;
    let settings = &config.pipeline;

    if config.dry_run {
        println!(
            "[DRY RUN] Would start `{}` in {}",
            settings.launch_command.join(" "),
            root.path().display()
        );
        println!(
            "[DRY RUN] Would wait for {}:{} ({} attempts)",
            settings.host, settings.port, settings.port_attempts
        );
        match settings.test_suite.as_deref().filter(|p| !p.as_os_str().is_empty()) {
            Some(suite) => {
                println!(
                    "[DRY RUN] Would run `{} {}`",
                    settings.test_command,
                    suite.display()
                );
                println!(
                    "[DRY RUN] Would run git add, commit, pull and push against {}/{}",
                    settings.remote, settings.branch
                );
            }
            None => println!(
                "[DRY RUN] No test suite configured; tests and publishing would be skipped"
            ),
        }
        if let Some(deploy) = &settings.deploy_command {
            println!("[DRY RUN] Would start `{}`", deploy.join(" "));
        }
        return None;
    }

    println!("Running pipeline in {}", root.path().display());
    let launcher = DetachedLauncher::new(root.clone(), root.join(SERVICE_LOG));
    let probe = TcpPortProbe::new(settings.connect_timeout());
    let tests = CommandTestRunner::from_settings(settings, root);
    let vcs = GitCli::new(root.path());

    let mut progress = PipelineProgress::new();
    let run = PipelineRunner::new(config, launcher, probe, tests, vcs)
        .run(&mut |entry| progress.show(entry));
    progress.finish(&run);

    record(log, &format!("Pipeline finished: {}", run.state()));
    Some(run)
}

fn ensure_done(run: &PipelineRun) -> Result<()> {
    match run.state() {
        PipelineState::Done => {
            println!("✓ Pipeline completed");
            Ok(())
        }
        state => bail!("Pipeline stopped: {}", state),
    }
}

fn list_commits(config: &Config, log: &ActionLog, count: usize) -> Result<()> {
    let mut desk = RevertDesk::new(config, GitCli::new(config.project_root.path()), log);
    let commits = desk.recent_commits(count)?;
    if commits.is_empty() {
        println!("No commits on {}", config.pipeline.branch);
    }
    for commit in &commits {
        println!("{}", commit.render());
    }
    Ok(())
}

fn revert_commit(config: &Config, log: &ActionLog, id: &str, tag: Option<&str>) -> Result<()> {
    if config.dry_run {
        println!(
            "[DRY RUN] Would revert {} and push to {}/{}",
            id, config.pipeline.remote, config.pipeline.branch
        );
        if let Some(tag) = tag {
            println!("[DRY RUN] Would tag the revert as {}", tag);
        }
        return Ok(());
    }
    let mut desk = RevertDesk::new(config, GitCli::new(config.project_root.path()), log);
    let result = desk.revert(id, tag)?;
    println!("{}", result);
    Ok(())
}

fn print_log(log: &ActionLog, count: usize) -> Result<()> {
    let lines = log
        .tail(count)
        .with_context(|| format!("Failed to read action log {}", log.path().display()))?;
    if lines.is_empty() {
        println!("No actions recorded yet");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn record(log: &ActionLog, message: &str) {
    if let Err(e) = log.append(message) {
        warn!("Failed to write action log {}: {}", log.path().display(), e);
    }
}
