//! One interactive session: history, context assembly, model turns and applying proposals.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::file_writer::{FileWriter, WriteError, WriteOutcome};
use super::path_resolver::PathResolver;
use super::response_parser::ResponseParser;
use crate::config::Config;
use crate::data::{
    language_for_path, ConversationHistory, ConversationTurn, FileProposal, SourceLayout, PLAIN_TEXT,
};
use crate::registries::{PromptError, PromptTemplate};

pub const RUN_COMMAND: &str = "run myapp";
pub const TRUNCATION_MARKER: &str = "\n... [File Content Truncated] ...";

/// Final outcome of one model call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Text(String),
    /// The model refused on content-safety grounds. Never parsed for files.
    Blocked { reason: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("API key not found; set the {0} environment variable")]
    MissingApiKey(String),
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected model response: {0}")]
    Protocol(String),
}

/// A language model that streams text back.
///
/// Implementations keep whatever conversation state they need between calls.
pub trait ModelClient {
    fn send_prompt(
        &mut self,
        prompt: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ModelReply, ModelError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("the latest reply has no proposals to apply")]
    NoPendingProposals,
    #[error("proposal {index} does not exist (the latest reply has {count})")]
    ProposalOutOfRange { index: usize, count: usize },
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

#[derive(Serialize)]
struct PromptInput<'a> {
    request: &'a str,
    context: Option<String>,
    layout: &'a SourceLayout,
}

/// Returns true for the command that starts the run/test/publish pipeline.
pub fn is_run_command(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(RUN_COMMAND)
}

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)([\w./-]+\.(?:java|html|css|js|robot|xml|properties|md)\b)",
            r"|(\b[A-Z]\w*(?:Service|Controller|Repository|Entity|Application)\b)",
            r"|(\b(?:task\.html|index\.html|styles?\.css|scripts?\.js|tests?\.robot|pom\.xml)\b)",
        ))
        .expect("valid mention regex")
    })
}

/// File names and paths mentioned in free text, de-duplicated in order of first appearance.
pub fn find_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    mention_re()
        .captures_iter(text)
        .filter_map(|caps| {
            (1..=3)
                .filter_map(|i| caps.get(i))
                .map(|m| m.as_str().to_string())
                .next()
        })
        .filter(|mention| seen.insert(mention.clone()))
        .collect()
}

pub struct ChatSession<'a, M: ModelClient> {
    config: &'a Config,
    model: M,
    template: PromptTemplate,
    history: ConversationHistory,
}

impl<'a, M: ModelClient> ChatSession<'a, M> {
    pub fn new(config: &'a Config, model: M, template: PromptTemplate) -> Self {
        Self {
            config,
            model,
            template,
            history: ConversationHistory::new(),
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn pending_proposals(&self) -> &[FileProposal] {
        self.history.pending_proposals()
    }

    /// Runs one model turn for `text` and records both sides in the history.
    ///
    /// Streamed text is forwarded to `on_chunk` as it arrives. When the model call fails an
    /// assistant turn carrying the error is still recorded, so older proposals stop being
    /// pending.
    pub fn send(
        &mut self,
        text: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<&ConversationTurn, SessionError> {
        self.history.push(ConversationTurn::user(text));

        let input = PromptInput {
            request: text,
            context: self.assemble_context(text),
            layout: &self.config.layout,
        };
        let prompt = match self.template.render(&input) {
            Ok(prompt) => prompt,
            Err(e) => {
                self.history
                    .push(ConversationTurn::assistant(format!("Error: {}", e), vec![], vec![]));
                return Err(e.into());
            }
        };

        let reply = match self.model.send_prompt(&prompt, on_chunk) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Model call failed: {}", e);
                self.history
                    .push(ConversationTurn::assistant(format!("Error: {}", e), vec![], vec![]));
                return Err(e.into());
            }
        };

        let turn = match reply {
            ModelReply::Text(text) => {
                let parser = ResponseParser::new(&self.config.project_root, &self.config.layout);
                let outcome = parser.parse(&text);
                info!("Model reply produced {} proposal(s)", outcome.proposals.len());
                ConversationTurn::assistant(text, outcome.proposals, outcome.diagnostics)
            }
            ModelReply::Blocked { reason } => {
                warn!("Model reply blocked: {}", reason);
                ConversationTurn::assistant(
                    format!("Error: Response blocked by safety settings ({}).", reason),
                    vec![],
                    vec![],
                )
            }
        };
        Ok(self.history.push(turn))
    }

    /// Records a pipeline run as a user command followed by the run summary.
    pub fn record_pipeline_summary(&mut self, command: &str, summary: impl Into<String>) {
        self.history.push(ConversationTurn::user(command));
        self.history
            .push(ConversationTurn::assistant(summary, vec![], vec![]));
    }

    /// Writes the pending proposal at `index` (zero-based).
    pub fn apply(&self, index: usize) -> Result<(PathBuf, WriteOutcome), SessionError> {
        let pending = self.pending_proposals();
        if pending.is_empty() {
            return Err(SessionError::NoPendingProposals);
        }
        let proposal = pending.get(index).ok_or(SessionError::ProposalOutOfRange {
            index,
            count: pending.len(),
        })?;
        let writer = FileWriter::new(&self.config.project_root);
        let outcome = writer.apply_proposal(proposal)?;
        let path = proposal
            .resolved_path()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        Ok((path, outcome))
    }

    /// Writes every pending proposal that has a location. One failure does not stop the rest.
    pub fn apply_all(&self) -> Vec<(usize, Result<(PathBuf, WriteOutcome), SessionError>)> {
        self.pending_proposals()
            .iter()
            .enumerate()
            .filter(|(_, proposal)| proposal.is_applicable())
            .map(|(index, _)| (index, self.apply(index)))
            .collect()
    }

    /// Reads the files mentioned in `text` into context blocks for the prompt.
    pub fn assemble_context(&self, text: &str) -> Option<String> {
        let root = &self.config.project_root;
        let limits = &self.config.context;
        let resolver = PathResolver::new(root, &self.config.layout);

        let mut blocks = String::new();
        let mut included = HashSet::new();
        for mention in find_mentions(text) {
            if included.len() >= limits.max_files {
                debug!("Context limit of {} file(s) reached", limits.max_files);
                break;
            }
            let Some(path) = resolver.locate(&mention) else {
                debug!("No existing file for mention '{}'", mention);
                continue;
            };
            if included.contains(&path) {
                continue;
            }
            let content = match resolver.read(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Found '{}' but could not read it: {}", path.display(), e);
                    continue;
                }
            };
            let content = truncate_chars(content, limits.max_file_chars);
            let relative = root
                .relative_display(&path)
                .unwrap_or_else(|| mention.clone());
            let language = language_for_path(&path).unwrap_or(PLAIN_TEXT);

            blocks.push_str(&format!(
                "\n--- START CONTEXT FILE: {relative} ---\n```{language}\n{content}\n```\n--- END CONTEXT FILE: {relative} ---\n"
            ));
            included.insert(path);
        }

        if included.is_empty() {
            None
        } else {
            Some(format!(
                "Relevant File Context Provided by User (Paths relative to Project Root):\n{}",
                blocks
            ))
        }
    }
}

fn truncate_chars(content: String, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &content[..cut], TRUNCATION_MARKER),
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_root::ProjectRoot;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct ScriptedModel {
        replies: VecDeque<Result<ModelReply, ModelError>>,
        prompts: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelReply, ModelError>>) -> (Self, Rc<RefCell<Vec<String>>>) {
            let prompts = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    replies: replies.into(),
                    prompts: Rc::clone(&prompts),
                },
                prompts,
            )
        }
    }

    impl ModelClient for ScriptedModel {
        fn send_prompt(
            &mut self,
            prompt: &str,
            on_chunk: &mut dyn FnMut(&str),
        ) -> Result<ModelReply, ModelError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            let reply = self
                .replies
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Protocol("script exhausted".into())));
            if let Ok(ModelReply::Text(text)) = &reply {
                on_chunk(text.as_str());
            }
            reply
        }
    }

    fn config() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        (dir, Config::for_root(root))
    }

    fn two_files() -> ModelReply {
        ModelReply::Text(
            "Sure.\n--- START FILE: TaskService.java ---\n```java\nclass TaskService {}\n```\n--- END FILE: TaskService.java ---\n\
             --- START FILE: task.html ---\n```\n<h1>Tasks</h1>\n```\n--- END FILE: task.html ---\n"
                .to_string(),
        )
    }

    #[test]
    fn reply_proposals_can_be_applied() {
        let (_dir, config) = config();
        let (model, _) = ScriptedModel::new(vec![Ok(two_files())]);
        let mut session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());

        let mut streamed = String::new();
        let turn = session.send("create a task page", &mut |c| streamed.push_str(c)).unwrap();
        assert_eq!(turn.proposals.len(), 2);
        assert!(streamed.contains("START FILE"));

        let (path, outcome) = session.apply(1).unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        assert!(path.ends_with("src/main/resources/static/task.html"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "<h1>Tasks</h1>");

        let results = session.apply_all();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1].1, Ok((_, WriteOutcome::Overwritten))));

        assert!(matches!(
            session.apply(7),
            Err(SessionError::ProposalOutOfRange { index: 7, count: 2 })
        ));
    }

    #[test]
    fn blocked_reply_is_never_parsed() {
        let (_dir, config) = config();
        let (model, _) = ScriptedModel::new(vec![Ok(ModelReply::Blocked {
            reason: "SAFETY --- START FILE: x.java ---".into(),
        })]);
        let mut session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());

        let turn = session.send("anything", &mut |_| {}).unwrap();
        assert!(turn.proposals.is_empty());
        assert!(turn.text.contains("blocked by safety settings"));
        assert!(matches!(session.apply(0), Err(SessionError::NoPendingProposals)));
    }

    #[test]
    fn model_error_clears_pending_proposals() {
        let (_dir, config) = config();
        let (model, _) = ScriptedModel::new(vec![
            Ok(two_files()),
            Err(ModelError::Api {
                status: 500,
                message: "boom".into(),
            }),
        ]);
        let mut session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());

        session.send("first", &mut |_| {}).unwrap();
        assert_eq!(session.pending_proposals().len(), 2);
        assert!(session.send("second", &mut |_| {}).is_err());
        assert!(session.pending_proposals().is_empty());
        assert_eq!(session.history().len(), 4);
    }

    #[test]
    fn pipeline_summary_makes_older_proposals_stale() {
        let (_dir, config) = config();
        let (model, _) = ScriptedModel::new(vec![Ok(two_files())]);
        let mut session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());

        session.send("first", &mut |_| {}).unwrap();
        session.record_pipeline_summary(RUN_COMMAND, "### MyApp Execution Sequence\n");
        assert!(matches!(session.apply(0), Err(SessionError::NoPendingProposals)));
        assert!(session.apply_all().is_empty());
    }

    #[test]
    fn mentioned_files_are_sent_as_context() {
        let (_dir, config) = config();
        let service = config
            .project_root
            .path()
            .join("src/main/java/com/example/TaskService.java");
        fs::create_dir_all(service.parent().unwrap()).unwrap();
        fs::write(&service, "class TaskService { /* body */ }").unwrap();
        let (model, prompts) = ScriptedModel::new(vec![Ok(ModelReply::Text("ok".into()))]);
        let mut session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());

        session.send("Please refactor TaskService", &mut |_| {}).unwrap();
        let prompt = prompts.borrow()[0].clone();
        assert!(prompt.contains(
            "--- START CONTEXT FILE: src/main/java/com/example/TaskService.java ---"
        ));
        assert!(prompt.contains("```java\nclass TaskService { /* body */ }\n```"));
        assert!(prompt.contains("Please refactor TaskService"));
        assert!(prompt.contains("src/test/robotframework"));
    }

    #[test]
    fn context_is_limited_and_truncated() {
        let (_dir, mut config) = config();
        config.context.max_file_chars = 10;
        let static_dir = config.project_root.path().join("src/main/resources/static");
        fs::create_dir_all(&static_dir).unwrap();
        for name in ["a.css", "b.css", "c.css", "d.css"] {
            fs::write(static_dir.join(name), "0123456789abcdef").unwrap();
        }
        let (model, _) = ScriptedModel::new(vec![]);
        let session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());

        let context = session
            .assemble_context("compare a.css, b.css, c.css and d.css")
            .unwrap();
        assert_eq!(context.matches("--- START CONTEXT FILE").count(), 3);
        assert!(!context.contains("d.css"));
        assert!(context.contains(&format!("0123456789{}", TRUNCATION_MARKER)));
    }

    #[test]
    fn no_mentions_means_no_context() {
        let (_dir, config) = config();
        let (model, _) = ScriptedModel::new(vec![]);
        let session = ChatSession::new(&config, model, PromptTemplate::builtin_assistant());
        assert_eq!(session.assemble_context("explain dependency injection"), None);
    }

    #[test]
    fn mentions_are_deduplicated_in_order() {
        let mentions = find_mentions(
            "Fix src/main/resources/static/task.html, then TaskController and pom.xml; TaskController again",
        );
        assert_eq!(
            mentions,
            vec!["src/main/resources/static/task.html", "TaskController", "pom.xml"]
        );
    }

    #[test]
    fn run_command_is_case_insensitive() {
        assert!(is_run_command("  Run MyApp "));
        assert!(!is_run_command("run myapp now"));
    }
}
