mod chat_session;
mod file_writer;
mod path_resolver;
mod pipeline_runner;
mod response_parser;
mod revert_desk;

pub use chat_session::{
    find_mentions, is_run_command, ChatSession, ModelClient, ModelError, ModelReply, SessionError,
    RUN_COMMAND, TRUNCATION_MARKER,
};
pub use file_writer::{FileWriter, WriteError, WriteOutcome};
pub use path_resolver::PathResolver;
pub use pipeline_runner::{
    is_nothing_to_commit, CommandOutput, LaunchError, Launcher, PipelineRunner, PortProbe,
    TestRunOutcome, TestRunner, Vcs,
};
pub use response_parser::{ParseOutcome, ResponseParser};
pub use revert_desk::{
    extract_commit_id, CommitSummary, RevertDesk, RevertError, REVERT_SEARCH_DEPTH,
};
