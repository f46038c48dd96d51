mod conversation;
mod layout;
mod pipeline_run;
mod proposal;

pub use conversation::{ConversationHistory, ConversationTurn, Role};
pub use layout::{
    is_java_test_name, is_known_language_tag, language_for_path, normalize_language_tag, FileCategory, SourceLayout,
    PLAIN_TEXT,
};
pub use pipeline_run::{FailedStep, LogEntry, PipelineRun, PipelineState, StepStatus, VcsStep};
pub use proposal::{Diagnostic, DiagnosticKind, FileProposal, UNLOCATED_PATH};
