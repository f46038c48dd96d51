//! Real implementations of the collaborator traits used by the CLI.

mod gemini;
mod git;
mod port;
mod process;

pub use gemini::GeminiClient;
pub use git::GitCli;
pub use port::TcpPortProbe;
pub use process::{CommandTestRunner, DetachedLauncher};
