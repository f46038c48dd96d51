mod prompt_registry;

pub use prompt_registry::{PromptError, PromptRegistry, PromptTemplate, ASSISTANT_PROMPT};
