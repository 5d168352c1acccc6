mod dispatch;
mod embedding_provider;
mod llm_api;
mod llm_provider;
pub mod remote;

pub use dispatch::{process_ocr, process_summarize, run_pending_tasks, split_into_chunks, ProcessorResult};
pub use embedding_provider::EmbeddingProvider;
pub use llm_provider::{CompletionOptions, LlmBackend, LlmProvider};
pub use remote::{PollResult, PollStatus, TaskClient};
