// Decision routing: signal collection → pure scoring → optional explanation.
// The LLM only explains; `scoring` alone decides which module comes next.

pub mod decision;
pub mod explanation;
pub mod handlers;
pub mod prompts;
pub mod scoring;
pub mod signals;
