// Shared prompt fragments. Each module that calls the LLM keeps its own
// prompts.rs alongside it; this file only holds cross-cutting pieces.

/// System prompt fragment that forces short plain-text answers.
pub const PLAIN_TEXT_SYSTEM: &str = "You are a concise learning coach. \
    Respond in plain text only. \
    Do NOT use markdown, lists, headings or quotation marks. \
    Never write more than two sentences.";

/// Keeps the model from second-guessing the routing decision.
pub const DECISION_IS_FINAL_INSTRUCTION: &str = "\
    The module has already been chosen by a deterministic scorer. \
    Explain the choice using only the numbers provided. \
    Do NOT suggest a different module and do NOT invent facts about the learner.";
