/// Prompt for the post-decision explanation call.
///
/// Placeholders: {module}, {skill}, {depth}, {score}, {dominant}, {signals}
pub const EXPLANATION_PROMPT_TEMPLATE: &str = "\
A learner is being routed to the learning module \"{module}\", which trains {skill}.
This is routing number {depth} in a row to this module. Its score is {score}.
The strongest contributing signal was {dominant}.

Signals (each between 0 and 1):
{signals}

Signal meanings: weakness = how low the skill score is; rate = how fast the \
skill is declining; recency = how long since it was last practiced; \
goal_alignment = fit with the learner's declared goals; pattern = how often \
this weakness has recurred.

Write at most two sentences, addressed to the learner, explaining why this \
module is next.";
