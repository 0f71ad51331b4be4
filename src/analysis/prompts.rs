//! Prompt text for the analysis tasks

use serde_json::Value;

use crate::attachments::truncate_text;

pub const FINANCIAL: &str = "financial";
pub const RISK: &str = "risk";
pub const TIMELINE: &str = "timeline";
pub const GOVERNANCE: &str = "governance";
pub const POSITIVE: &str = "positive";
pub const STEEL_MAN: &str = "steel_man";
pub const RECOMMENDATIONS: &str = "recommendations";

pub const SYSTEM_PROMPT: &str = "You review on-chain governance proposals for token holders. \
Base every statement on the proposal text provided. Answer with a single JSON object and nothing else.";

/// Instructions for each independent task, in run order
pub const INDEPENDENT_INSTRUCTIONS: [(&str, &str); 6] = [
    (
        FINANCIAL,
        "Analyse the money involved. Report the requested amount and asset, how it is split \
         across milestones or recipients, whether the costs look reasonable for the work, and \
         anything unclear about payment. JSON keys: requested_amount, asset, breakdown (array), \
         cost_assessment, concerns (array).",
    ),
    (
        RISK,
        "Identify delivery, technical, security and counterparty risks. For each risk give a \
         severity of low, medium or high and a one sentence reason. JSON keys: risks (array of \
         {risk, severity, reason}), overall_risk.",
    ),
    (
        TIMELINE,
        "Extract the delivery timeline: milestones, dates or durations, and what is delivered at \
         each step. Flag missing or unrealistic dates. JSON keys: milestones (array of \
         {name, due, deliverable}), timeline_concerns (array).",
    ),
    (
        GOVERNANCE,
        "Assess the proposal as a governance action: which track or origin fits, whether the \
         proposer has a track record mentioned in the text, how progress will be reported, and \
         what accountability exists. JSON keys: track_fit, accountability, reporting, notes (array).",
    ),
    (
        POSITIVE,
        "Make the strongest honest case FOR this proposal. JSON keys: summary, arguments (array).",
    ),
    (
        STEEL_MAN,
        "Make the strongest honest case AGAINST this proposal, steel-manning the critics. \
         JSON keys: summary, arguments (array).",
    ),
];

const CONTENT_HEADER: &str = "=== PROPOSAL CONTENT ===";
const CONTENT_FOOTER: &str = "=== END PROPOSAL CONTENT ===";

pub fn task_prompt(instructions: &str, content: &str, max_content_chars: usize) -> String {
    format!(
        "{instructions}\n\n{CONTENT_HEADER}\n{}\n{CONTENT_FOOTER}",
        truncate_text(content, max_content_chars)
    )
}

pub fn recommendations_prompt(positive: &Value, steel_man: &Value) -> String {
    format!(
        "Two reviewers assessed a governance proposal. Weigh both sides and give concrete \
         recommendations to a voter and to the proposer.\n\n\
         Case for:\n{}\n\nCase against:\n{}\n\n\
         JSON keys: verdict (aye, nay or abstain), recommendations (array of {{title, rationale}}).",
        pretty(positive),
        pretty(steel_man)
    )
}

pub fn enrichment_prompt(item: &Value, content: &str, max_content_chars: usize) -> String {
    task_prompt(
        &format!(
            "Expand this recommendation with the specific passages of the proposal that support \
             it and one measurable condition a voter could ask for.\n\nRecommendation:\n{}\n\n\
             JSON keys: evidence (array of quotes), condition.",
            pretty(item)
        ),
        content,
        max_content_chars,
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
