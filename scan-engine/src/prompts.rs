//! Prompt construction and model-output parsing.
//!
//! Verify and rank prompts are budget-aware: overhead (system + preamble +
//! output reserve) is subtracted from the model's context window, and PR
//! summaries are degraded in steps until they fit — first body/file-list
//! truncation, then dropping PRs from the end with an omission note, with
//! an absolute floor of the first two PRs aggressively truncated.

use ai_llm_service::chat::ChatMessage;
use ai_llm_service::tokens::count_tokens;
use data_store::Pr;
use serde_json::Value;

/// Reserved for the model's reply.
const OUTPUT_RESERVE_TOKENS: u32 = 2_000;
/// Body clip applied at the first degradation step.
const BODY_CLIP_CHARS: usize = 500;
/// File-list clip applied at the first degradation step.
const FILE_LIST_CLIP: usize = 20;
/// Aggressive clips for the two-PR floor.
const FLOOR_BODY_CLIP_CHARS: usize = 120;
const FLOOR_FILE_LIST_CLIP: usize = 5;

/// The fields of a PR that prompts expose to the model.
#[derive(Debug, Clone)]
pub struct PrSummary {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub file_paths: Vec<String>,
}

impl From<&Pr> for PrSummary {
    fn from(pr: &Pr) -> Self {
        Self {
            number: pr.number,
            title: pr.title.clone(),
            body: pr.body.clone(),
            file_paths: pr.file_paths.clone(),
        }
    }
}

impl PrSummary {
    fn render(&self, body_clip: Option<usize>, files_clip: Option<usize>) -> String {
        let body = match (&self.body, body_clip) {
            (Some(b), Some(clip)) => clip_chars(b, clip),
            (Some(b), None) => b.clone(),
            (None, _) => String::new(),
        };
        let files: Vec<&str> = match files_clip {
            Some(clip) => self.file_paths.iter().take(clip).map(|s| s.as_str()).collect(),
            None => self.file_paths.iter().map(|s| s.as_str()).collect(),
        };
        let omitted = self.file_paths.len().saturating_sub(files.len());
        let mut out = format!("PR #{}: {}\n", self.number, self.title);
        if !body.is_empty() {
            out.push_str(&format!("Description: {}\n", body));
        }
        out.push_str(&format!("Files: {}", files.join(", ")));
        if omitted > 0 {
            out.push_str(&format!(" (+{omitted} more files)"));
        }
        out.push('\n');
        out
    }
}

/// System + user messages asking for a concise intent description.
pub fn intent_messages(pr: &PrSummary) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You summarise the intent of GitHub pull requests. Reply with 2-3 \
             plain sentences describing what the change accomplishes and why. \
             No markdown, no preamble.",
        ),
        ChatMessage::user(pr.render(Some(2_000), Some(50))),
    ]
}

const VERIFY_SYSTEM: &str = "You compare two GitHub pull requests and decide whether they are \
duplicates (solving the same problem with substantially the same change). Reply with exactly one \
JSON object: {\"isDuplicate\": bool, \"confidence\": number 0-1, \"relationship\": \
\"exact_duplicate\"|\"near_duplicate\"|\"related\", \"rationale\": string}. No other text.";

/// Budget-aware verification prompt for one candidate pair.
pub fn verify_messages(a: &PrSummary, b: &PrSummary, max_context_tokens: u32) -> Vec<ChatMessage> {
    let preamble = "Are these two pull requests duplicates?\n\n";
    let budget = remaining_budget(max_context_tokens, VERIFY_SYSTEM, preamble);
    let body = fit_summaries(&[a.clone(), b.clone()], budget);
    vec![
        ChatMessage::system(VERIFY_SYSTEM),
        ChatMessage::user(format!("{preamble}{body}")),
    ]
}

const RANK_SYSTEM: &str = "You rank duplicate GitHub pull requests by quality. Score each PR \
0-100 as codeQuality (0-50) plus completeness (0-50). Reply with exactly one JSON array of \
{\"prNumber\": number, \"score\": number, \"rationale\": string}, one entry per PR, best first. \
No other text.";

/// Budget-aware ranking prompt for one confirmed group.
pub fn rank_messages(members: &[PrSummary], max_context_tokens: u32) -> Vec<ChatMessage> {
    let preamble = "These pull requests were confirmed as duplicates of each other. \
Rank them by which should be kept.\n\n";
    let budget = remaining_budget(max_context_tokens, RANK_SYSTEM, preamble);
    let body = fit_summaries(members, budget);
    vec![
        ChatMessage::system(RANK_SYSTEM),
        ChatMessage::user(format!("{preamble}{body}")),
    ]
}

fn remaining_budget(max_context_tokens: u32, system: &str, preamble: &str) -> u32 {
    max_context_tokens
        .saturating_sub(count_tokens(system))
        .saturating_sub(count_tokens(preamble))
        .saturating_sub(OUTPUT_RESERVE_TOKENS)
}

/// Degrades summaries until they fit the budget (see module docs).
fn fit_summaries(summaries: &[PrSummary], budget_tokens: u32) -> String {
    let full: String = summaries.iter().map(|s| s.render(None, None)).collect();
    if count_tokens(&full) <= budget_tokens {
        return full;
    }

    // Step 1: clip bodies and file lists.
    let clipped: Vec<String> = summaries
        .iter()
        .map(|s| s.render(Some(BODY_CLIP_CHARS), Some(FILE_LIST_CLIP)))
        .collect();
    if count_tokens(&clipped.concat()) <= budget_tokens {
        return clipped.concat();
    }

    // Step 2: drop PRs from the end until the rest fits.
    for keep in (2..summaries.len()).rev() {
        let mut out = clipped[..keep].concat();
        out.push_str(&format!("\n({} additional PRs omitted)\n", summaries.len() - keep));
        if count_tokens(&out) <= budget_tokens {
            return out;
        }
    }

    // Floor: first two PRs, aggressively truncated.
    let mut out: String = summaries
        .iter()
        .take(2)
        .map(|s| s.render(Some(FLOOR_BODY_CLIP_CHARS), Some(FLOOR_FILE_LIST_CLIP)))
        .collect();
    if summaries.len() > 2 {
        out.push_str(&format!("\n({} additional PRs omitted)\n", summaries.len() - 2));
    }
    out
}

fn clip_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}

/// Extracts the first JSON object from a model reply.
///
/// Tolerates code fences and prose around the object.
pub fn extract_json_object(raw: &str) -> Result<Value, String> {
    extract_delimited(raw, '{', '}')
}

/// Extracts the first JSON array from a model reply.
pub fn extract_json_array(raw: &str) -> Result<Value, String> {
    extract_delimited(raw, '[', ']')
}

fn extract_delimited(raw: &str, open: char, close: char) -> Result<Value, String> {
    let start = raw
        .find(open)
        .ok_or_else(|| format!("no `{open}` in model output"))?;
    let end = raw
        .rfind(close)
        .ok_or_else(|| format!("no `{close}` in model output"))?;
    if end < start {
        return Err("mismatched JSON delimiters in model output".into());
    }
    serde_json::from_str(&raw[start..=end]).map_err(|e| format!("invalid JSON: {e}"))
}
