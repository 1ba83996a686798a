use crate::models::TradeOpinion;
use crate::{Result, TradeError};

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence if present.
///
/// Text outside the first fenced block is discarded; unfenced text is only
/// trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_ticks = &trimmed[start + 3..];
    // Skip an info string such as `json` up to the end of that line.
    let body_start = after_ticks
        .find('\n')
        .filter(|&nl| {
            after_ticks[..nl]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        })
        .map(|nl| nl + 1)
        .unwrap_or_else(|| {
            after_ticks
                .strip_prefix("json")
                .map(|_| 4)
                .unwrap_or(0)
        });
    let body = &after_ticks[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parse a model reply into an opinion.
pub fn parse_opinion(text: &str) -> Result<TradeOpinion> {
    let json = strip_code_fence(text);
    serde_json::from_str(json).map_err(|e| {
        let preview: String = json.chars().take(200).collect();
        TradeError::MalformedOutput(format!("{} (raw: {})", e, preview))
    })
}
