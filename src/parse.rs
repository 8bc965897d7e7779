//! Validation of model output. Nothing here trusts the gateway to have
//! followed its instructions.

use crate::models::{Description, DescriptionField};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

pub const MAX_OUTFITS: usize = 3;

// `OUTFIT 2:`, optionally bolded as `**OUTFIT 2:**`. When the bold run also
// covers a title (`**OUTFIT 2: Night Out**`) the closing `**` lands in the body.
static OUTFIT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\*\*)?OUTFIT\s+\d+\s*:(?:\*\*)?").expect("outfit marker regex"));

static LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•]\s+)?\**([A-Za-z][A-Za-z /&]{0,30}?)\**\s*:\s*\**\s*(\S.*?)\s*$")
        .expect("label line regex")
});

/// Splits generated text into outfit bodies, one per `OUTFIT <n>:` marker.
///
/// Text before the first marker is dropped, bodies are trimmed, empty bodies
/// are skipped and at most [`MAX_OUTFITS`] are returned. No marker at all
/// yields an empty vector.
pub fn split_outfits(raw: &str) -> Vec<String> {
    let markers: Vec<_> = OUTFIT_MARKER.find_iter(raw).collect();
    let mut bodies = Vec::with_capacity(MAX_OUTFITS);
    for (idx, marker) in markers.iter().enumerate() {
        let end = markers
            .get(idx + 1)
            .map(|next| next.start())
            .unwrap_or(raw.len());
        let body = raw[marker.end()..end].trim();
        let marker_text = marker.as_str();
        let body = if marker_text.starts_with("**") && !marker_text.ends_with("**") {
            close_title_emphasis(body)
        } else {
            body.to_string()
        };
        if body.is_empty() {
            continue;
        }
        bodies.push(body);
        if bodies.len() == MAX_OUTFITS {
            break;
        }
    }
    bodies
}

/// Removes the first `**` on the title line, left open by the marker.
fn close_title_emphasis(body: &str) -> String {
    let (title, rest) = body.split_once('\n').unwrap_or((body, ""));
    let title = title.replacen("**", "", 1);
    let title = title.trim();
    let rest = rest.trim();
    match (title.is_empty(), rest.is_empty()) {
        (_, true) => title.to_string(),
        (true, false) => rest.to_string(),
        (false, false) => format!("{title}\n{rest}"),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemListError {
    #[error("expected a JSON array of strings: {0}")]
    NotAnArray(String),
    #[error("item list is empty")]
    Empty,
    #[error("item list contains a blank entry")]
    BlankItem,
}

/// Parses the extractor's reply as a JSON array of item strings.
///
/// One surrounding markdown code fence is tolerated; anything else that is
/// not a non-empty array of non-blank strings is rejected.
pub fn parse_item_list(raw: &str) -> Result<Vec<String>, ItemListError> {
    let body = strip_code_fence(raw.trim());
    let items: Vec<String> =
        serde_json::from_str(body).map_err(|err| ItemListError::NotAnArray(err.to_string()))?;
    if items.is_empty() {
        return Err(ItemListError::Empty);
    }
    items
        .into_iter()
        .map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                Err(ItemListError::BlankItem)
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    // drop the info string (`json`) on the opening line
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}

/// Decides how an outfit description is rendered.
///
/// A JSON object of scalar values, or two or more `Label: value` lines, becomes
/// [`Description::StructuredFields`]; anything else is free text.
pub fn classify_description(text: &str) -> Description {
    if let Some(fields) = json_fields(text) {
        return Description::StructuredFields(fields);
    }
    if let Some(fields) = labeled_lines(text) {
        return Description::StructuredFields(fields);
    }
    Description::FreeText(text.to_string())
}

fn json_fields(text: &str) -> Option<Vec<DescriptionField>> {
    let Value::Object(map) = serde_json::from_str::<Value>(text.trim()).ok()? else {
        return None;
    };
    if map.is_empty() {
        return None;
    }
    map.into_iter()
        .map(|(label, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some(DescriptionField { label, value })
        })
        .collect()
}

fn labeled_lines(text: &str) -> Option<Vec<DescriptionField>> {
    let fields = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let caps = LABEL_LINE.captures(line)?;
            Some(DescriptionField {
                label: caps[1].trim().to_string(),
                value: caps[2].trim_end_matches('*').trim().to_string(),
            })
        })
        .collect::<Option<Vec<_>>>()?;
    (fields.len() >= 2).then_some(fields)
}
