//! Parser for structured agent output.
//!
//! Agent output is free text with a loose `KEY: VALUE` convention. Three
//! line forms are recognized:
//!
//! - `STATUS: done|retry|blocked` — authoritative; absence means `done`.
//! - `UPPERCASE_KEY: value` — a context write (single line).
//! - `STORIES_JSON: [...]` — a span: everything from after the marker up to
//!   the next key line (or end of output) is parsed as a JSON array of
//!   story drafts.
//!
//! An `ISSUES:` span is harvested the same way but only kept when the
//! status is `retry`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::run::StepResultStatus;

/// Hard cap on one decomposition.
pub const MAX_STORIES: usize = 20;

/// A story as emitted in a `STORIES_JSON` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryDraft {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedOutput {
    pub status: StepResultStatus,
    /// Context writes, keys lowercased.
    pub context: BTreeMap<String, String>,
    pub stories: Option<Vec<StoryDraft>>,
    /// Verifier feedback; present only when `status` is `retry`.
    pub issues: Option<String>,
}

/// Split a line into `(KEY, rest)` when it matches the uppercase-key form.
fn key_line(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = &line[..colon];
    let mut chars = key.chars();
    let first = chars.next()?;
    if !(first.is_ascii_uppercase() || first == '_') {
        return None;
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    let rest = &line[colon + 1..];
    // value must be separated by whitespace; a bare "KEY:" at end of line
    // opens a span for the multi-line markers
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some((key, rest.trim_start()))
}

pub fn parse(output: &str) -> Result<ParsedOutput, CoreError> {
    let lines: Vec<&str> = output.lines().collect();
    let mut status: Option<StepResultStatus> = None;
    let mut context = BTreeMap::new();
    let mut stories_raw: Option<String> = None;
    let mut issues: Option<String> = None;

    let mut i = 0;
    while i < lines.len() {
        let Some((key, rest)) = key_line(lines[i]) else {
            i += 1;
            continue;
        };
        match key {
            "STATUS" => {
                let value = rest.trim();
                let parsed = StepResultStatus::from_str(value).ok_or_else(|| {
                    CoreError::Parse(format!(
                        "invalid STATUS value '{}', expected done|retry|blocked",
                        value
                    ))
                })?;
                if status.is_none() {
                    status = Some(parsed);
                }
                i += 1;
            }
            "STORIES_JSON" | "ISSUES" => {
                let mut buf = rest.to_string();
                let mut j = i + 1;
                while j < lines.len() && key_line(lines[j]).is_none() {
                    buf.push('\n');
                    buf.push_str(lines[j]);
                    j += 1;
                }
                if key == "STORIES_JSON" {
                    stories_raw = Some(buf);
                } else {
                    issues = Some(buf.trim().to_string());
                }
                i = j;
            }
            _ => {
                context.insert(key.to_ascii_lowercase(), rest.trim_end().to_string());
                i += 1;
            }
        }
    }

    let status = status.unwrap_or_default();
    let stories = match stories_raw {
        Some(raw) => Some(parse_stories(&raw)?),
        None => None,
    };

    Ok(ParsedOutput {
        status,
        context,
        stories,
        // harvested only for retry verdicts
        issues: if status == StepResultStatus::Retry {
            issues
        } else {
            None
        },
    })
}

fn parse_stories(raw: &str) -> Result<Vec<StoryDraft>, CoreError> {
    let drafts: Vec<StoryDraft> = serde_json::from_str(raw.trim())
        .map_err(|e| CoreError::Parse(format!("invalid STORIES_JSON: {}", e)))?;

    if drafts.len() > MAX_STORIES {
        return Err(CoreError::Parse(format!(
            "STORIES_JSON has {} entries, maximum is {}",
            drafts.len(),
            MAX_STORIES
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for draft in &drafts {
        if !seen.insert(draft.id.as_str()) {
            return Err(CoreError::Parse(format!(
                "STORIES_JSON has duplicate story id '{}'",
                draft.id
            )));
        }
        if draft.acceptance_criteria.is_empty() {
            return Err(CoreError::Parse(format!(
                "story '{}' has no acceptance criteria",
                draft.id
            )));
        }
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story_json(n: usize) -> String {
        let items: Vec<String> = (1..=n)
            .map(|i| {
                format!(
                    r#"{{"id":"US-{i}","title":"Story {i}","description":"d","acceptanceCriteria":["c1"]}}"#
                )
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn test_status_defaults_to_done() {
        let parsed = parse("all finished, nothing structured here").unwrap();
        assert_eq!(parsed.status, StepResultStatus::Done);
        assert!(parsed.context.is_empty());
        assert!(parsed.stories.is_none());
    }

    #[test]
    fn test_context_writes_lowercased() {
        let parsed = parse("BRANCH: feature/login\nPR_URL: http://x\nnot a key: ignored").unwrap();
        assert_eq!(parsed.context["branch"], "feature/login");
        assert_eq!(parsed.context["pr_url"], "http://x");
        assert_eq!(parsed.context.len(), 2);
    }

    #[test]
    fn test_stories_json_single_line() {
        let out = format!("STATUS: done\nSTORIES_JSON: {}", story_json(2));
        let parsed = parse(&out).unwrap();
        let stories = parsed.stories.unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].id, "US-1");
        assert_eq!(stories[1].title, "Story 2");
    }

    #[test]
    fn test_stories_json_spans_lines_until_next_key() {
        let out = "STORIES_JSON: [\n  {\"id\":\"US-1\",\"title\":\"T\",\"description\":\"d\",\n   \"acceptanceCriteria\":[\"c\"]}\n]\nBRANCH: main\n";
        let parsed = parse(out).unwrap();
        assert_eq!(parsed.stories.unwrap().len(), 1);
        assert_eq!(parsed.context["branch"], "main");
        assert!(!parsed.context.contains_key("stories_json"));
    }

    #[test]
    fn test_twenty_stories_accepted_twenty_one_rejected() {
        let ok = parse(&format!("STORIES_JSON: {}", story_json(20))).unwrap();
        assert_eq!(ok.stories.unwrap().len(), 20);

        let err = parse(&format!("STORIES_JSON: {}", story_json(21))).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.to_string().contains("maximum is 20"));
    }

    #[test]
    fn test_duplicate_story_id_rejected() {
        let out = r#"STORIES_JSON: [{"id":"US-1","title":"a","description":"d","acceptanceCriteria":["c"]},{"id":"US-1","title":"b","description":"d","acceptanceCriteria":["c"]}]"#;
        let err = parse(out).unwrap_err();
        assert!(err.to_string().contains("duplicate story id"));
    }

    #[test]
    fn test_empty_acceptance_criteria_rejected() {
        let out = r#"STORIES_JSON: [{"id":"US-1","title":"a","description":"d","acceptanceCriteria":[]}]"#;
        let err = parse(out).unwrap_err();
        assert!(err.to_string().contains("no acceptance criteria"));
    }

    #[test]
    fn test_issues_harvested_on_retry() {
        let parsed = parse("STATUS: retry\nISSUES: no tests\nstill no tests").unwrap();
        assert_eq!(parsed.status, StepResultStatus::Retry);
        assert_eq!(parsed.issues.as_deref(), Some("no tests\nstill no tests"));
    }

    #[test]
    fn test_issues_discarded_when_done() {
        let parsed = parse("STATUS: done\nISSUES: stale complaint").unwrap();
        assert_eq!(parsed.status, StepResultStatus::Done);
        assert!(parsed.issues.is_none());
        assert!(!parsed.context.contains_key("issues"));
    }

    #[test]
    fn test_invalid_status_rejected() {
        let err = parse("STATUS: maybe").unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_first_status_wins() {
        let parsed = parse("STATUS: retry\nISSUES: x\nSTATUS: done").unwrap();
        assert_eq!(parsed.status, StepResultStatus::Retry);
    }
}
