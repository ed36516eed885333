//! Template resolution for step inputs.
//!
//! Substitutes `{{name}}` placeholders from a name→value map. Resolution
//! never fails: unresolved placeholders are replaced by the empty string.
//! The engine pre-populates the loop-aware variables for runs that have
//! stories before rendering.

use std::collections::BTreeMap;

use crate::models::story::{Story, StoryStatus};

/// Replace every `{{name}}` occurrence with its value, or the empty string.
pub fn resolve(template: &str, vars: &BTreeMap<String, String>) -> String {
    let re = regex::Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
    re.replace_all(template, |caps: &regex::Captures| {
        vars.get(&caps[1]).cloned().unwrap_or_default()
    })
    .to_string()
}

/// Insert the loop-aware variables for a run that has stories.
///
/// `current` is the story the loop step is working on (or holding for
/// verification); `progress` is the workspace bridge's injection.
pub fn insert_loop_vars(
    vars: &mut BTreeMap<String, String>,
    stories: &[Story],
    current: Option<&Story>,
    progress: &str,
) {
    if let Some(story) = current {
        vars.insert("current_story".to_string(), format_story_block(story));
        vars.insert("current_story_id".to_string(), story.story_id.clone());
        vars.insert("current_story_title".to_string(), story.title.clone());
    }

    let completed = stories
        .iter()
        .filter(|s| s.status == StoryStatus::Done)
        .map(|s| format!("- {}: {}", s.story_id, s.title))
        .collect::<Vec<_>>()
        .join("\n");
    vars.insert("completed_stories".to_string(), completed);

    let remaining = stories
        .iter()
        .filter(|s| s.status == StoryStatus::Pending)
        .count();
    vars.insert("stories_remaining".to_string(), remaining.to_string());

    vars.insert("progress".to_string(), progress.to_string());
}

/// Format one story as the `{{current_story}}` block: id, title,
/// description, numbered acceptance criteria.
fn format_story_block(story: &Story) -> String {
    let mut block = format!("{}: {}", story.story_id, story.title);
    if !story.description.is_empty() {
        block.push('\n');
        block.push_str(&story.description);
    }
    if !story.acceptance_criteria.is_empty() {
        block.push_str("\n\nAcceptance criteria:");
        for (i, criterion) in story.acceptance_criteria.iter().enumerate() {
            block.push_str(&format!("\n{}. {}", i + 1, criterion));
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn story(id: &str, title: &str, status: StoryStatus) -> Story {
        Story {
            id: format!("row-{id}"),
            run_id: "run-1".to_string(),
            story_index: 0,
            story_id: id.to_string(),
            title: title.to_string(),
            description: "As a user I want things".to_string(),
            acceptance_criteria: vec!["it works".to_string(), "it is tested".to_string()],
            status,
            output: None,
            retry_count: 0,
            max_retries: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_substitutes_and_blanks() {
        let mut vars = BTreeMap::new();
        vars.insert("task".to_string(), "add login".to_string());

        assert_eq!(resolve("Do: {{task}}", &vars), "Do: add login");
        assert_eq!(resolve("Do: {{ task }}", &vars), "Do: add login");
        assert_eq!(resolve("Missing: [{{nope}}]", &vars), "Missing: []");
        assert_eq!(resolve("No placeholders", &vars), "No placeholders");
    }

    #[test]
    fn test_loop_vars() {
        let done = story("US-001", "First", StoryStatus::Done);
        let current = story("US-002", "Second", StoryStatus::Running);
        let pending = story("US-003", "Third", StoryStatus::Pending);
        let stories = vec![done, current.clone(), pending];

        let mut vars = BTreeMap::new();
        insert_loop_vars(&mut vars, &stories, Some(&current), "half way there");

        assert_eq!(vars["current_story_id"], "US-002");
        assert_eq!(vars["current_story_title"], "Second");
        assert!(vars["current_story"].starts_with("US-002: Second"));
        assert!(vars["current_story"].contains("1. it works"));
        assert!(vars["current_story"].contains("2. it is tested"));
        assert_eq!(vars["completed_stories"], "- US-001: First");
        assert_eq!(vars["stories_remaining"], "1");
        assert_eq!(vars["progress"], "half way there");
    }

    #[test]
    fn test_loop_vars_without_current() {
        let stories = vec![story("US-001", "First", StoryStatus::Done)];
        let mut vars = BTreeMap::new();
        insert_loop_vars(&mut vars, &stories, None, "(no progress yet)");

        assert!(!vars.contains_key("current_story_id"));
        assert_eq!(resolve("[{{current_story_id}}]", &vars), "[]");
        assert_eq!(vars["stories_remaining"], "0");
    }
}
