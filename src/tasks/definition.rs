//! Task definitions parsed from markdown specification files.
//!
//! A specification is a markdown document with `## ` sections:
//!
//! ````text
//! # Tactic Extractor
//! ## Purpose
//! Extract actionable tactics from a chapter.
//! ## Input
//! ...
//! ## Output
//! ...
//! **Saves to**: tactics table
//! ## System Prompt
//! ```
//! You are ...
//! ```
//! ## Validation
//! - [ ] Every tactic has a source quote
//! ## Dependencies
//! **Needs**: chapter_splitter, structure_analyzer
//! ````

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while locating or parsing a task specification.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid phase number: {0}")]
    InvalidPhase(u32),

    #[error("specification not found for task {task} (expected at {path})")]
    NotFound { task: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed specification for task {task}: {reason}")]
    Malformed { task: String, reason: String },

    #[error("missing specifications: {}", .0.join(", "))]
    MissingSpecifications(Vec<String>),
}

/// Immutable definition of one task, loaded right before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDefinition {
    pub name: String,
    pub phase: u32,
    pub purpose: String,
    pub system_prompt: String,
    pub input_description: String,
    pub output_description: String,
    pub saves_to: String,
    pub validation_checks: Vec<String>,
    pub depends_on: Vec<String>,
    pub source: PathBuf,
}

impl TaskDefinition {
    /// Parse a specification document.
    ///
    /// The system prompt section with a fenced block is mandatory; every
    /// other section defaults to empty.
    pub fn parse(
        name: &str,
        phase: u32,
        content: &str,
        source: PathBuf,
    ) -> Result<Self, DefinitionError> {
        let malformed = |reason: &str| DefinitionError::Malformed {
            task: name.to_string(),
            reason: reason.to_string(),
        };

        let system_section =
            raw_section(content, "System Prompt").ok_or_else(|| malformed("no `## System Prompt` section"))?;
        let system_prompt = fenced_block(&system_section)
            .ok_or_else(|| malformed("system prompt is not inside a fenced block"))?;
        if system_prompt.is_empty() {
            return Err(malformed("system prompt is empty"));
        }

        Ok(Self {
            name: name.to_string(),
            phase,
            purpose: section(content, "Purpose"),
            system_prompt,
            input_description: section(content, "Input"),
            output_description: section(content, "Output"),
            saves_to: saves_to(content),
            validation_checks: validation_checks(content),
            depends_on: dependencies(content),
            source,
        })
    }
}

fn heading(line: &str) -> Option<&str> {
    line.strip_prefix("## ").map(str::trim)
}

/// Lines of a `## <title>` section up to the next `## ` heading.
fn raw_section(content: &str, title: &str) -> Option<String> {
    let mut lines = content.lines();
    lines.find(|line| heading(line).is_some_and(|h| h.eq_ignore_ascii_case(title)))?;
    let body: Vec<&str> = lines.take_while(|line| heading(line).is_none()).collect();
    Some(body.join("\n"))
}

/// Section prose, stopping at a horizontal rule as well as the next heading.
fn section(content: &str, title: &str) -> String {
    raw_section(content, title)
        .map(|body| {
            body.lines()
                .take_while(|line| line.trim() != "---")
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .unwrap_or_default()
}

/// Content of the first ``` fenced block. The language tag line is skipped.
fn fenced_block(section: &str) -> Option<String> {
    let mut lines = section.lines();
    lines.find(|line| line.trim_start().starts_with("```"))?;
    let mut body = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            return Some(body.join("\n").trim().to_string());
        }
        body.push(line);
    }
    None
}

fn saves_to(content: &str) -> String {
    content
        .lines()
        .find(|line| line.contains("**Saves to**:") || line.contains("Saves to:"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default()
}

fn validation_checks(content: &str) -> Vec<String> {
    let Some(body) = raw_section(content, "Validation") else {
        return Vec::new();
    };
    body.lines()
        .filter(|line| line.contains("- [ ]") || line.contains("- [x]"))
        .map(|line| line.replace("- [ ]", "").replace("- [x]", "").trim().to_string())
        .filter(|check| !check.is_empty())
        .collect()
}

fn dependencies(content: &str) -> Vec<String> {
    let Some(body) = raw_section(content, "Dependencies") else {
        return Vec::new();
    };
    body.lines()
        .find(|line| line.contains("**Needs**:"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, deps)| {
            deps.split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("none"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"# Content Categorizer

## Purpose
Categorize every tactic extracted from a chapter.

---

## Input
- Tactics for the chapter (memory_read_tactics)

## Output
Updated tactic categories.

**Saves to**: tactics table (category column)

## System Prompt

```markdown
You are a content categorizer.
Assign each tactic exactly one category.
```

## Validation
- [ ] Every tactic has a category
- [x] No category outside the taxonomy
- [ ]

## Dependencies
**Needs**: tactic_extractor, quote_extractor
"#;

    #[test]
    fn test_parse_full_specification() {
        let def = TaskDefinition::parse("content_categorizer", 2, SPEC, PathBuf::from("x.md")).unwrap();

        assert_eq!(def.purpose, "Categorize every tactic extracted from a chapter.");
        assert_eq!(
            def.system_prompt,
            "You are a content categorizer.\nAssign each tactic exactly one category."
        );
        assert_eq!(def.input_description, "- Tactics for the chapter (memory_read_tactics)");
        assert!(def.output_description.starts_with("Updated tactic categories."));
        assert_eq!(def.saves_to, "tactics table (category column)");
        assert_eq!(
            def.validation_checks,
            vec!["Every tactic has a category", "No category outside the taxonomy"]
        );
        assert_eq!(def.depends_on, vec!["tactic_extractor", "quote_extractor"]);
    }

    #[test]
    fn test_missing_system_prompt_is_malformed() {
        let err = TaskDefinition::parse("x", 1, "## Purpose\nDo it.\n", PathBuf::new()).unwrap_err();
        assert!(matches!(err, DefinitionError::Malformed { .. }));
    }

    #[test]
    fn test_unterminated_fence_is_malformed() {
        let content = "## System Prompt\n```\nYou are...\n";
        let err = TaskDefinition::parse("x", 1, content, PathBuf::new()).unwrap_err();
        assert!(err.to_string().contains("fenced block"));
    }

    #[test]
    fn test_optional_sections_default_to_empty() {
        let content = "## System Prompt\n```\nDo the work.\n```\n## Dependencies\n**Needs**: None\n";
        let def = TaskDefinition::parse("x", 3, content, PathBuf::new()).unwrap();
        assert!(def.purpose.is_empty());
        assert!(def.validation_checks.is_empty());
        assert!(def.depends_on.is_empty());
        assert!(def.saves_to.is_empty());
    }
}
