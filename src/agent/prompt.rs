//! Prompt construction for one task run.

use std::fmt::Write;

use super::RunContext;
use crate::tasks::TaskDefinition;

/// System instructions: the task's own prompt, what it must produce, the tool
/// catalog and the run context.
pub fn system_prompt(def: &TaskDefinition, ctx: &RunContext, tool_catalog: &str) -> String {
    let mut out = String::new();
    out.push_str(def.system_prompt.trim());
    out.push_str("\n\n");

    if !def.output_description.is_empty() {
        let _ = writeln!(out, "## Expected Output\n{}", def.output_description);
        if !def.saves_to.is_empty() {
            let _ = writeln!(out, "\nSaves to: {}", def.saves_to);
        }
        out.push('\n');
    }

    if !def.validation_checks.is_empty() {
        out.push_str("## Validation Checklist\nBefore finishing, confirm that:\n");
        for check in &def.validation_checks {
            let _ = writeln!(out, "- {}", check);
        }
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "## Memory Tools Available\nYou have access to memory tools to read your input and write your output:\n{}\n",
        tool_catalog
    );

    let _ = writeln!(out, "## Context\n- Project ID: {}", ctx.project_id);
    let _ = writeln!(
        out,
        "- Chapter ID: {}",
        ctx.unit_id.as_deref().unwrap_or("N/A (project-level agent)")
    );

    out.push_str(
        "\n## Instructions\n\
         1. FIRST, use memory_read_learnings to read your learnings file\n\
         2. Then, use the appropriate read tools to get your input data\n\
         3. Perform your task as described above\n\
         4. Use write tools to save your output to memory\n\
         5. If you learn something valuable, use memory_append_learnings to save it\n\
         6. End with a brief summary of what you accomplished\n",
    );
    out
}

/// First user message of the conversation.
pub fn initial_message(def: &TaskDefinition, ctx: &RunContext) -> String {
    let mut msg = format!("You are the {} agent.\n\n", def.name);
    if !def.purpose.is_empty() {
        let _ = writeln!(msg, "Your purpose: {}\n", def.purpose);
    }
    if !def.input_description.is_empty() {
        let _ = writeln!(msg, "Your input:\n{}\n", def.input_description);
    }

    msg.push_str(
        "Your task:\n\
         1. Read your learnings and the existing book context using the memory read tools\n\
         2. Read your input data from memory using the appropriate read tools\n\
         3. Perform your analysis/transformation\n\
         4. Write your output using the appropriate write tools\n\
         5. Summarize what you did\n\n",
    );

    let _ = writeln!(msg, "Project ID: {}", ctx.project_id);
    if let Some(unit_id) = &ctx.unit_id {
        let _ = writeln!(msg, "Chapter ID: {}", unit_id);
    }
    if let Some(extra) = &ctx.extra_context {
        let _ = writeln!(msg, "\nAdditional Context:\n{}", extra);
    }

    msg.push_str("\nBegin by reading your learnings, then proceed with your task.");
    msg
}
