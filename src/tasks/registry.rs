//! Phase → task registry.
//!
//! The registry is the typed half of the task catalog: which tasks exist, in
//! which phase, at which granularity and after which siblings. It is built
//! once at startup and never mutated.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry has no phases")]
    Empty,

    #[error("phases must be contiguous from 1: expected phase {expected}, found {found}")]
    NonContiguous { expected: u32, found: u32 },

    #[error("task {task} is listed under phase {listed} but declares phase {declared}")]
    PhaseMismatch {
        task: String,
        listed: u32,
        declared: u32,
    },

    #[error("task {0} is registered more than once")]
    DuplicateTask(String),

    #[error("task {0} depends on itself")]
    SelfDependency(String),

    #[error("task {task} in phase {phase} depends on unknown task {dependency}")]
    UnknownDependency {
        task: String,
        phase: u32,
        dependency: String,
    },
}

/// Static registry entry for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskConfig {
    pub name: String,
    pub phase: u32,
    /// Run once per sub-unit (chapter) instead of once per project.
    pub is_unit_level: bool,
    /// Same-phase tasks that must have finished first.
    pub depends_on: Vec<String>,
}

impl TaskConfig {
    /// A task that runs once for the whole project.
    pub fn project(name: &str, phase: u32) -> Self {
        Self {
            name: name.to_string(),
            phase,
            is_unit_level: false,
            depends_on: Vec::new(),
        }
    }

    /// A task that runs once per sub-unit.
    pub fn unit(name: &str, phase: u32) -> Self {
        Self {
            is_unit_level: true,
            ..Self::project(name, phase)
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Validated mapping from phase number to its ordered task list.
///
/// Guarantees: phases are `1..=N` without gaps, task names are unique across
/// the registry, and every dependency names another task of the same phase.
/// Dependency cycles are not rejected here; the scheduler reports them when
/// the phase runs.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: BTreeMap<u32, Vec<TaskConfig>>,
}

impl PhaseRegistry {
    pub fn new(phases: BTreeMap<u32, Vec<TaskConfig>>) -> Result<Self, RegistryError> {
        if phases.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (expected, (&phase, tasks)) in (1u32..).zip(&phases) {
            if phase != expected {
                return Err(RegistryError::NonContiguous {
                    expected,
                    found: phase,
                });
            }

            let names: HashSet<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
            for task in tasks {
                if task.phase != phase {
                    return Err(RegistryError::PhaseMismatch {
                        task: task.name.clone(),
                        listed: phase,
                        declared: task.phase,
                    });
                }
                if !seen.insert(task.name.as_str()) {
                    return Err(RegistryError::DuplicateTask(task.name.clone()));
                }
                for dep in &task.depends_on {
                    if dep == &task.name {
                        return Err(RegistryError::SelfDependency(task.name.clone()));
                    }
                    if !names.contains(dep.as_str()) {
                        return Err(RegistryError::UnknownDependency {
                            task: task.name.clone(),
                            phase,
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { phases })
    }

    /// The eleven-phase book transformation pipeline.
    pub fn book() -> Result<Self, RegistryError> {
        use TaskConfig as T;

        let phases = BTreeMap::from([
            // Prep
            (
                1,
                vec![
                    T::project("format_converter", 1),
                    T::project("chapter_splitter", 1).after(&["format_converter"]),
                    T::project("structure_analyzer", 1).after(&["chapter_splitter"]),
                    T::project("style_guide_creator", 1).after(&["chapter_splitter"]),
                    T::project("relationship_mapper", 1).after(&["structure_analyzer"]),
                ],
            ),
            // Analysis
            (
                2,
                vec![
                    T::unit("tactic_extractor", 2),
                    T::unit("story_extractor", 2),
                    T::unit("quote_extractor", 2),
                    T::unit("content_categorizer", 2).after(&["tactic_extractor"]),
                    T::unit("cross_ref_identifier", 2).after(&["content_categorizer"]),
                    T::project("duplicate_detector", 2).after(&["tactic_extractor"]),
                ],
            ),
            // Transform
            (
                3,
                vec![
                    T::unit("tactic_transformer", 3),
                    T::unit("story_transformer", 3),
                    T::unit("script_adapter", 3),
                    T::unit("roofing_context_enricher", 3),
                    T::project("glossary_builder", 3),
                ],
            ),
            // Writing
            (
                4,
                vec![
                    T::unit("chapter_outliner", 4),
                    T::unit("section_writer", 4).after(&["chapter_outliner"]),
                    T::unit("transition_writer", 4).after(&["section_writer"]),
                    T::unit("example_generator", 4).after(&["section_writer"]),
                    T::unit("summary_writer", 4).after(&["section_writer"]),
                    T::unit("takeaways_writer", 4).after(&["summary_writer"]),
                    T::unit("chapter_title_generator", 4).after(&["section_writer"]),
                    T::unit("cross_ref_inserter", 4).after(&["section_writer"]),
                ],
            ),
            // Visual
            (
                5,
                vec![
                    T::unit("visual_opportunity_identifier", 5),
                    T::unit("diagram_specifier", 5).after(&["visual_opportunity_identifier"]),
                    T::unit("diagram_code_generator", 5).after(&["diagram_specifier"]),
                    T::unit("diagram_placer", 5).after(&["diagram_code_generator"]),
                    T::unit("caption_writer", 5).after(&["diagram_placer"]),
                    T::unit("callout_generator", 5),
                ],
            ),
            // Editing
            (
                6,
                vec![
                    T::unit("grammar_checker", 6),
                    T::unit("tone_consistency_checker", 6),
                    T::unit("term_consistency_checker", 6),
                    T::unit("fact_checker", 6),
                    T::unit("flow_checker", 6),
                    T::unit("clarity_editor", 6),
                    T::unit("originality_checker", 6),
                    T::unit("reading_level_analyzer", 6),
                    T::unit("script_formatter", 6),
                ],
            ),
            // Quality
            (
                7,
                vec![
                    T::unit("chapter_quality_scorer", 7),
                    T::project("quality_scorer", 7),
                ],
            ),
            // Translation prep
            (
                8,
                vec![
                    T::project("spanish_style_guide_creator", 8),
                    T::project("terminology_translator", 8),
                ],
            ),
            // Translation
            (
                9,
                vec![
                    T::unit("chapter_translator", 9),
                    T::unit("diagram_text_translator", 9),
                    T::unit("spanish_naturalizer", 9).after(&["chapter_translator"]),
                    T::unit("spanish_proofreader", 9).after(&["spanish_naturalizer"]),
                ],
            ),
            // Assembly
            (
                10,
                vec![
                    T::project("front_matter_writer", 10),
                    T::project("back_matter_writer", 10),
                    T::project("toc_generator", 10),
                    T::project("index_generator", 10),
                    T::project("structure_assembler", 10),
                ],
            ),
            // Output
            (
                11,
                vec![
                    T::project("pdf_formatter", 11),
                    T::project("kindle_formatter", 11),
                    T::project("metadata_generator", 11),
                    T::project("book_blurb_writer", 11),
                ],
            ),
        ]);

        Self::new(phases)
    }

    /// Tasks of `phase` in declaration order, or `None` for an unknown phase.
    pub fn phase(&self, phase: u32) -> Option<&[TaskConfig]> {
        self.phases.get(&phase).map(Vec::as_slice)
    }

    /// All phases in increasing order.
    pub fn phases(&self) -> impl Iterator<Item = (u32, &[TaskConfig])> {
        self.phases.iter().map(|(n, tasks)| (*n, tasks.as_slice()))
    }

    pub fn find(&self, name: &str) -> Option<&TaskConfig> {
        self.phases.values().flatten().find(|t| t.name == name)
    }

    pub fn first_phase(&self) -> u32 {
        1
    }

    pub fn last_phase(&self) -> u32 {
        self.phases.len() as u32
    }

    pub fn task_count(&self) -> usize {
        self.phases.values().map(Vec::len).sum()
    }
}
