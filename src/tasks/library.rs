//! Locates task specification files on disk.

use std::path::{Path, PathBuf};

use super::definition::{DefinitionError, TaskDefinition};
use super::registry::PhaseRegistry;

const PHASE_DIRECTORIES: [&str; 11] = [
    "phase_01_prep",
    "phase_02_analysis",
    "phase_03_transform",
    "phase_04_writing",
    "phase_05_visual",
    "phase_06_editing",
    "phase_07_quality",
    "phase_08_translation_prep",
    "phase_09_translation",
    "phase_10_assembly",
    "phase_11_output",
];

/// Directory name holding the specifications of `phase`.
///
/// Phases past the named eleven use a bare `phase_NN` directory.
pub fn phase_directory(phase: u32) -> Result<String, DefinitionError> {
    match phase {
        0 => Err(DefinitionError::InvalidPhase(phase)),
        n => Ok(PHASE_DIRECTORIES
            .get(n as usize - 1)
            .map(|dir| dir.to_string())
            .unwrap_or_else(|| format!("phase_{:02}", n))),
    }
}

/// Prompt library rooted at a directory of `<phase_dir>/<task>.md` files.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    root: PathBuf,
}

impl PromptLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str, phase: u32) -> Result<PathBuf, DefinitionError> {
        Ok(self
            .root
            .join(phase_directory(phase)?)
            .join(format!("{}.md", name)))
    }

    /// Load and parse the specification of one task.
    pub async fn load(&self, name: &str, phase: u32) -> Result<TaskDefinition, DefinitionError> {
        let path = self.path_for(name, phase)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DefinitionError::NotFound {
                    task: name.to_string(),
                    path,
                })
            }
            Err(source) => return Err(DefinitionError::Io { path, source }),
        };
        tracing::debug!("Loaded specification for {} from {}", name, path.display());
        TaskDefinition::parse(name, phase, &content, path)
    }

    /// Check that every registered task has a specification file.
    pub async fn verify(&self, registry: &PhaseRegistry) -> Result<(), DefinitionError> {
        let mut missing = Vec::new();
        for (phase, tasks) in registry.phases() {
            for task in tasks {
                let path = self.path_for(&task.name, phase)?;
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    missing.push(format!("{} ({})", task.name, path.display()));
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::MissingSpecifications(missing))
        }
    }
}
