//! Task catalog: the validated phase registry and the text specifications
//! that tell each task what to do.

mod definition;
mod library;
mod registry;

pub use definition::{DefinitionError, TaskDefinition};
pub use library::{phase_directory, PromptLibrary};
pub use registry::{PhaseRegistry, RegistryError, TaskConfig};
