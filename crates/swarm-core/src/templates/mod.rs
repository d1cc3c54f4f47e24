//! Behavior templates
//!
//! Provides the static catalog of worker personas and loading of extra
//! templates from configuration files.

mod loader;
mod registry;
mod types;

pub use loader::load_templates;
pub use registry::{SYNTHESIZER_TEMPLATE_ID, TemplateRegistry};
pub use types::{BehaviorTemplate, TemplateFile};
