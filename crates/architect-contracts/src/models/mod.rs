mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector, SelectionError};

pub const VISION_CAPABILITY: &str = "vision";
pub const TEXT_CAPABILITY: &str = "text";
