//! Recipe parsing and model building.

mod engine;
mod recipe;

pub use engine::{BuildResult, ModelBuilder};
pub use recipe::{Command, Directive, Recipe};
