//! Suzume is a small, object-oriented, dynamically typed scripting language
//! with classes, closures, cooperative fibers and a mark-and-sweep heap.
//!
//! Source text compiles in a single pass to stack bytecode, which runs in a
//! bytecode interpreter; see [`Suzume`] for the embedding surface.

mod builtins;
mod compile;
mod heap;
mod object;
mod op;
mod public;
mod symbol;
mod value;
mod vm;

pub use diag::{Category, Report, Result};
pub use public::Suzume;
pub use value::Value;
pub use vm::{FileLoader, ModuleLoader, Output};
