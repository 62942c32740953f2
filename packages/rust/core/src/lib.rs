//! Source discovery for FinSource.
//!
//! [`refine::RefinementLoop`] drives one company through search, judging,
//! and prompt refinement; [`batch::BatchCoordinator`] runs many of those
//! loops under a concurrency cap and collects one result per company.

pub mod batch;
pub mod decode;
pub mod hints;
pub mod prompt;
pub mod refine;

#[cfg(test)]
mod testing;

pub use batch::{BatchCoordinator, BatchOptions, BatchProgress, SilentProgress};
pub use prompt::{PromptBuilder, RefineStrategy};
pub use refine::{RefinementLoop, RefinementState};
