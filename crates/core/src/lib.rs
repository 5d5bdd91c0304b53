//! nyx-core: front end for the nyx binary data format language.
//!
//! A `.nyx` program is a collection of named rules, each with a byte
//! pattern, optional storage fields, and optional encode/decode/validate
//! s-expressions, grouped into emitted namespaces and reference modules.
//! This crate runs the full pipeline from source text to the
//! language-agnostic plan consumed by code-generator plugins:
//!
//! tokenizer -> concrete parser -> abstract lowerer -> registry -> planner
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`compile()`] -- run the whole pipeline over a set of input files
//! - [`Registry`] -- parsed trees plus the global FQN index
//! - [`Plan`] -- dependency-ordered rules per emitted namespace
//! - [`serialize()`] -- plan to the plugin's keyed JSON table
//! - [`Diagnostic`], [`DiagnosticSink`], [`Error`] -- failure reporting
//!
//! The pipeline is strictly sequential and single-threaded; each stage
//! completes before the next runs, and the plan owns its own entities
//! once built.

/// Front-end version.
pub const NYX_VERSION: &str = "0.0.2";

pub mod ast;
pub mod concrete;
pub mod error;
pub mod lower;
pub mod parser;
pub mod plan;
pub mod registry;
pub mod serialize;
pub mod source;
pub mod token;
pub mod tokenizer;

pub use error::{BufferSink, Diagnostic, DiagnosticSink, Error, Severity, StderrSink};
pub use plan::Plan;
pub use registry::Registry;
pub use serialize::serialize;
pub use source::{Filesystem, InMemoryProvider, SourceProvider};

/// Parse every input file (plus transitive imports and the built-in
/// module) into one registry and generate the plan.
pub fn compile(
    provider: &dyn SourceProvider,
    inputs: &[String],
    sink: &mut dyn DiagnosticSink,
) -> Result<Plan, Error> {
    let mut registry = Registry::new();
    for input in inputs {
        registry.parse(provider, input, sink)?;
    }
    plan::generate(&registry, sink)
}
