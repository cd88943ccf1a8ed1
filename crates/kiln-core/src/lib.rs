#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core of the kiln dev server.
//!
//! Request direction: [`pipeline`] resolves a path, runs the plugin chain and
//! the [`transform::UniversalTransformer`], then rewrites imports.
//!
//! Edit direction: [`orchestrator`] drives the [`graph`], clears transformer
//! caches for every affected file and queues updates on the [`hmr`] throttle.

pub mod compiler;
pub mod config;
pub mod framework;
pub mod graph;
pub mod hmr;
pub mod orchestrator;
pub mod pipeline;
pub mod transform;

pub use config::{ConfigChange, KilnConfig};
pub use framework::{FrameworkTag, PackageVersions};
pub use graph::{DependencyGraph, ImportGraph};
pub use hmr::{HmrMessage, HmrThrottle, ThrottleConfig, UpdateKind};
pub use orchestrator::{ChangeOrchestrator, FileChangeEvent};
pub use pipeline::{ModulePipeline, ModuleRequest, ModuleResponse, PipelineError};
pub use transform::{TransformRequest, TransformResult, UniversalTransformer};

/// Crate version, reported by `kiln version` and the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
