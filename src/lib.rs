#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod blueprint;
pub mod bundle;
mod cache;
pub mod config;
mod core;
mod error;
mod executor;
mod graph;
#[cfg(feature = "server")]
mod serve;
mod stage;
pub mod stages;
pub mod toolchain;
mod utils;
pub mod worker;
mod website;

pub use crate::bundle::{BundleBuilder, BundleSpec, OutputFormat};
pub use crate::cache::{CacheStats, CacheStore};
pub use crate::config::Config;
pub use crate::core::{Artifact, Hash32};
pub use crate::error::*;
pub use crate::executor::{BuildResult, Environment, TaskContext, TaskReport, execute};
pub use crate::graph::{Task, TaskGraph, TaskId};
pub use crate::stage::{StageOutput, TransformStage, expand_ordered, glob_base, matches_any};
pub use crate::toolchain::Toolchain;
pub use crate::utils::{clear_dir, init_logging, remove_dir};
pub use crate::website::Website;
pub use crate::worker::WorkerAssetAssembler;
