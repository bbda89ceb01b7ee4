pub mod artifacts;
pub mod classify;
pub mod config;
pub mod engine;
pub mod harness;
pub mod interpreter;
pub mod metrics;


pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use config::EngineConfig;
pub use engine::ExecutionEngine;
pub use interpreter::{Interpreter, InterpreterFactory, SubprocessFactory};
