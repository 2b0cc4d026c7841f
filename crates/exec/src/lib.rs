//! Command handling for the coldwire gateway: classifying raw command
//! text as shell-vs-agent, and running the result as a child process
//! with streamed output.

pub mod classify;
pub mod process;

pub use {
    classify::{Classification, classify},
    process::{Executor, OutputStream, ProcessEvent, ProcessHandle, SpawnError},
};
