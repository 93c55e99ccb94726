//! Stoker - keeps a render kernel warm across repeated invocations
//!
//! Stoker runs a small local daemon that holds an execution kernel alive
//! between renders, so the pipeline pays the kernel cold-start cost once
//! instead of on every invocation.

pub mod cli;
pub mod daemon;
pub mod error;
pub mod execute;
pub mod logging;

pub use error::{Result, StokerError};
