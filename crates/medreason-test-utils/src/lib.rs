//! Test fixtures shared across medreason crates.
//!
//! - [`harmony`]: channel-tagged model outputs
//! - [`checkpoint`]: a tiny on-disk qwen2 checkpoint plus LoRA adapter
//! - [`stubs`]: answer generators and loaders for service and HTTP tests

pub mod checkpoint;
pub mod harmony;
pub mod stubs;
