//! Core crate for flowcap: optical-flow extraction over video batches.

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod infer;
pub mod logging;
pub mod network;
pub mod pipeline;
pub mod quantize;
pub mod shape;
pub mod types;
pub mod video;
pub mod writer;
