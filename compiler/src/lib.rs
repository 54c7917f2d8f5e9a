// amc — Actor Machine Compiler backend
//
// Library root. Loads a network of scheduled actor machines, allocates its
// channels, synthesizes one resumable controller per instance and emits C or
// HLS source.

pub mod am;
pub mod channel;
pub mod codegen;
pub mod condition;
pub mod controller;
pub mod ctl;
pub mod diag;
pub mod dot;
pub mod emit;
pub mod expr;
pub mod fifo;
pub mod hls;
pub mod id;
pub mod liveness;
pub mod network;
pub mod pass;
pub mod pattern;
pub mod pipeline;
pub mod settings;
pub mod sim;
