//! Request lifecycle core of the command portal: who may run which API,
//! how submissions become queued jobs, and how finished results are read back.

pub mod access;
pub mod models;
pub mod portal;
pub mod queue;
pub mod registry;
pub mod results;
pub mod runtime;
pub mod store;
pub mod time;
