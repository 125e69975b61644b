//! PyHDL code generation
//!
//! This crate handles SystemVerilog emission from elaborated MIR. One
//! source unit is produced per emitted module; file naming is the
//! driver's concern.

pub mod systemverilog;

pub use systemverilog::{generate_module, generate_modules};
