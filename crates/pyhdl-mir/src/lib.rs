//! PyHDL elaboration and mid-level IR
//!
//! Turns parsed `.phd` sources into MIR module descriptors: templates
//! monomorphized, loops unrolled, widths concrete, assignments classified.
//! The single-threaded batch pipeline shares one `Compilation` context per
//! input file; a fresh context is required for each compilation.

pub mod const_eval;
pub mod diagnostics;
pub mod elaborate;
pub mod mir;

pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use mir::Mir;

/// Outcome of compiling one source file
#[derive(Debug)]
pub struct CompileResult {
    /// Elaborated modules in emission order; failed modules are absent
    pub mir: Mir,
    /// Structured diagnostic stream, warnings and errors
    pub diagnostics: Vec<Diagnostic>,
    /// True when any module failed to compile
    pub failed: bool,
}

/// Parse and elaborate one PyHDL source text
pub fn compile_source(source: &str) -> CompileResult {
    match pyhdl_frontend::parse_source(source) {
        Ok(file) => {
            let compilation = elaborate::compile(&file);
            CompileResult {
                mir: Mir {
                    modules: compilation.modules,
                },
                diagnostics: compilation.diagnostics,
                failed: compilation.failed,
            }
        }
        Err(err) => CompileResult {
            mir: Mir::default(),
            diagnostics: vec![Diagnostic::error(DiagnosticKind::Parse, err.to_string())],
            failed: true,
        },
    }
}
