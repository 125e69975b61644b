//! Structured diagnostics for the PyHDL compiler
//!
//! Every failure or warning is a `Diagnostic` record carrying the module
//! it belongs to, the entity (signal, port, instance) it concerns when one
//! is known, and a human-readable message. Errors abort the enclosing
//! module's emission; warnings never do. Sibling modules in the same
//! compilation keep going.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// Diagnostic classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Input text is not syntactically valid
    Parse,
    /// Two modules, enums, parameters, or signals share a name in one scope
    DuplicateDefinition,
    /// A name is used with no binding
    UndeclaredName,
    /// A width, slice bound, or loop bound is not a compile-time constant
    NonStaticExpression,
    /// A `for` iterates something other than `range(...)`
    NonStaticLoop,
    /// A signal is driven both combinationally and sequentially, or under
    /// disagreeing edge sets
    MixedStorageClass,
    /// A constant index lies outside a signal's declared range
    IndexOutOfBounds,
    /// RHS width disagrees with the lvalue width (warning)
    WidthMismatch,
    /// A submodule wiring assignment names a port the module does not have
    UnknownPort,
    /// A submodule input port was never wired (warning)
    UnconnectedPort,
    /// A combinational signal is conditionally assigned with no preceding
    /// default (warning)
    MissingDefault,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Parse => "ParseError",
            DiagnosticKind::DuplicateDefinition => "DuplicateDefinition",
            DiagnosticKind::UndeclaredName => "UndeclaredName",
            DiagnosticKind::NonStaticExpression => "NonStaticExpression",
            DiagnosticKind::NonStaticLoop => "NonStaticLoop",
            DiagnosticKind::MixedStorageClass => "MixedStorageClass",
            DiagnosticKind::IndexOutOfBounds => "IndexOutOfBounds",
            DiagnosticKind::WidthMismatch => "WidthMismatch",
            DiagnosticKind::UnknownPort => "UnknownPort",
            DiagnosticKind::UnconnectedPort => "UnconnectedPort",
            DiagnosticKind::MissingDefault => "MissingDefault",
        };
        f.write_str(name)
    }
}

/// One structured diagnostic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    /// Module the diagnostic is attached to, when known
    pub module: Option<String>,
    /// Signal, port, or instance the diagnostic concerns, when known
    pub entity: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            module: None,
            entity: None,
            message: message.into(),
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            module: None,
            entity: None,
            message: message.into(),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "[{}] ", module)?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors that abort elaboration of a single module
#[derive(Debug, Clone, Error)]
pub enum ElabError {
    #[error("duplicate definition of `{0}`")]
    DuplicateDefinition(String),

    #[error("undeclared name `{0}`")]
    UndeclaredName(String),

    #[error("{0}")]
    NonStaticExpression(String),

    #[error("`for` loops must iterate over `range(...)`")]
    NonStaticLoop,

    #[error("signal `{signal}` is driven as {first} and as {second}")]
    MixedStorageClass {
        signal: String,
        first: String,
        second: String,
    },

    #[error("index {index} is out of bounds for `{base}` (valid range 0..{limit})")]
    IndexOutOfBounds {
        base: String,
        index: i64,
        limit: u32,
    },

    #[error("module `{module}` has no port `{port}`")]
    UnknownPort { module: String, port: String },

    #[error("output port `{port}` of `{module}` cannot be driven; read it into a signal instead")]
    OutputPortDriven { module: String, port: String },
}

impl ElabError {
    /// The taxonomy bucket this error reports under
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            ElabError::DuplicateDefinition(_) => DiagnosticKind::DuplicateDefinition,
            ElabError::UndeclaredName(_) => DiagnosticKind::UndeclaredName,
            ElabError::NonStaticExpression(_) => DiagnosticKind::NonStaticExpression,
            ElabError::NonStaticLoop => DiagnosticKind::NonStaticLoop,
            ElabError::MixedStorageClass { .. } => DiagnosticKind::MixedStorageClass,
            ElabError::IndexOutOfBounds { .. } => DiagnosticKind::IndexOutOfBounds,
            ElabError::UnknownPort { .. } | ElabError::OutputPortDriven { .. } => {
                DiagnosticKind::UnknownPort
            }
        }
    }

    /// The signal, port, or name the error concerns, when one is carried
    pub fn entity(&self) -> Option<String> {
        match self {
            ElabError::DuplicateDefinition(name) | ElabError::UndeclaredName(name) => {
                Some(name.clone())
            }
            ElabError::MixedStorageClass { signal, .. } => Some(signal.clone()),
            ElabError::IndexOutOfBounds { base, .. } => Some(base.clone()),
            ElabError::UnknownPort { port, .. } | ElabError::OutputPortDriven { port, .. } => {
                Some(port.clone())
            }
            _ => None,
        }
    }
}
