//! Error type shared by the whole engine.
//!
//! Every fallible operation in the core, the runtime and the compiler returns
//! a [`RuntimeError`] tagged with an [`ErrorKind`]. Errors raised inside the
//! interpreter get a source line attached at the instruction boundary, which
//! the CLI prefixes to the report.

use thiserror::Error;

/// Category of a user-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Undefined variable, duplicate local in a scope.
    Name,
    /// Operand kind mismatch, non-indexable type, no matching overload.
    Type,
    /// Value not convertible to the requested numeric type.
    Cast,
    /// Integer overflow, float overflow/underflow, division by zero.
    Math,
    /// Out-of-range access, empty-collection access, bad dimensionality.
    Index,
    /// Reference taken where not permitted.
    Reference,
    /// `throw`, failed `assert`, catch-all.
    Runtime,
    /// Malformed source text.
    Syntax,
    /// Broken VM invariant. Seeing one of these is a bug in Merle itself.
    Internal,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Name => "Name",
            ErrorKind::Type => "Type",
            ErrorKind::Cast => "Cast",
            ErrorKind::Math => "Math",
            ErrorKind::Index => "Index",
            ErrorKind::Reference => "Reference",
            ErrorKind::Runtime => "Runtime",
            ErrorKind::Syntax => "Syntax",
            ErrorKind::Internal => "Internal",
        }
    }
}

/// An error raised by the scanner, the compiler or the virtual machine.
#[derive(Debug, Clone, Error)]
#[error("[{} error] {message}", kind.label())]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based source line, when one is known.
    pub line: Option<usize>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(kind: ErrorKind, line: usize, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    /// Attach a source line if the error does not carry one yet.
    pub fn with_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

macro_rules! error_ctor {
    ($name:ident, $kind:ident) => {
        pub fn $name(message: impl Into<String>) -> RuntimeError {
            RuntimeError::new(ErrorKind::$kind, message)
        }
    };
}

error_ctor!(name_error, Name);
error_ctor!(type_error, Type);
error_ctor!(cast_error, Cast);
error_ctor!(math_error, Math);
error_ctor!(index_error, Index);
error_ctor!(reference_error, Reference);
error_ctor!(runtime_error, Runtime);
error_ctor!(syntax_error, Syntax);
error_ctor!(internal_error, Internal);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = type_error("Cannot add a List and a String");
        assert_eq!(e.to_string(), "[Type error] Cannot add a List and a String");
    }

    #[test]
    fn test_with_line_keeps_existing() {
        let e = RuntimeError::at_line(ErrorKind::Math, 3, "Integer overflow").with_line(9);
        assert_eq!(e.line, Some(3));
    }
}
