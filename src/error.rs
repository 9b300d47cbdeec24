// Purpose: Define the error taxonomy shared by the compiler and the runtime.
// Inputs/Outputs: Typed errors carrying template line numbers where known.
// Invariants: Lookup/member/undefined failures stay distinct kinds; they are
//   matched on by callers and must not collapse into strings internally.
// Gotchas: `Eval` line numbers are filled in by the op interpreter, not at
//   the point the error is first constructed.

use std::fmt;

/// Error produced while compiling a parse tree into render units.
#[derive(Clone, Debug)]
pub struct CompileError {
    pub message: String,
    pub line: usize,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "compile error at line {}: {}", self.line, self.message)
        } else {
            write!(f, "compile error: {}", self.message)
        }
    }
}

impl std::error::Error for CompileError {}

/// Error produced while executing render units.
#[derive(Clone, Debug)]
pub enum RenderError {
    /// A template URI could not be resolved to a template unit.
    Lookup(String),
    /// A namespace member access named a callable that does not exist on the
    /// namespace or any ancestor.
    NoSuchMember {
        namespace: String,
        member: String,
        hint: Option<String>,
    },
    /// The undefined sentinel was used as a value.
    UndefinedValue { line: Option<usize> },
    /// A non-callable value was invoked.
    NotCallable(String),
    /// An embedded expression or code block failed during evaluation.
    Eval {
        message: String,
        line: Option<usize>,
    },
}

impl RenderError {
    pub fn eval(message: impl Into<String>) -> Self {
        RenderError::Eval {
            message: message.into(),
            line: None,
        }
    }

    pub fn undefined() -> Self {
        RenderError::UndefinedValue { line: None }
    }

    /// Attach a template source line to an error that does not carry one
    /// yet. Other kinds pass through untouched.
    pub fn at_line(self, at: usize) -> Self {
        match self {
            RenderError::Eval {
                message,
                line: None,
            } => RenderError::Eval {
                message,
                line: Some(at),
            },
            RenderError::UndefinedValue { line: None } => RenderError::UndefinedValue {
                line: Some(at),
            },
            other => other,
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Lookup(msg) => write!(f, "template lookup error: {}", msg),
            RenderError::NoSuchMember {
                namespace,
                member,
                hint,
            } => {
                write!(f, "namespace '{}' has no member '{}'", namespace, member)?;
                if let Some(hint) = hint {
                    write!(f, " (did you mean '{}'?)", hint)?;
                }
                Ok(())
            }
            RenderError::UndefinedValue { line } => match line {
                Some(line) => write!(f, "undefined value used at template line {}", line),
                None => write!(f, "undefined value used"),
            },
            RenderError::NotCallable(what) => write!(f, "{} is not callable", what),
            RenderError::Eval { message, line } => match line {
                Some(line) => write!(f, "error at template line {}: {}", line, message),
                None => write!(f, "error: {}", message),
            },
        }
    }
}

impl std::error::Error for RenderError {}
