//! The public error taxonomy (spec §7): six stable kinds, each carrying a
//! bounded human message. Every fallible session operation returns
//! `Result<_, LiricError>`; lower layers (`liric_codegen_ssa::BackendError`,
//! `liric_jit::JitError`, `liric_frontend`'s per-frontend parse errors) all
//! fold into this one enum at the session boundary, which is the
//! "error-propagation hub" spec §7 describes.

use std::fmt;

#[derive(Debug)]
pub enum LiricError {
    /// Malformed input to a public call: null/empty name, bad enum value.
    Argument(String),
    /// The call violates the session's state machine (`emit` with no open
    /// block, `func_end` with no open function, a second `func_begin`
    /// before the first closes).
    State(String),
    /// Valid request the active backend doesn't implement.
    Unsupported(String),
    /// Internal codegen failure: arena exhaustion, a JIT memory-protection
    /// failure, a register allocator stuck with no candidates.
    Backend(String),
    /// Frontend syntax or semantic error, with position context where the
    /// frontend has one.
    Parse(String),
    /// A lookup failed, or a merge/link step referenced an undefined
    /// symbol.
    NotFound(String),
}

impl fmt::Display for LiricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiricError::Argument(m) => write!(f, "argument error: {m}"),
            LiricError::State(m) => write!(f, "state error: {m}"),
            LiricError::Unsupported(m) => write!(f, "unsupported: {m}"),
            LiricError::Backend(m) => write!(f, "backend error: {m}"),
            LiricError::Parse(m) => write!(f, "parse error: {m}"),
            LiricError::NotFound(m) => write!(f, "not found: {m}"),
        }
    }
}

impl std::error::Error for LiricError {}

impl From<liric_codegen_ssa::backend::BackendError> for LiricError {
    fn from(e: liric_codegen_ssa::backend::BackendError) -> Self {
        match e {
            liric_codegen_ssa::backend::BackendError::Unsupported { instruction } => {
                LiricError::Unsupported(instruction)
            }
            liric_codegen_ssa::backend::BackendError::Internal { message } => {
                LiricError::Backend(message)
            }
        }
    }
}

impl From<liric_jit::JitError> for LiricError {
    fn from(e: liric_jit::JitError) -> Self {
        match e {
            liric_jit::JitError::Memory(m) => LiricError::Backend(m.to_string()),
            liric_jit::JitError::Backend(b) => LiricError::from(b),
            liric_jit::JitError::UnresolvedSymbol(name) => LiricError::NotFound(name),
        }
    }
}

impl From<liric_frontend::auto::AutoError> for LiricError {
    fn from(e: liric_frontend::auto::AutoError) -> Self {
        LiricError::Parse(e.to_string())
    }
}

impl From<liric_object::ObjectError> for LiricError {
    fn from(e: liric_object::ObjectError) -> Self {
        match e {
            liric_object::ObjectError::UndefinedSymbol(s) => LiricError::NotFound(s),
            liric_object::ObjectError::UnsupportedTarget(s) => LiricError::Unsupported(s),
            liric_object::ObjectError::Write(s) => LiricError::Backend(s),
        }
    }
}
