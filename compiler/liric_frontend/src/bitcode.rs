//! LLVM bitcode frontend (spec §4.2).
//!
//! No vendored LLVM bitcode reader is linked into this workspace, so this
//! module's job is narrower than the other two frontends: recognize the
//! two bitcode magic signatures for `auto` dispatch, and fail with an
//! explicit "decoder unavailable" error rather than silently
//! misinterpreting the bytes as something else.

use liric_ir::Module;
use std::fmt;

/// Raw bitcode magic: `BC\xC0\xDE`.
const RAW_MAGIC: [u8; 4] = [0x42, 0x43, 0xc0, 0xde];

/// Darwin bitcode-wrapper magic (0x0B17C0DE, little-endian on disk).
const WRAPPER_MAGIC: [u8; 4] = [0xde, 0xc0, 0x17, 0x0b];

/// True when `bytes` starts with either the raw or the wrapped bitcode
/// magic, per §4.2's dispatcher rule.
pub fn is_bitcode(bytes: &[u8]) -> bool {
    bytes.starts_with(&RAW_MAGIC) || bytes.starts_with(&WRAPPER_MAGIC)
}

#[derive(Debug)]
pub struct BitcodeError {
    pub message: String,
}

impl fmt::Display for BitcodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BitcodeError {}

/// Always fails: this workspace carries no bitcode bitstream reader.
/// Still validates the magic first, so callers get "not bitcode at all"
/// distinguished from "bitcode, but unsupported".
pub fn parse<'a>(bytes: &[u8], _module: &mut Module<'a>) -> Result<(), BitcodeError> {
    if !is_bitcode(bytes) {
        return Err(BitcodeError {
            message: "input does not start with an LLVM bitcode magic".to_string(),
        });
    }
    Err(BitcodeError {
        message: "LLVM bitcode decoder unavailable in this build".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_arena::Arena;

    #[test]
    fn recognizes_raw_magic() {
        assert!(is_bitcode(&[0x42, 0x43, 0xc0, 0xde, 0, 0]));
    }

    #[test]
    fn recognizes_wrapper_magic() {
        assert!(is_bitcode(&[0xde, 0xc0, 0x17, 0x0b, 0, 0]));
    }

    #[test]
    fn rejects_non_bitcode() {
        assert!(!is_bitcode(b"define i32 @f()"));
    }

    #[test]
    fn parse_fails_with_decoder_unavailable() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let err = parse(&[0x42, 0x43, 0xc0, 0xde], &mut module).unwrap_err();
        assert!(err.message.contains("unavailable"));
    }

    #[test]
    fn parse_rejects_bad_magic_distinctly() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let err = parse(b"not bitcode", &mut module).unwrap_err();
        assert!(err.message.contains("magic"));
    }
}
