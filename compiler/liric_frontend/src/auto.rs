//! The `auto` dispatcher (spec §4.2): sniffs the first bytes of an input
//! buffer and picks the matching frontend. Kept as a small static table of
//! `(matcher, parser)` pairs rather than a trait-object registry, per
//! spec.md §9's "keep it that way — no plugin ABI needed".

use liric_ir::{FunctionId, Module};
use std::fmt;

/// `\0asm`, the WebAssembly binary magic.
const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

#[derive(Debug)]
pub enum AutoError {
    Parse(crate::text::ParseError),
    Wasm(crate::wasm::WasmError),
    Bitcode(crate::bitcode::BitcodeError),
}

impl fmt::Display for AutoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoError::Parse(e) => write!(f, "{e}"),
            AutoError::Wasm(e) => write!(f, "{e}"),
            AutoError::Bitcode(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AutoError {}

/// Which frontend `auto` picked for a given buffer. Exposed so callers
/// (the session, the facade) can report which lane ran without re-sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Wasm,
    Bitcode,
    Text,
}

/// Sniffs `bytes` per spec §4.2: `\0asm` -> wasm, a bitcode magic -> bitcode,
/// otherwise textual IR.
pub fn sniff(bytes: &[u8]) -> Sniffed {
    if bytes.starts_with(&WASM_MAGIC) {
        Sniffed::Wasm
    } else if crate::bitcode::is_bitcode(bytes) {
        Sniffed::Bitcode
    } else {
        Sniffed::Text
    }
}

/// Parses `bytes` into `module`, picking the frontend via [`sniff`], with a
/// streaming callback invoked once per completed function (wasm and text
/// both support streaming; bitcode never reaches the callback since it
/// always fails before producing a function).
pub fn parse_streaming<'a>(
    bytes: &[u8],
    module: &mut Module<'a>,
    mut on_function: impl FnMut(&Module<'a>, FunctionId),
) -> Result<Sniffed, AutoError> {
    match sniff(bytes) {
        Sniffed::Wasm => {
            crate::wasm::parse_streaming(bytes, module, &mut on_function).map_err(AutoError::Wasm)?;
            Ok(Sniffed::Wasm)
        }
        Sniffed::Bitcode => {
            crate::bitcode::parse(bytes, module).map_err(AutoError::Bitcode)?;
            Ok(Sniffed::Bitcode)
        }
        Sniffed::Text => {
            let src = std::str::from_utf8(bytes).map_err(|e| {
                AutoError::Parse(crate::text::ParseError {
                    message: format!("input is not valid UTF-8 textual IR: {e}"),
                    line: 0,
                    col: 0,
                })
            })?;
            crate::text::parse_streaming(src, module, &mut on_function).map_err(AutoError::Parse)?;
            Ok(Sniffed::Text)
        }
    }
}

/// Parses `bytes` into `module` without a streaming callback.
pub fn parse<'a>(bytes: &[u8], module: &mut Module<'a>) -> Result<Sniffed, AutoError> {
    parse_streaming(bytes, module, |_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_arena::Arena;

    #[test]
    fn sniffs_wasm_magic() {
        assert_eq!(sniff(&[0x00, 0x61, 0x73, 0x6d, 1, 0, 0, 0]), Sniffed::Wasm);
    }

    #[test]
    fn sniffs_bitcode_magic() {
        assert_eq!(sniff(&[0x42, 0x43, 0xc0, 0xde]), Sniffed::Bitcode);
    }

    #[test]
    fn falls_back_to_text() {
        assert_eq!(sniff(b"define i32 @f() { ret i32 0 }"), Sniffed::Text);
    }

    #[test]
    fn auto_parses_textual_ir() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let kind = parse(b"define i32 @f() {\nentry:\n  ret i32 1\n}\n", &mut module).unwrap();
        assert_eq!(kind, Sniffed::Text);
        assert!(module.find_function("f").is_some());
    }

    #[test]
    fn auto_reports_bitcode_unavailable() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let err = parse(&[0x42, 0x43, 0xc0, 0xde, 0, 0], &mut module).unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }
}
