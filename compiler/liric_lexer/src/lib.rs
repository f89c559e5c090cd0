//! The textual-IR lexer (spec.md §4.2).
//!
//! Recognizes the mnemonic/keyword set the textual-IR parser needs
//! (the full LLVM-IR keyword table is out of scope; this is the
//! minimal set spec.md §3's instruction grammar actually uses),
//! identifier sigils (`%` local, `@` global), punctuation, integer and
//! float literals (including the `0x` hex-float form, reinterpreted as
//! IEEE-754 bits), and C-style string literals.
//!
//! Keyword recognition uses the FNV-1a perfect-hash-then-memcmp shape
//! described in the spec: `keyword_from_bytes` hashes the lexeme, picks
//! a small bucket, and confirms with a direct byte comparison rather
//! than a generic string-keyed `HashMap` lookup.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Keyword {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    Type,
    Declare,
    Define,
    Global,
    Constant,
    DsoLocal,
    Null,
    Undef,
    To,
    Ret,
    Br,
    CondBr,
    Unreachable,
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    FNeg,
    ICmp,
    FCmp,
    Alloca,
    Load,
    Store,
    Gep,
    Call,
    Phi,
    Select,
    Sext,
    Zext,
    Trunc,
    Bitcast,
    PtrToInt,
    IntToPtr,
    SIToFp,
    UIToFp,
    FpToSi,
    FpToUi,
    FpExt,
    FpTrunc,
    ExtractValue,
    InsertValue,
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Uno,
    Vararg,
    Label,
}

/// `(lexeme, keyword)`. Lookup hashes the lexeme, then confirms with
/// `memcmp` (the `==` on `&str`, which is a byte compare for ASCII
/// keywords) against every table entry sharing that hash bucket.
const KEYWORDS: &[(&str, Keyword)] = &[
    ("void", Keyword::Void),
    ("i1", Keyword::I1),
    ("i8", Keyword::I8),
    ("i16", Keyword::I16),
    ("i32", Keyword::I32),
    ("i64", Keyword::I64),
    ("f32", Keyword::F32),
    ("f64", Keyword::F64),
    ("ptr", Keyword::Ptr),
    ("type", Keyword::Type),
    ("declare", Keyword::Declare),
    ("define", Keyword::Define),
    ("global", Keyword::Global),
    ("constant", Keyword::Constant),
    ("dso_local", Keyword::DsoLocal),
    ("null", Keyword::Null),
    ("undef", Keyword::Undef),
    ("to", Keyword::To),
    ("ret", Keyword::Ret),
    ("br", Keyword::Br),
    ("condbr", Keyword::CondBr),
    ("unreachable", Keyword::Unreachable),
    ("add", Keyword::Add),
    ("sub", Keyword::Sub),
    ("mul", Keyword::Mul),
    ("sdiv", Keyword::SDiv),
    ("srem", Keyword::SRem),
    ("udiv", Keyword::UDiv),
    ("urem", Keyword::URem),
    ("and", Keyword::And),
    ("or", Keyword::Or),
    ("xor", Keyword::Xor),
    ("shl", Keyword::Shl),
    ("lshr", Keyword::LShr),
    ("ashr", Keyword::AShr),
    ("fadd", Keyword::FAdd),
    ("fsub", Keyword::FSub),
    ("fmul", Keyword::FMul),
    ("fdiv", Keyword::FDiv),
    ("frem", Keyword::FRem),
    ("fneg", Keyword::FNeg),
    ("icmp", Keyword::ICmp),
    ("fcmp", Keyword::FCmp),
    ("alloca", Keyword::Alloca),
    ("load", Keyword::Load),
    ("store", Keyword::Store),
    ("gep", Keyword::Gep),
    ("call", Keyword::Call),
    ("phi", Keyword::Phi),
    ("select", Keyword::Select),
    ("sext", Keyword::Sext),
    ("zext", Keyword::Zext),
    ("trunc", Keyword::Trunc),
    ("bitcast", Keyword::Bitcast),
    ("ptrtoint", Keyword::PtrToInt),
    ("inttoptr", Keyword::IntToPtr),
    ("sitofp", Keyword::SIToFp),
    ("uitofp", Keyword::UIToFp),
    ("fptosi", Keyword::FpToSi),
    ("fptoui", Keyword::FpToUi),
    ("fpext", Keyword::FpExt),
    ("fptrunc", Keyword::FpTrunc),
    ("extractvalue", Keyword::ExtractValue),
    ("insertvalue", Keyword::InsertValue),
    ("eq", Keyword::Eq),
    ("ne", Keyword::Ne),
    ("slt", Keyword::Slt),
    ("sle", Keyword::Sle),
    ("sgt", Keyword::Sgt),
    ("sge", Keyword::Sge),
    ("ult", Keyword::Ult),
    ("ule", Keyword::Ule),
    ("ugt", Keyword::Ugt),
    ("uge", Keyword::Uge),
    ("oeq", Keyword::Oeq),
    ("one", Keyword::One),
    ("olt", Keyword::Olt),
    ("ole", Keyword::Ole),
    ("ogt", Keyword::Ogt),
    ("oge", Keyword::Oge),
    ("uno", Keyword::Uno),
    ("...", Keyword::Vararg),
    ("label", Keyword::Label),
];

/// FNV-1a over the lexeme bytes; the same hash the symbol table uses
/// for interning (`liric_ir::symbol::fnv1a`), duplicated here so
/// `liric_lexer` has no dependency on `liric_ir`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Looks up `word` in the keyword table via hash-bucket-then-memcmp.
/// `NUM_BUCKETS` is a small power of two; collisions degrade to a
/// short linear scan within the bucket, never a full table scan.
pub fn keyword_from_str(word: &str) -> Option<Keyword> {
    const NUM_BUCKETS: u64 = 64;
    let target_bucket = fnv1a(word.as_bytes()) % NUM_BUCKETS;
    for &(lexeme, kw) in KEYWORDS {
        if fnv1a(lexeme.as_bytes()) % NUM_BUCKETS == target_bucket && lexeme == word {
            return Some(kw);
        }
    }
    None
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    /// `%name` or `%42`.
    Local(String),
    /// `@name`.
    Global(String),
    /// A bare identifier that is not a recognized keyword (struct type
    /// names, block labels, parameter attribute words to discard).
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    /// A `c"..."` byte string literal, already unescaped.
    StringLit(Vec<u8>),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    Comma,
    Equals,
    Colon,
    Star,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'src> {
    bytes: &'src [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Lexer {
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b';') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line: self.line,
            col: self.col,
        }
    }

    fn is_ident_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_' || b == b'.'
    }

    fn is_ident_continue(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
    }

    fn lex_ident_like(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if Self::is_ident_continue(b) {
                self.bump();
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn lex_number(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let mut is_float = false;
        let mut is_hex = false;

        if self.peek() == Some(b'-') {
            self.bump();
        }

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            is_hex = true;
            self.bump();
            self.bump();
            while let Some(b) = self.peek() {
                if b.is_ascii_hexdigit() {
                    self.bump();
                } else {
                    break;
                }
            }
        } else {
            while let Some(b) = self.peek() {
                if b.is_ascii_digit() {
                    self.bump();
                } else {
                    break;
                }
            }
            if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.bump();
                while let Some(b) = self.peek() {
                    if b.is_ascii_digit() {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            if matches!(self.peek(), Some(b'e') | Some(b'E')) {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.bump();
                }
                while let Some(b) = self.peek() {
                    if b.is_ascii_digit() {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }

        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();

        if is_hex {
            // `0x<16 hex digits>` reinterpreted as the bits of an f64,
            // per spec.md's hex-float constant form.
            let digits = &text[2..];
            let bits = u64::from_str_radix(digits, 16)
                .map_err(|_| self.err(format!("invalid hex float literal `{text}`")))?;
            return Ok(TokenKind::FloatLit(f64::from_bits(bits)));
        }
        if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid float literal `{text}`")))?;
            return Ok(TokenKind::FloatLit(v));
        }
        let v: i64 = text
            .parse()
            .map_err(|_| self.err(format!("invalid integer literal `{text}`")))?;
        Ok(TokenKind::IntLit(v))
    }

    fn lex_c_string(&mut self) -> Result<Vec<u8>, LexError> {
        // Opening quote already consumed by the caller.
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some(b'"') => break,
                Some(b'\\') => {
                    let hi = self.bump().ok_or_else(|| self.err("bad escape"))?;
                    let lo = self.bump().ok_or_else(|| self.err("bad escape"))?;
                    let hex = [hi, lo];
                    let hex_str = std::str::from_utf8(&hex).map_err(|_| self.err("bad escape"))?;
                    let byte = u8::from_str_radix(hex_str, 16)
                        .map_err(|_| self.err("bad hex escape"))?;
                    out.push(byte);
                }
                Some(b) => out.push(b),
            }
        }
        Ok(out)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(b'(') => {
                self.bump();
                TokenKind::LParen
            }
            Some(b')') => {
                self.bump();
                TokenKind::RParen
            }
            Some(b'{') => {
                self.bump();
                TokenKind::LBrace
            }
            Some(b'}') => {
                self.bump();
                TokenKind::RBrace
            }
            Some(b'[') => {
                self.bump();
                TokenKind::LBracket
            }
            Some(b']') => {
                self.bump();
                TokenKind::RBracket
            }
            Some(b'<') => {
                self.bump();
                TokenKind::LAngle
            }
            Some(b'>') => {
                self.bump();
                TokenKind::RAngle
            }
            Some(b',') => {
                self.bump();
                TokenKind::Comma
            }
            Some(b'=') => {
                self.bump();
                TokenKind::Equals
            }
            Some(b':') => {
                self.bump();
                TokenKind::Colon
            }
            Some(b'*') => {
                self.bump();
                TokenKind::Star
            }
            Some(b'.') if self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'.') => {
                self.bump();
                self.bump();
                self.bump();
                TokenKind::Keyword(Keyword::Vararg)
            }
            Some(b'%') => {
                self.bump();
                TokenKind::Local(self.lex_ident_like())
            }
            Some(b'@') => {
                self.bump();
                TokenKind::Global(self.lex_ident_like())
            }
            Some(b'#') => {
                self.bump();
                // Attribute group reference: parsed-and-discarded by the
                // caller, but still tokenized as an identifier so the
                // parser can skip it uniformly.
                TokenKind::Ident(format!("#{}", self.lex_ident_like()))
            }
            Some(b'!') => {
                self.bump();
                TokenKind::Ident(format!("!{}", self.lex_ident_like()))
            }
            Some(b'"') => {
                self.bump();
                TokenKind::StringLit(self.lex_c_string()?)
            }
            Some(b) if b == b'c' && self.peek_at(1) == Some(b'"') => {
                self.bump();
                self.bump();
                TokenKind::StringLit(self.lex_c_string()?)
            }
            Some(b) if b.is_ascii_digit() || b == b'-' => self.lex_number()?,
            Some(b) if Self::is_ident_start(b) => {
                let word = self.lex_ident_like();
                match keyword_from_str(&word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(word),
                }
            }
            Some(b) => return Err(self.err(format!("unexpected byte 0x{b:02x}"))),
        };
        Ok(Token { kind, line, col })
    }

    /// Tokenizes the entire input, terminated by a single trailing `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_resolve_through_the_hash_table() {
        assert_eq!(keyword_from_str("add"), Some(Keyword::Add));
        assert_eq!(keyword_from_str("ret"), Some(Keyword::Ret));
        assert_eq!(keyword_from_str("banana"), None);
    }

    #[test]
    fn lexes_locals_globals_and_punctuation() {
        let toks = Lexer::new("%1 = add i32 %0, @g").tokenize().unwrap();
        let kinds: Vec<_> = toks.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Local("1".into()),
                TokenKind::Equals,
                TokenKind::Keyword(Keyword::Add),
                TokenKind::Keyword(Keyword::I32),
                TokenKind::Local("0".into()),
                TokenKind::Comma,
                TokenKind::Global("g".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn hex_float_reinterprets_bits() {
        let toks = Lexer::new("0x4045000000000000").tokenize().unwrap();
        match &toks[0].kind {
            TokenKind::FloatLit(v) => assert_eq!(*v, 42.0),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn comments_are_skipped() {
        let toks = Lexer::new("; a comment\nret i32 0").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::Ret));
    }

    #[test]
    fn c_string_literal_unescapes_hex_bytes() {
        let toks = Lexer::new(r#"c"ab\00""#).tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::StringLit(vec![b'a', b'b', 0]));
    }
}
