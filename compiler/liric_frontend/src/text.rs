//! Recursive-descent parser for the textual IR surface syntax (spec §4.2).
//!
//! Grammar summary (see [`crate::print`]'s module docs in `liric_ir` for
//! the operand-encoding conventions this parser and the printer share):
//!
//! ```text
//! item       := decl | def | global | named_type
//! decl       := "declare" type "@" ident "(" (type ("," type)* ("," "...")? )? ")"
//! def        := "declare"-header "{" block+ "}"
//! global     := "@" ident "=" "dso_local"? ("global"|"constant") type value
//! named_type := "%" ident "=" "type" type
//! block      := label ":" instr*
//! ```
//!
//! Parameter and attribute-group words (`noundef`, `#0`, `!dbg`, ...) are
//! accepted wherever a bare identifier could appear in an operand-type
//! position and discarded, per spec.md's "attributes parsed-and-discarded"
//! rule.

use liric_ir::{
    CallFlags, CastKind, FCmpPredicate, GlobalFlags, ICmpPredicate, Instruction, Module, Opcode,
    Operand, Type, VReg, BlockId, FunctionId,
};
use liric_lexer::{Keyword, LexError, Lexer, Token, TokenKind};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            line: e.line,
            col: e.col,
        }
    }
}

struct Parser<'t, 'a, 'm> {
    tokens: &'t [Token],
    pos: usize,
    module: &'m mut Module<'a>,
    named_types: HashMap<String, Type<'a>>,
}

type PResult<T> = Result<T, ParseError>;

impl<'t, 'a, 'm> Parser<'t, 'a, 'm> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn bump(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        let tok = &self.tokens[self.pos];
        ParseError {
            message: message.into(),
            line: tok.line,
            col: tok.col,
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<()> {
        if self.peek() == &TokenKind::Keyword(kw) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected keyword {kw:?}, found {:?}", self.peek())))
        }
    }

    fn expect_punct(&mut self, kind: TokenKind) -> PResult<()> {
        if self.peek() == &kind {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected {kind:?}, found {:?}", self.peek())))
        }
    }

    fn eat_punct(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_global(&mut self) -> PResult<String> {
        match self.bump() {
            TokenKind::Global(name) => Ok(name),
            other => Err(self.err(format!("expected `@name`, found {other:?}"))),
        }
    }

    fn expect_local(&mut self) -> PResult<String> {
        match self.bump() {
            TokenKind::Local(name) => Ok(name),
            other => Err(self.err(format!("expected `%name`, found {other:?}"))),
        }
    }

    fn expect_int(&mut self) -> PResult<i64> {
        match self.bump() {
            TokenKind::IntLit(v) => Ok(v),
            other => Err(self.err(format!("expected an integer literal, found {other:?}"))),
        }
    }

    /// Skips zero or more parameter/attribute-group words
    /// (`noundef`, `nocapture`, `#0`, `!dbg`, ...), per the
    /// parsed-and-discarded attribute rule.
    fn skip_attributes(&mut self) {
        loop {
            match self.peek() {
                TokenKind::Ident(s) if !s.is_empty() => {
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn parse_type(&mut self) -> PResult<Type<'a>> {
        let ty = match self.bump() {
            TokenKind::Keyword(Keyword::Void) => Type::Void,
            TokenKind::Keyword(Keyword::I1) => Type::I1,
            TokenKind::Keyword(Keyword::I8) => Type::I8,
            TokenKind::Keyword(Keyword::I16) => Type::I16,
            TokenKind::Keyword(Keyword::I32) => Type::I32,
            TokenKind::Keyword(Keyword::I64) => Type::I64,
            TokenKind::Keyword(Keyword::F32) => Type::F32,
            TokenKind::Keyword(Keyword::F64) => Type::F64,
            TokenKind::Keyword(Keyword::Ptr) => Type::Ptr,
            TokenKind::LBracket => {
                let count = self.expect_int()? as u64;
                match self.bump() {
                    TokenKind::Ident(ref s) if s == "x" => {}
                    other => return Err(self.err(format!("expected `x` in array type, found {other:?}"))),
                }
                let elem = self.parse_type()?;
                self.expect_punct(TokenKind::RBracket)?;
                self.module.array_ty(elem, count)
            }
            TokenKind::LBrace => {
                let fields = self.parse_type_list(&TokenKind::RBrace)?;
                self.expect_punct(TokenKind::RBrace)?;
                self.module.struct_ty(&fields, false)
            }
            TokenKind::LAngle => {
                self.expect_punct(TokenKind::LBrace)?;
                let fields = self.parse_type_list(&TokenKind::RBrace)?;
                self.expect_punct(TokenKind::RBrace)?;
                self.expect_punct(TokenKind::RAngle)?;
                self.module.struct_ty(&fields, true)
            }
            TokenKind::Local(name) => *self
                .named_types
                .get(&name)
                .ok_or_else(|| self.err(format!("undefined named type `%{name}`")))?,
            other => return Err(self.err(format!("expected a type, found {other:?}"))),
        };
        Ok(ty)
    }

    fn parse_type_list(&mut self, terminator: &TokenKind) -> PResult<Vec<Type<'a>>> {
        let mut out = Vec::new();
        if self.peek() == terminator {
            return Ok(out);
        }
        loop {
            out.push(self.parse_type()?);
            if self.eat_punct(&TokenKind::Comma) {
                continue;
            }
            break;
        }
        Ok(out)
    }

    /// Parses one top-level item. Returns the defined function's id when
    /// the item was a `define` (the streaming-callback hook point), `None`
    /// for every other item, and `None` with the parser left at `Eof`
    /// when input is exhausted.
    fn parse_item(&mut self) -> PResult<Option<FunctionId>> {
        match self.peek().clone() {
            TokenKind::Eof => Ok(None),
            TokenKind::Keyword(Keyword::Declare) => {
                self.bump();
                self.parse_function_header(true)?;
                Ok(None)
            }
            TokenKind::Keyword(Keyword::Define) => {
                self.bump();
                let fid = self.parse_function_header(false)?;
                Ok(Some(fid))
            }
            TokenKind::Global(_) => {
                self.parse_global_item()?;
                Ok(None)
            }
            TokenKind::Local(_) if self.peek_at(1) == &TokenKind::Equals => {
                self.parse_named_type_item()?;
                Ok(None)
            }
            other => Err(self.err(format!("expected a top-level item, found {other:?}"))),
        }
    }

    fn parse_named_type_item(&mut self) -> PResult<()> {
        let name = self.expect_local()?;
        self.expect_punct(TokenKind::Equals)?;
        self.expect_kw(Keyword::Type)?;
        let ty = self.parse_type()?;
        self.named_types.insert(name, ty);
        Ok(())
    }

    fn parse_global_item(&mut self) -> PResult<()> {
        let name = self.expect_global()?;
        self.expect_punct(TokenKind::Equals)?;
        let is_local = self.eat_punct(&TokenKind::Keyword(Keyword::DsoLocal));
        let is_const = match self.bump() {
            TokenKind::Keyword(Keyword::Global) => false,
            TokenKind::Keyword(Keyword::Constant) => true,
            other => return Err(self.err(format!("expected `global` or `constant`, found {other:?}"))),
        };
        let ty = self.parse_type()?;
        let initializer = match self.peek().clone() {
            TokenKind::StringLit(bytes) => {
                self.bump();
                Some(bytes)
            }
            TokenKind::IntLit(v) => {
                self.bump();
                Some(v.to_le_bytes().to_vec())
            }
            _ => None,
        };
        let flags = GlobalFlags {
            is_const,
            is_external: initializer.is_none(),
            is_local,
        };
        self.module.declare_global(&name, ty, initializer.as_deref(), flags);
        Ok(())
    }

    /// Parses a `declare`/`define` header through the signature; for
    /// `define` it continues into the `{ block+ }` body.
    fn parse_function_header(&mut self, is_decl: bool) -> PResult<FunctionId> {
        let ret_ty = self.parse_type()?;
        let name = self.expect_global()?;
        self.expect_punct(TokenKind::LParen)?;

        let mut param_tys = Vec::new();
        let mut param_names = Vec::new();
        let mut vararg = false;
        if self.peek() != &TokenKind::RParen {
            loop {
                if self.peek() == &TokenKind::Keyword(Keyword::Vararg) {
                    self.bump();
                    vararg = true;
                    break;
                }
                let ty = self.parse_type()?;
                self.skip_attributes();
                let pname = if let TokenKind::Local(_) = self.peek() {
                    Some(self.expect_local()?)
                } else {
                    None
                };
                param_tys.push(ty);
                param_names.push(pname);
                if self.eat_punct(&TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect_punct(TokenKind::RParen)?;

        let fid = self.module.declare_function(&name, ret_ty, &param_tys, vararg);

        if is_decl {
            return Ok(fid);
        }

        self.expect_punct(TokenKind::LBrace)?;
        self.parse_function_body(fid, &param_names)?;
        Ok(fid)
    }

    fn parse_function_body(&mut self, fid: FunctionId, param_names: &[Option<String>]) -> PResult<()> {
        self.module.function_mut(fid).begin_definition();

        let mut vregs: HashMap<String, VReg> = HashMap::new();
        {
            let func = self.module.function(fid);
            for (pname, &vreg) in param_names.iter().zip(&func.param_vregs) {
                if let Some(n) = pname {
                    vregs.insert(n.clone(), vreg);
                }
            }
        }
        let mut blocks: HashMap<String, BlockId> = HashMap::new();
        let mut entry_assigned = false;
        let mut current_block = liric_ir::ENTRY_BLOCK;

        while self.peek() != &TokenKind::RBrace {
            // Block label: `ident ":"`.
            if let TokenKind::Ident(label) = self.peek().clone() {
                if self.peek_at(1) == &TokenKind::Colon {
                    self.bump();
                    self.bump();
                    current_block = self.resolve_block_name(fid, &label, &mut blocks, &mut entry_assigned);
                    continue;
                }
            }

            let instr = self.parse_instruction(fid, &mut vregs, &mut blocks, &mut entry_assigned)?;
            self.module
                .function_mut(fid)
                .block_mut(current_block)
                .instructions
                .push(instr);
        }
        self.expect_punct(TokenKind::RBrace)?;
        Ok(())
    }

    fn resolve_vreg(&mut self, fid: FunctionId, name: &str, vregs: &mut HashMap<String, VReg>) -> VReg {
        if let Some(&v) = vregs.get(name) {
            return v;
        }
        let v = self.module.function_mut(fid).fresh_vreg();
        vregs.insert(name.to_string(), v);
        v
    }

    fn resolve_block_name(
        &mut self,
        fid: FunctionId,
        name: &str,
        blocks: &mut HashMap<String, BlockId>,
        entry_assigned: &mut bool,
    ) -> BlockId {
        if let Some(&id) = blocks.get(name) {
            return id;
        }
        let id = if !*entry_assigned {
            *entry_assigned = true;
            liric_ir::ENTRY_BLOCK
        } else {
            self.module.function_mut(fid).new_block()
        };
        blocks.insert(name.to_string(), id);
        id
    }

    /// Parses a bare `%name` block reference, used inside `phi` incoming
    /// pairs (`[value, %block]`), which carry no leading `label` keyword.
    fn parse_bare_block_ref(
        &mut self,
        fid: FunctionId,
        blocks: &mut HashMap<String, BlockId>,
        entry_assigned: &mut bool,
    ) -> PResult<Operand<'a>> {
        let name = self.expect_local()?;
        let id = self.resolve_block_name(fid, &name, blocks, entry_assigned);
        Ok(Operand::Block(id))
    }

    /// Parses `label %name`.
    fn parse_label_ref(
        &mut self,
        fid: FunctionId,
        blocks: &mut HashMap<String, BlockId>,
        entry_assigned: &mut bool,
    ) -> PResult<Operand<'a>> {
        self.expect_kw(Keyword::Label)?;
        let name = self.expect_local()?;
        let id = self.resolve_block_name(fid, &name, blocks, entry_assigned);
        Ok(Operand::Block(id))
    }

    fn parse_value(
        &mut self,
        ty: Type<'a>,
        fid: FunctionId,
        vregs: &mut HashMap<String, VReg>,
    ) -> PResult<Operand<'a>> {
        match self.bump() {
            TokenKind::Local(name) => Ok(Operand::VReg(self.resolve_vreg(fid, &name, vregs))),
            TokenKind::IntLit(v) => Ok(Operand::ImmI64(v)),
            TokenKind::FloatLit(v) => Ok(Operand::ImmF64(v)),
            TokenKind::Keyword(Keyword::Null) => Ok(Operand::Null(ty)),
            TokenKind::Keyword(Keyword::Undef) => Ok(Operand::Undef(ty)),
            TokenKind::Global(name) => {
                // `@name+off`/`@name-off` offsets aren't part of the lexer's
                // punctuation set; every global operand this frontend emits
                // has offset 0 (`liric_ir::print` only prints a nonzero
                // offset for globals built directly through the IR API, not
                // through this parser).
                let sym = self.module.intern(&name);
                Ok(Operand::Global(sym, 0))
            }
            other => Err(self.err(format!("expected a value, found {other:?}"))),
        }
    }

    fn type_sentinel(&self, ty: Type<'a>) -> Operand<'a> {
        Operand::Undef(ty)
    }

    fn parse_instruction(
        &mut self,
        fid: FunctionId,
        vregs: &mut HashMap<String, VReg>,
        blocks: &mut HashMap<String, BlockId>,
        entry_assigned: &mut bool,
    ) -> PResult<Instruction<'a>> {
        let dest_name = if let TokenKind::Local(_) = self.peek() {
            if self.peek_at(1) == &TokenKind::Equals {
                let name = self.expect_local()?;
                self.bump();
                Some(name)
            } else {
                None
            }
        } else {
            None
        };

        let kw = match self.bump() {
            TokenKind::Keyword(kw) => kw,
            other => return Err(self.err(format!("expected an instruction mnemonic, found {other:?}"))),
        };

        macro_rules! dest {
            () => {
                match &dest_name {
                    Some(n) => self.resolve_vreg(fid, n, vregs),
                    None => liric_ir::VOID_VREG,
                }
            };
        }

        let instr = match kw {
            Keyword::Ret => {
                if self.peek() == &TokenKind::Keyword(Keyword::Void) {
                    self.bump();
                    Instruction::new(Opcode::RetVoid, Type::Void, liric_ir::VOID_VREG, vec![])
                } else {
                    let ty = self.parse_type()?;
                    let val = self.parse_value(ty, fid, vregs)?;
                    Instruction::new(Opcode::Ret, ty, liric_ir::VOID_VREG, vec![val])
                }
            }
            Keyword::Br => {
                let target = self.parse_label_ref(fid, blocks, entry_assigned)?;
                Instruction::new(Opcode::Br, Type::Void, liric_ir::VOID_VREG, vec![target])
            }
            Keyword::CondBr => {
                let ty = self.parse_type()?; // i1
                let cond = self.parse_value(ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                let t = self.parse_label_ref(fid, blocks, entry_assigned)?;
                self.expect_punct(TokenKind::Comma)?;
                let f = self.parse_label_ref(fid, blocks, entry_assigned)?;
                Instruction::new(Opcode::CondBr, Type::Void, liric_ir::VOID_VREG, vec![cond, t, f])
            }
            Keyword::Unreachable => {
                Instruction::new(Opcode::Unreachable, Type::Void, liric_ir::VOID_VREG, vec![])
            }
            Keyword::FNeg => {
                let ty = self.parse_type()?;
                let v = self.parse_value(ty, fid, vregs)?;
                Instruction::new(Opcode::FNeg, ty, dest!(), vec![v])
            }
            Keyword::ICmp | Keyword::FCmp => {
                let is_icmp = kw == Keyword::ICmp;
                let pred_tok = self.bump();
                let ty = self.parse_type()?;
                let lhs = self.parse_value(ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                let rhs = self.parse_value(ty, fid, vregs)?;
                let mut instr = Instruction::new(
                    if is_icmp { Opcode::ICmp } else { Opcode::FCmp },
                    Type::I1,
                    dest!(),
                    vec![self.type_sentinel(ty), lhs, rhs],
                );
                if is_icmp {
                    instr.icmp_pred = Some(icmp_pred_from(&pred_tok).ok_or_else(|| {
                        self.err(format!("bad icmp predicate {pred_tok:?}"))
                    })?);
                } else {
                    instr.fcmp_pred = Some(fcmp_pred_from(&pred_tok).ok_or_else(|| {
                        self.err(format!("bad fcmp predicate {pred_tok:?}"))
                    })?);
                }
                instr
            }
            Keyword::Alloca => {
                let ty = self.parse_type()?;
                Instruction::new(Opcode::Alloca, ty, dest!(), vec![])
            }
            Keyword::Load => {
                let ty = self.parse_type()?;
                self.expect_punct(TokenKind::Comma)?;
                self.expect_kw(Keyword::Ptr)?;
                let addr = self.parse_value(Type::Ptr, fid, vregs)?;
                Instruction::new(Opcode::Load, ty, dest!(), vec![addr])
            }
            Keyword::Store => {
                let ty = self.parse_type()?;
                let val = self.parse_value(ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                self.expect_kw(Keyword::Ptr)?;
                let addr = self.parse_value(Type::Ptr, fid, vregs)?;
                Instruction::new(Opcode::Store, ty, liric_ir::VOID_VREG, vec![val, addr])
            }
            Keyword::Gep => {
                let elem_ty = self.parse_type()?;
                self.expect_punct(TokenKind::Comma)?;
                self.expect_kw(Keyword::Ptr)?;
                let base = self.parse_value(Type::Ptr, fid, vregs)?;
                let mut operands = vec![base];
                while self.eat_punct(&TokenKind::Comma) {
                    self.expect_kw(Keyword::I64)?;
                    let idx = self.parse_value(Type::I64, fid, vregs)?;
                    operands.push(idx);
                }
                Instruction::new(Opcode::Gep, elem_ty, dest!(), operands)
            }
            Keyword::Call => {
                let ret_ty = self.parse_type()?;
                let callee_name = self.expect_global()?;
                let sym = self.module.intern(&callee_name);
                self.expect_punct(TokenKind::LParen)?;
                let mut operands = vec![Operand::Global(sym, 0)];
                let mut fixed_args = 0u32;
                if self.peek() != &TokenKind::RParen {
                    loop {
                        let ty = self.parse_type()?;
                        self.skip_attributes();
                        let val = self.parse_value(ty, fid, vregs)?;
                        operands.push(self.type_sentinel(ty));
                        operands.push(val);
                        fixed_args += 1;
                        if self.eat_punct(&TokenKind::Comma) {
                            continue;
                        }
                        break;
                    }
                }
                self.expect_punct(TokenKind::RParen)?;
                let mut instr = Instruction::new(
                    Opcode::Call,
                    ret_ty,
                    if matches!(ret_ty, Type::Void) { liric_ir::VOID_VREG } else { dest!() },
                    operands,
                );
                instr.call_flags = Some(CallFlags {
                    external_abi: false,
                    vararg: false,
                    fixed_args,
                });
                instr
            }
            Keyword::Phi => {
                let ty = self.parse_type()?;
                let mut operands = Vec::new();
                loop {
                    self.expect_punct(TokenKind::LBracket)?;
                    let val = self.parse_value(ty, fid, vregs)?;
                    self.expect_punct(TokenKind::Comma)?;
                    let block = self.parse_bare_block_ref(fid, blocks, entry_assigned)?;
                    self.expect_punct(TokenKind::RBracket)?;
                    operands.push(val);
                    operands.push(block);
                    if self.eat_punct(&TokenKind::Comma) {
                        continue;
                    }
                    break;
                }
                Instruction::new(Opcode::Phi, ty, dest!(), operands)
            }
            Keyword::Select => {
                let cond_ty = self.parse_type()?; // i1
                let cond = self.parse_value(cond_ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                let ty = self.parse_type()?;
                let t = self.parse_value(ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                self.parse_type()?; // repeated type before the false value
                let f = self.parse_value(ty, fid, vregs)?;
                Instruction::new(Opcode::Select, ty, dest!(), vec![cond, t, f])
            }
            Keyword::Sext
            | Keyword::Zext
            | Keyword::Trunc
            | Keyword::Bitcast
            | Keyword::PtrToInt
            | Keyword::IntToPtr
            | Keyword::SIToFp
            | Keyword::UIToFp
            | Keyword::FpToSi
            | Keyword::FpToUi
            | Keyword::FpExt
            | Keyword::FpTrunc => {
                let src_ty = self.parse_type()?;
                let val = self.parse_value(src_ty, fid, vregs)?;
                self.expect_kw(Keyword::To)?;
                let dst_ty = self.parse_type()?;
                let kind = cast_kind_from(kw);
                Instruction::new(
                    Opcode::Cast(kind),
                    dst_ty,
                    dest!(),
                    vec![self.type_sentinel(src_ty), val],
                )
            }
            Keyword::ExtractValue => {
                let agg_ty = self.parse_type()?;
                let val = self.parse_value(agg_ty, fid, vregs)?;
                let mut indices = Vec::new();
                while self.eat_punct(&TokenKind::Comma) {
                    indices.push(self.expect_int()? as u32);
                }
                let field_ty = extract_field_type(agg_ty, &indices)
                    .ok_or_else(|| self.err("bad extractvalue index path"))?;
                let mut instr = Instruction::new(
                    Opcode::ExtractValue,
                    field_ty,
                    dest!(),
                    vec![self.type_sentinel(agg_ty), val],
                );
                instr.indices = indices;
                instr
            }
            Keyword::InsertValue => {
                let agg_ty = self.parse_type()?;
                let agg_val = self.parse_value(agg_ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                let field_ty = self.parse_type()?;
                let field_val = self.parse_value(field_ty, fid, vregs)?;
                let mut indices = Vec::new();
                while self.eat_punct(&TokenKind::Comma) {
                    indices.push(self.expect_int()? as u32);
                }
                let mut instr = Instruction::new(
                    Opcode::InsertValue,
                    agg_ty,
                    dest!(),
                    vec![self.type_sentinel(agg_ty), agg_val, field_val],
                );
                instr.indices = indices;
                instr
            }
            Keyword::Add
            | Keyword::Sub
            | Keyword::Mul
            | Keyword::SDiv
            | Keyword::SRem
            | Keyword::UDiv
            | Keyword::URem
            | Keyword::And
            | Keyword::Or
            | Keyword::Xor
            | Keyword::Shl
            | Keyword::LShr
            | Keyword::AShr
            | Keyword::FAdd
            | Keyword::FSub
            | Keyword::FMul
            | Keyword::FDiv
            | Keyword::FRem => {
                let ty = self.parse_type()?;
                let lhs = self.parse_value(ty, fid, vregs)?;
                self.expect_punct(TokenKind::Comma)?;
                let rhs = self.parse_value(ty, fid, vregs)?;
                Instruction::new(binop_opcode(kw), ty, dest!(), vec![lhs, rhs])
            }
            other => return Err(self.err(format!("unexpected instruction mnemonic {other:?}"))),
        };
        Ok(instr)
    }
}

fn binop_opcode(kw: Keyword) -> Opcode {
    match kw {
        Keyword::Add => Opcode::Add,
        Keyword::Sub => Opcode::Sub,
        Keyword::Mul => Opcode::Mul,
        Keyword::SDiv => Opcode::SDiv,
        Keyword::SRem => Opcode::SRem,
        Keyword::UDiv => Opcode::UDiv,
        Keyword::URem => Opcode::URem,
        Keyword::And => Opcode::And,
        Keyword::Or => Opcode::Or,
        Keyword::Xor => Opcode::Xor,
        Keyword::Shl => Opcode::Shl,
        Keyword::LShr => Opcode::LShr,
        Keyword::AShr => Opcode::AShr,
        Keyword::FAdd => Opcode::FAdd,
        Keyword::FSub => Opcode::FSub,
        Keyword::FMul => Opcode::FMul,
        Keyword::FDiv => Opcode::FDiv,
        Keyword::FRem => Opcode::FRem,
        _ => unreachable!(),
    }
}

fn cast_kind_from(kw: Keyword) -> CastKind {
    match kw {
        Keyword::Sext => CastKind::Sext,
        Keyword::Zext => CastKind::Zext,
        Keyword::Trunc => CastKind::Trunc,
        Keyword::Bitcast => CastKind::Bitcast,
        Keyword::PtrToInt => CastKind::PtrToInt,
        Keyword::IntToPtr => CastKind::IntToPtr,
        Keyword::SIToFp => CastKind::SIToFP,
        Keyword::UIToFp => CastKind::UIToFP,
        Keyword::FpToSi => CastKind::FPToSI,
        Keyword::FpToUi => CastKind::FPToUI,
        Keyword::FpExt => CastKind::FPExt,
        Keyword::FpTrunc => CastKind::FPTrunc,
        _ => unreachable!(),
    }
}

fn icmp_pred_from(tok: &TokenKind) -> Option<ICmpPredicate> {
    let TokenKind::Keyword(kw) = tok else { return None };
    Some(match kw {
        Keyword::Eq => ICmpPredicate::Eq,
        Keyword::Ne => ICmpPredicate::Ne,
        Keyword::Slt => ICmpPredicate::Slt,
        Keyword::Sle => ICmpPredicate::Sle,
        Keyword::Sgt => ICmpPredicate::Sgt,
        Keyword::Sge => ICmpPredicate::Sge,
        Keyword::Ult => ICmpPredicate::Ult,
        Keyword::Ule => ICmpPredicate::Ule,
        Keyword::Ugt => ICmpPredicate::Ugt,
        Keyword::Uge => ICmpPredicate::Uge,
        _ => return None,
    })
}

fn fcmp_pred_from(tok: &TokenKind) -> Option<FCmpPredicate> {
    let TokenKind::Keyword(kw) = tok else { return None };
    Some(match kw {
        Keyword::Oeq => FCmpPredicate::Oeq,
        Keyword::One => FCmpPredicate::One,
        Keyword::Olt => FCmpPredicate::Olt,
        Keyword::Ole => FCmpPredicate::Ole,
        Keyword::Ogt => FCmpPredicate::Ogt,
        Keyword::Oge => FCmpPredicate::Oge,
        Keyword::Uno => FCmpPredicate::Uno,
        _ => return None,
    })
}

fn extract_field_type<'a>(agg_ty: Type<'a>, indices: &[u32]) -> Option<Type<'a>> {
    let mut ty = agg_ty;
    for &idx in indices {
        ty = match ty {
            Type::Struct(fields, _) => *fields.get(idx as usize)?,
            Type::Array(elem, _) => *elem,
            _ => return None,
        };
    }
    Some(ty)
}

/// Parses `src` as textual IR into `module`, calling `on_function` after
/// each function definition is fully parsed (the streaming-ingestion
/// entry point); declarations and globals don't trigger the callback.
pub fn parse_streaming<'a>(
    src: &str,
    module: &mut Module<'a>,
    mut on_function: impl FnMut(&Module<'a>, FunctionId),
) -> PResult<()> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        module,
        named_types: HashMap::new(),
    };
    loop {
        if parser.peek() == &TokenKind::Eof {
            break;
        }
        if let Some(fid) = parser.parse_item()? {
            on_function(parser.module, fid);
        }
    }
    Ok(())
}

/// Parses `src` as textual IR into `module` without a streaming callback.
pub fn parse<'a>(src: &str, module: &mut Module<'a>) -> PResult<()> {
    parse_streaming(src, module, |_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_arena::Arena;

    #[test]
    fn parses_a_declaration() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        parse("declare i32 @puts(ptr)", &mut module).unwrap();
        let fid = module.find_function("puts").unwrap();
        assert!(module.function(fid).is_decl);
        assert_eq!(module.function(fid).param_tys, &[Type::Ptr]);
    }

    #[test]
    fn parses_ret42() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let src = "define i32 @main() {\nblock0:\n  ret i32 42\n}\n";
        parse(src, &mut module).unwrap();
        let fid = module.find_function("main").unwrap();
        let func = module.function(fid);
        assert!(!func.is_decl);
        assert_eq!(func.blocks.len(), 1);
        let instr = &func.block(liric_ir::ENTRY_BLOCK).instructions[0];
        assert_eq!(instr.opcode, Opcode::Ret);
        assert_eq!(instr.operands[0], Operand::ImmI64(42));
    }

    #[test]
    fn parses_add_of_two_params() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let src = "define i32 @add(i32 %0, i32 %1) {\nblock0:\n  %2 = add i32 %0, %1\n  ret i32 %2\n}\n";
        parse(src, &mut module).unwrap();
        let fid = module.find_function("add").unwrap();
        let func = module.function(fid);
        let add_instr = &func.block(liric_ir::ENTRY_BLOCK).instructions[0];
        assert_eq!(add_instr.opcode, Opcode::Add);
        assert_eq!(add_instr.operands[0], Operand::VReg(func.param_vregs[0]));
        assert_eq!(add_instr.operands[1], Operand::VReg(func.param_vregs[1]));
    }

    #[test]
    fn parses_a_branching_loop() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let src = "define i32 @loop() {\nentry:\n  br label %hdr\nhdr:\n  %1 = phi i32 [0, %entry], [2, %hdr]\n  %2 = icmp slt i32 %1, 10\n  condbr i1 %2, label %hdr, label %exit\nexit:\n  ret i32 %1\n}\n";
        parse(src, &mut module).unwrap();
        let fid = module.find_function("loop").unwrap();
        let func = module.function(fid);
        assert_eq!(func.blocks.len(), 3);
    }

    #[test]
    fn parses_struct_gep_and_cast() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        let src = "define i64 @f(ptr %0) {\nblock0:\n  %1 = gep i32, ptr %0, i64 1\n  %2 = load i32, ptr %1\n  %3 = sext i32 %2 to i64\n  ret i64 %3\n}\n";
        parse(src, &mut module).unwrap();
        let fid = module.find_function("f").unwrap();
        let func = module.function(fid);
        let instrs = &func.block(liric_ir::ENTRY_BLOCK).instructions;
        assert_eq!(instrs[0].opcode, Opcode::Gep);
        assert_eq!(instrs[0].result_ty, Type::I32);
        assert_eq!(instrs[2].opcode, Opcode::Cast(CastKind::Sext));
    }
}
