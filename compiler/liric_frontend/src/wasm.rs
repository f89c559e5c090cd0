//! WebAssembly frontend (spec §4.2): a self-contained binary decoder plus
//! a stack-machine-to-SSA lowering pass. No `wasmparser` dependency —
//! decoding the handful of sections a straight-line MVP module needs is
//! small enough to hand-roll, and keeps this crate's dependency surface
//! matching what the bitcode frontend already accepts (none).
//!
//! Scope is the WebAssembly 1.0 (MVP) instruction set: multi-value
//! blocks/functions, SIMD, reference types, and the numeric-ops
//! proposals (clz/ctz/popcnt/rotl/rotr, float transcendentals, min/max/
//! copysign) are not implemented and surface as
//! [`WasmError::Unsupported`].

use liric_ir::{CastKind, FCmpPredicate, ICmpPredicate, Instruction, Module, Opcode, Operand, Type, VReg, BlockId, FunctionId};
use std::fmt;

#[derive(Debug)]
pub struct WasmError {
    pub message: String,
}

impl WasmError {
    fn new(message: impl Into<String>) -> Self {
        WasmError { message: message.into() }
    }
}

impl fmt::Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WasmError {}

type WResult<T> = Result<T, WasmError>;

/// `\0asm`, the magic every wasm binary starts with (spec §4.2's
/// dispatcher rule).
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

pub fn is_wasm(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

// ---------------------------------------------------------------------
// Binary reader
// ---------------------------------------------------------------------

struct Reader<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn new(bytes: &'b [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn u8(&mut self) -> WResult<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| WasmError::new("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> WResult<&'b [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| WasmError::new("length overflow"))?;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| WasmError::new("unexpected end of input"))?;
        self.pos = end;
        Ok(slice)
    }

    fn uleb32(&mut self) -> WResult<u32> {
        let mut result: u32 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            result |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 35 {
                return Err(WasmError::new("LEB128 u32 overflow"));
            }
        }
    }

    fn sleb64(&mut self) -> WResult<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && (byte & 0x40) != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            if shift >= 70 {
                return Err(WasmError::new("LEB128 i64 overflow"));
            }
        }
    }

    fn sleb32(&mut self) -> WResult<i32> {
        Ok(self.sleb64()? as i32)
    }

    fn f32(&mut self) -> WResult<f32> {
        let b = self.bytes(4)?;
        Ok(f32::from_le_bytes(b.try_into().unwrap()))
    }

    fn f64(&mut self) -> WResult<f64> {
        let b = self.bytes(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    fn name(&mut self) -> WResult<String> {
        let len = self.uleb32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WasmError::new("malformed utf-8 name"))
    }
}

// ---------------------------------------------------------------------
// Decoded module shape
// ---------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
}

impl ValType {
    fn from_byte(b: u8) -> WResult<Self> {
        match b {
            0x7f => Ok(ValType::I32),
            0x7e => Ok(ValType::I64),
            0x7d => Ok(ValType::F32),
            0x7c => Ok(ValType::F64),
            other => Err(WasmError::new(format!("unsupported value type byte 0x{other:02x}"))),
        }
    }

    fn ir<'a>(self) -> Type<'a> {
        match self {
            ValType::I32 => Type::I32,
            ValType::I64 => Type::I64,
            ValType::F32 => Type::F32,
            ValType::F64 => Type::F64,
        }
    }

    fn is_int(self) -> bool {
        matches!(self, ValType::I32 | ValType::I64)
    }
}

#[derive(Clone, Debug)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Clone, Debug)]
pub enum ImportDesc {
    Func(u32),
    Table,
    Memory,
    Global(ValType, bool),
}

#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Clone, Copy, Debug)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    GlobalGet(u32),
}

#[derive(Clone, Debug)]
pub struct GlobalDef {
    pub ty: ValType,
    pub mutable: bool,
    pub init: ConstExpr,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Clone, Debug)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

#[derive(Clone, Debug)]
pub struct FuncBody {
    pub locals: Vec<ValType>,
    pub code: Vec<u8>,
}

/// A fully decoded wasm binary, ready for lowering.
#[derive(Clone, Debug, Default)]
pub struct WasmModule {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type index of each *local* (non-imported) function, in order.
    pub func_types: Vec<u32>,
    pub memories: Vec<(u32, Option<u32>)>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<Export>,
    pub code: Vec<FuncBody>,
}

/// Decodes a wasm binary's module-level structure (everything but
/// instruction-level lowering, which [`lower`] performs separately so
/// callers can inspect the decoded shape first).
pub fn decode(bytes: &[u8]) -> WResult<WasmModule> {
    if !is_wasm(bytes) {
        return Err(WasmError::new("input does not start with the wasm magic"));
    }
    let mut r = Reader::new(bytes);
    r.bytes(4)?; // magic
    let version = r.bytes(4)?;
    if version != [1, 0, 0, 0] {
        return Err(WasmError::new("unsupported wasm binary version"));
    }

    let mut wasm = WasmModule::default();
    while !r.eof() {
        let id = r.u8()?;
        let size = r.uleb32()? as usize;
        let section_bytes = r.bytes(size)?;
        let mut sr = Reader::new(section_bytes);
        match id {
            1 => decode_type_section(&mut sr, &mut wasm)?,
            2 => decode_import_section(&mut sr, &mut wasm)?,
            3 => decode_function_section(&mut sr, &mut wasm)?,
            5 => decode_memory_section(&mut sr, &mut wasm)?,
            6 => decode_global_section(&mut sr, &mut wasm)?,
            7 => decode_export_section(&mut sr, &mut wasm)?,
            10 => decode_code_section(&mut sr, &mut wasm)?,
            // Custom(0), Table(4), Start(8), Element(9), Data(11),
            // DataCount(12): not needed by this lowering (no table
            // calls, no start function invocation, no data-segment
            // application — linear memory is modeled as identity
            // addressing, see `lower`'s memory-access comment).
            _ => {}
        }
    }
    Ok(wasm)
}

fn decode_type_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        let tag = r.u8()?;
        if tag != 0x60 {
            return Err(WasmError::new("expected functype tag 0x60"));
        }
        let nparams = r.uleb32()?;
        let mut params = Vec::with_capacity(nparams as usize);
        for _ in 0..nparams {
            params.push(ValType::from_byte(r.u8()?)?);
        }
        let nresults = r.uleb32()?;
        let mut results = Vec::with_capacity(nresults as usize);
        for _ in 0..nresults {
            results.push(ValType::from_byte(r.u8()?)?);
        }
        wasm.types.push(FuncType { params, results });
    }
    Ok(())
}

fn decode_import_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        let module = r.name()?;
        let field = r.name()?;
        let kind = r.u8()?;
        let desc = match kind {
            0x00 => ImportDesc::Func(r.uleb32()?),
            0x01 => {
                r.u8()?; // reftype
                decode_limits(r)?;
                ImportDesc::Table
            }
            0x02 => {
                decode_limits(r)?;
                ImportDesc::Memory
            }
            0x03 => {
                let ty = ValType::from_byte(r.u8()?)?;
                let mutable = r.u8()? != 0;
                ImportDesc::Global(ty, mutable)
            }
            other => return Err(WasmError::new(format!("unsupported import kind {other}"))),
        };
        wasm.imports.push(Import { module, field, desc });
    }
    Ok(())
}

fn decode_limits(r: &mut Reader<'_>) -> WResult<(u32, Option<u32>)> {
    let flag = r.u8()?;
    let min = r.uleb32()?;
    let max = if flag == 1 { Some(r.uleb32()?) } else { None };
    Ok((min, max))
}

fn decode_function_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        wasm.func_types.push(r.uleb32()?);
    }
    Ok(())
}

fn decode_memory_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        wasm.memories.push(decode_limits(r)?);
    }
    Ok(())
}

fn decode_const_expr(r: &mut Reader<'_>) -> WResult<ConstExpr> {
    let op = r.u8()?;
    let expr = match op {
        0x41 => ConstExpr::I32(r.sleb32()?),
        0x42 => ConstExpr::I64(r.sleb64()?),
        0x43 => ConstExpr::F32(r.f32()?),
        0x44 => ConstExpr::F64(r.f64()?),
        0x23 => ConstExpr::GlobalGet(r.uleb32()?),
        other => return Err(WasmError::new(format!("unsupported constant expr opcode 0x{other:02x}"))),
    };
    let end = r.u8()?;
    if end != 0x0b {
        return Err(WasmError::new("malformed constant expression (missing end)"));
    }
    Ok(expr)
}

fn decode_global_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        let ty = ValType::from_byte(r.u8()?)?;
        let mutable = r.u8()? != 0;
        let init = decode_const_expr(r)?;
        wasm.globals.push(GlobalDef { ty, mutable, init });
    }
    Ok(())
}

fn decode_export_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        let name = r.name()?;
        let kind = match r.u8()? {
            0x00 => ExportKind::Func,
            0x01 => ExportKind::Table,
            0x02 => ExportKind::Memory,
            0x03 => ExportKind::Global,
            other => return Err(WasmError::new(format!("unsupported export kind {other}"))),
        };
        let index = r.uleb32()?;
        wasm.exports.push(Export { name, kind, index });
    }
    Ok(())
}

fn decode_code_section(r: &mut Reader<'_>, wasm: &mut WasmModule) -> WResult<()> {
    let count = r.uleb32()?;
    for _ in 0..count {
        let body_size = r.uleb32()? as usize;
        let body_bytes = r.bytes(body_size)?;
        let mut br = Reader::new(body_bytes);
        let nlocal_groups = br.uleb32()?;
        let mut locals = Vec::new();
        for _ in 0..nlocal_groups {
            let n = br.uleb32()?;
            let ty = ValType::from_byte(br.u8()?)?;
            for _ in 0..n {
                locals.push(ty);
            }
        }
        let code = body_bytes[br.pos..].to_vec();
        wasm.code.push(FuncBody { locals, code });
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Stack-machine-to-IR lowering
// ---------------------------------------------------------------------

enum CtrlKind {
    Block,
    Loop,
    If { else_block: BlockId, saw_else: bool },
}

struct CtrlFrame {
    kind: CtrlKind,
    /// Branch target: the merge block for `block`/`if`, the header for `loop`.
    header: BlockId,
    merge: BlockId,
    result_ty: Option<ValType>,
    result_slot: Option<VReg>,
}

struct Lowerer<'a, 'm> {
    module: &'m mut Module<'a>,
    fid: FunctionId,
    current: BlockId,
    value_stack: Vec<(Operand<'a>, ValType)>,
    ctrl_stack: Vec<CtrlFrame>,
    locals: Vec<(VReg, ValType)>,
    func_ids: &'m [FunctionId],
    func_types: &'m [FuncType],
}

impl<'a, 'm> Lowerer<'a, 'm> {
    fn fresh_vreg(&mut self) -> VReg {
        self.module.function_mut(self.fid).fresh_vreg()
    }

    fn new_block(&mut self) -> BlockId {
        self.module.function_mut(self.fid).new_block()
    }

    fn push_instr_at(&mut self, block: BlockId, instr: Instruction<'a>) {
        self.module.function_mut(self.fid).block_mut(block).instructions.push(instr);
    }

    fn push_instr(&mut self, instr: Instruction<'a>) {
        self.push_instr_at(self.current, instr);
    }

    fn emit(&mut self, opcode: Opcode, ty: ValType, operands: Vec<Operand<'a>>) -> Operand<'a> {
        let dest = self.fresh_vreg();
        self.push_instr(Instruction::new(opcode, ty.ir(), dest, operands));
        Operand::VReg(dest)
    }

    fn emit_cast(&mut self, kind: CastKind, src_ty: ValType, dst_ty: ValType, val: Operand<'a>) -> Operand<'a> {
        let dest = self.fresh_vreg();
        self.push_instr(Instruction::new(
            Opcode::Cast(kind),
            dst_ty.ir(),
            dest,
            vec![Operand::Undef(src_ty.ir()), val],
        ));
        Operand::VReg(dest)
    }

    /// Every compare in wasm yields an i32 boolean, not liric's `i1`.
    fn emit_bool_to_i32(&mut self, cmp: Operand<'a>) -> Operand<'a> {
        self.emit_cast(CastKind::Zext, ValType::I32, ValType::I32, cmp)
        // the cast's recorded "src type" is cosmetic here (i1 has no
        // ValType counterpart); what matters is result_ty = i32 and the
        // cast kind widens a 1-bit value.
    }

    fn push(&mut self, op: Operand<'a>, ty: ValType) {
        self.value_stack.push((op, ty));
    }

    fn pop(&mut self) -> WResult<(Operand<'a>, ValType)> {
        self.value_stack.pop().ok_or_else(|| WasmError::new("value stack underflow"))
    }

    fn set_unreachable_tail(&mut self) {
        // After a terminator, subsequent decoded instructions until the
        // next structural boundary are unreachable; give them a fresh
        // block to live in so `current`'s one-terminator invariant holds.
        self.current = self.new_block();
    }
}

/// Lowers every locally defined function body in `wasm` into `module`,
/// invoking `on_function` once per completed function (mirroring the
/// textual frontend's streaming callback).
pub fn lower<'a>(
    wasm: &WasmModule,
    module: &mut Module<'a>,
    mut on_function: impl FnMut(&Module<'a>, FunctionId),
) -> WResult<()> {
    let func_count = wasm.imports.iter().filter(|i| matches!(i.desc, ImportDesc::Func(_))).count() + wasm.func_types.len();
    let mut func_ids: Vec<FunctionId> = Vec::with_capacity(func_count);
    let mut func_types: Vec<FuncType> = Vec::with_capacity(func_count);

    for import in &wasm.imports {
        if let ImportDesc::Func(type_idx) = import.desc {
            let ty = wasm.types.get(type_idx as usize).ok_or_else(|| WasmError::new("bad import type index"))?.clone();
            if ty.results.len() > 1 {
                return Err(WasmError::new("multi-value function results are unsupported"));
            }
            let ret_ty = ty.results.first().map(|v| v.ir()).unwrap_or(Type::Void);
            let param_tys: Vec<Type> = ty.params.iter().map(|v| v.ir()).collect();
            let name = format!("{}.{}", import.module, import.field);
            let fid = module.declare_function(&name, ret_ty, &param_tys, false);
            func_ids.push(fid);
            func_types.push(ty);
        }
    }

    for (local_idx, &type_idx) in wasm.func_types.iter().enumerate() {
        let ty = wasm.types.get(type_idx as usize).ok_or_else(|| WasmError::new("bad function type index"))?.clone();
        if ty.results.len() > 1 {
            return Err(WasmError::new("multi-value function results are unsupported"));
        }
        let ret_ty = ty.results.first().map(|v| v.ir()).unwrap_or(Type::Void);
        let param_tys: Vec<Type> = ty.params.iter().map(|v| v.ir()).collect();

        let abs_idx = func_ids.len() as u32;
        let name = wasm
            .exports
            .iter()
            .find(|e| e.kind == ExportKind::Func && e.index == abs_idx)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| format!("wasm_func_{local_idx}"));

        let fid = module.declare_function(&name, ret_ty, &param_tys, false);
        func_ids.push(fid);
        func_types.push(ty);
    }

    for (local_idx, &type_idx) in wasm.func_types.iter().enumerate() {
        let abs_idx = wasm.imports.iter().filter(|i| matches!(i.desc, ImportDesc::Func(_))).count() + local_idx;
        let fid = func_ids[abs_idx];
        let ty = wasm.types[type_idx as usize].clone();
        let body = &wasm.code[local_idx];
        lower_function(module, fid, &ty, body, &func_ids, &func_types)?;
        on_function(module, fid);
    }

    Ok(())
}

fn lower_function<'a>(
    module: &mut Module<'a>,
    fid: FunctionId,
    ty: &FuncType,
    body: &FuncBody,
    func_ids: &[FunctionId],
    func_types: &[FuncType],
) -> WResult<()> {
    module.function_mut(fid).begin_definition();
    let entry = liric_ir::ENTRY_BLOCK;
    let param_vregs = module.function(fid).param_vregs.clone();

    let mut lw = Lowerer {
        module,
        fid,
        current: entry,
        value_stack: Vec::new(),
        ctrl_stack: Vec::new(),
        locals: Vec::new(),
        func_ids,
        func_types,
    };

    for (i, &param_ty) in ty.params.iter().enumerate() {
        let slot = lw.fresh_vreg();
        lw.push_instr_at(entry, Instruction::new(Opcode::Alloca, param_ty.ir(), slot, vec![]));
        lw.push_instr_at(
            entry,
            Instruction::new(Opcode::Store, param_ty.ir(), liric_ir::VOID_VREG, vec![Operand::VReg(param_vregs[i]), Operand::VReg(slot)]),
        );
        lw.locals.push((slot, param_ty));
    }
    for &local_ty in &body.locals {
        let slot = lw.fresh_vreg();
        lw.push_instr_at(entry, Instruction::new(Opcode::Alloca, local_ty.ir(), slot, vec![]));
        let zero = match local_ty {
            ValType::F32 | ValType::F64 => Operand::ImmF64(0.0),
            _ => Operand::ImmI64(0),
        };
        lw.push_instr_at(
            entry,
            Instruction::new(Opcode::Store, local_ty.ir(), liric_ir::VOID_VREG, vec![zero, Operand::VReg(slot)]),
        );
        lw.locals.push((slot, local_ty));
    }

    let result_ty = ty.results.first().copied();
    lower_instructions(&mut lw, &body.code, result_ty)?;
    Ok(())
}

fn lower_instructions<'a>(lw: &mut Lowerer<'a, '_>, code: &[u8], func_result: Option<ValType>) -> WResult<()> {
    let mut r = Reader::new(code);
    while !r.eof() {
        let op = r.u8()?;
        match op {
            0x00 => {
                lw.push_instr(Instruction::new(Opcode::Unreachable, Type::Void, liric_ir::VOID_VREG, vec![]));
                lw.set_unreachable_tail();
            }
            0x01 => {} // nop
            0x02 | 0x03 | 0x04 => lower_block_like(lw, op, &mut r)?,
            0x05 => lower_else(lw)?,
            0x0b => {
                if r.eof() {
                    // function's implicit final `end`
                    finish_function(lw, func_result)?;
                } else {
                    lower_end(lw)?;
                }
            }
            0x0c => lower_br(lw, r.uleb32()?)?,
            0x0d => lower_br_if(lw, r.uleb32()?)?,
            0x0f => lower_return(lw, func_result)?,
            0x10 => lower_call(lw, r.uleb32()?)?,
            0x1a => {
                lw.pop()?;
            }
            0x1b => lower_select(lw)?,
            0x20 => {
                let idx = r.uleb32()? as usize;
                let (slot, ty) = lw.locals[idx];
                let v = lw.emit(Opcode::Load, ty, vec![Operand::VReg(slot)]);
                lw.push(v, ty);
            }
            0x21 => {
                let idx = r.uleb32()? as usize;
                let (slot, ty) = lw.locals[idx];
                let (v, _) = lw.pop()?;
                lw.push_instr(Instruction::new(Opcode::Store, ty.ir(), liric_ir::VOID_VREG, vec![v, Operand::VReg(slot)]));
            }
            0x22 => {
                let idx = r.uleb32()? as usize;
                let (slot, ty) = lw.locals[idx];
                let (v, _) = lw.pop()?;
                lw.push_instr(Instruction::new(Opcode::Store, ty.ir(), liric_ir::VOID_VREG, vec![v, Operand::VReg(slot)]));
                lw.push(v, ty);
            }
            0x23 => {
                let idx = r.uleb32()?;
                let sym = lw.module.symbols().lookup(&global_name(idx)).ok_or_else(|| WasmError::new("unknown global"))?;
                let ty = lw.module.global(lw.module.find_global(&global_name(idx)).unwrap()).ty;
                let vt = ir_ty_to_valtype(ty)?;
                let v = lw.emit(Opcode::Load, vt, vec![Operand::Global(sym, 0)]);
                lw.push(v, vt);
            }
            0x24 => {
                let idx = r.uleb32()?;
                let sym = lw.module.symbols().lookup(&global_name(idx)).ok_or_else(|| WasmError::new("unknown global"))?;
                let ty = lw.module.global(lw.module.find_global(&global_name(idx)).unwrap()).ty;
                let vt = ir_ty_to_valtype(ty)?;
                let (v, _) = lw.pop()?;
                lw.push_instr(Instruction::new(Opcode::Store, vt.ir(), liric_ir::VOID_VREG, vec![v, Operand::Global(sym, 0)]));
            }
            0x28..=0x35 => lower_load(lw, op, &mut r)?,
            0x36..=0x3e => lower_store(lw, op, &mut r)?,
            0x41 => {
                let v = r.sleb32()?;
                lw.push(Operand::ImmI64(v as i64), ValType::I32);
            }
            0x42 => {
                let v = r.sleb64()?;
                lw.push(Operand::ImmI64(v), ValType::I64);
            }
            0x43 => {
                let v = r.f32()?;
                lw.push(Operand::ImmF64(v as f64), ValType::F32);
            }
            0x44 => {
                let v = r.f64()?;
                lw.push(Operand::ImmF64(v), ValType::F64);
            }
            0x45 | 0x50 => lower_eqz(lw, op)?,
            0x46..=0x4f | 0x51..=0x5a => lower_icmp(lw, op)?,
            0x5b..=0x66 => lower_fcmp(lw, op)?,
            0x6a..=0x78 => lower_ibinop(lw, op, ValType::I32)?,
            0x7c..=0x8a => lower_ibinop(lw, op, ValType::I64)?,
            0x8c => lower_funop(lw, ValType::F32)?,
            0x92..=0x95 => lower_fbinop(lw, op, ValType::F32)?,
            0x9a => lower_funop(lw, ValType::F64)?,
            0xa0..=0xa3 => lower_fbinop(lw, op, ValType::F64)?,
            0xa7 => lower_conv(lw, CastKind::Trunc, ValType::I64, ValType::I32)?,
            0xa8 => lower_conv(lw, CastKind::FPToSI, ValType::F32, ValType::I32)?,
            0xa9 => lower_conv(lw, CastKind::FPToUI, ValType::F32, ValType::I32)?,
            0xaa => lower_conv(lw, CastKind::FPToSI, ValType::F64, ValType::I32)?,
            0xab => lower_conv(lw, CastKind::FPToUI, ValType::F64, ValType::I32)?,
            0xac => lower_conv(lw, CastKind::Sext, ValType::I32, ValType::I64)?,
            0xad => lower_conv(lw, CastKind::Zext, ValType::I32, ValType::I64)?,
            0xae => lower_conv(lw, CastKind::FPToSI, ValType::F32, ValType::I64)?,
            0xaf => lower_conv(lw, CastKind::FPToUI, ValType::F32, ValType::I64)?,
            0xb0 => lower_conv(lw, CastKind::FPToSI, ValType::F64, ValType::I64)?,
            0xb1 => lower_conv(lw, CastKind::FPToUI, ValType::F64, ValType::I64)?,
            0xb2 => lower_conv(lw, CastKind::SIToFP, ValType::I32, ValType::F32)?,
            0xb3 => lower_conv(lw, CastKind::UIToFP, ValType::I32, ValType::F32)?,
            0xb4 => lower_conv(lw, CastKind::SIToFP, ValType::I64, ValType::F32)?,
            0xb5 => lower_conv(lw, CastKind::UIToFP, ValType::I64, ValType::F32)?,
            0xb6 => lower_conv(lw, CastKind::FPTrunc, ValType::F64, ValType::F32)?,
            0xb7 => lower_conv(lw, CastKind::SIToFP, ValType::I32, ValType::F64)?,
            0xb8 => lower_conv(lw, CastKind::UIToFP, ValType::I32, ValType::F64)?,
            0xb9 => lower_conv(lw, CastKind::SIToFP, ValType::I64, ValType::F64)?,
            0xba => lower_conv(lw, CastKind::UIToFP, ValType::I64, ValType::F64)?,
            0xbb => lower_conv(lw, CastKind::FPExt, ValType::F32, ValType::F64)?,
            0xbc => lower_conv(lw, CastKind::Bitcast, ValType::F32, ValType::I32)?,
            0xbd => lower_conv(lw, CastKind::Bitcast, ValType::F64, ValType::I64)?,
            0xbe => lower_conv(lw, CastKind::Bitcast, ValType::I32, ValType::F32)?,
            0xbf => lower_conv(lw, CastKind::Bitcast, ValType::I64, ValType::F64)?,
            other => return Err(WasmError::new(format!("unsupported wasm opcode 0x{other:02x}"))),
        }
    }
    Ok(())
}

fn global_name(idx: u32) -> String {
    format!("__wasm_global_{idx}")
}

fn ir_ty_to_valtype(ty: Type) -> WResult<ValType> {
    match ty {
        Type::I32 => Ok(ValType::I32),
        Type::I64 => Ok(ValType::I64),
        Type::F32 => Ok(ValType::F32),
        Type::F64 => Ok(ValType::F64),
        _ => Err(WasmError::new("global has a non-numeric wasm type")),
    }
}

fn read_blocktype(r: &mut Reader<'_>, func_types: &[FuncType]) -> WResult<Option<ValType>> {
    let raw = r.sleb64()?;
    match raw {
        -64 => Ok(None),
        -1 => Ok(Some(ValType::I32)),
        -2 => Ok(Some(ValType::I64)),
        -3 => Ok(Some(ValType::F32)),
        -4 => Ok(Some(ValType::F64)),
        n if n >= 0 => {
            let ty = func_types.get(n as usize).ok_or_else(|| WasmError::new("bad block type index"))?;
            if !ty.params.is_empty() || ty.results.len() > 1 {
                return Err(WasmError::new("multi-value block types are unsupported"));
            }
            Ok(ty.results.first().copied())
        }
        _ => Err(WasmError::new("malformed block type")),
    }
}

fn lower_block_like<'a>(lw: &mut Lowerer<'a, '_>, op: u8, r: &mut Reader<'_>) -> WResult<()> {
    let result_ty = read_blocktype(r, lw.func_types)?;
    let result_slot = result_ty.map(|ty| {
        let slot = lw.fresh_vreg();
        let entry = liric_ir::ENTRY_BLOCK;
        lw.push_instr_at(entry, Instruction::new(Opcode::Alloca, ty.ir(), slot, vec![]));
        slot
    });

    match op {
        0x02 => {
            let merge = lw.new_block();
            lw.ctrl_stack.push(CtrlFrame { kind: CtrlKind::Block, header: merge, merge, result_ty, result_slot });
        }
        0x03 => {
            let header = lw.new_block();
            let merge = lw.new_block();
            lw.push_instr(Instruction::new(Opcode::Br, Type::Void, liric_ir::VOID_VREG, vec![Operand::Block(header)]));
            lw.current = header;
            lw.ctrl_stack.push(CtrlFrame { kind: CtrlKind::Loop, header, merge, result_ty, result_slot });
        }
        0x04 => {
            let (cond, _) = lw.pop()?;
            let zero = Operand::ImmI64(0);
            let cond_dest = lw.fresh_vreg();
            let mut cmp = Instruction::new(Opcode::ICmp, Type::I1, cond_dest, vec![Operand::Undef(Type::I32), cond, zero]);
            cmp.icmp_pred = Some(ICmpPredicate::Ne);
            lw.push_instr(cmp);

            let then_block = lw.new_block();
            let else_block = lw.new_block();
            let merge = lw.new_block();
            lw.push_instr(Instruction::new(
                Opcode::CondBr,
                Type::Void,
                liric_ir::VOID_VREG,
                vec![Operand::VReg(cond_dest), Operand::Block(then_block), Operand::Block(else_block)],
            ));
            lw.current = then_block;
            lw.ctrl_stack.push(CtrlFrame {
                kind: CtrlKind::If { else_block, saw_else: false },
                header: merge,
                merge,
                result_ty,
                result_slot,
            });
        }
        _ => unreachable!(),
    }
    Ok(())
}

fn close_fallthrough<'a>(lw: &mut Lowerer<'a, '_>, frame: &CtrlFrame, target: BlockId) -> WResult<()> {
    if frame.result_ty.is_some() {
        let (v, _) = lw.pop()?;
        let slot = frame.result_slot.unwrap();
        lw.push_instr(Instruction::new(Opcode::Store, frame.result_ty.unwrap().ir(), liric_ir::VOID_VREG, vec![v, Operand::VReg(slot)]));
    }
    lw.push_instr(Instruction::new(Opcode::Br, Type::Void, liric_ir::VOID_VREG, vec![Operand::Block(target)]));
    Ok(())
}

fn lower_else<'a>(lw: &mut Lowerer<'a, '_>) -> WResult<()> {
    let frame = lw.ctrl_stack.last_mut().ok_or_else(|| WasmError::new("`else` with no matching `if`"))?;
    let CtrlKind::If { else_block, saw_else } = &mut frame.kind else {
        return Err(WasmError::new("`else` without a matching `if`"));
    };
    *saw_else = true;
    let else_block = *else_block;
    let merge = lw.ctrl_stack.last().unwrap().merge;
    let frame_snapshot = CtrlFrame {
        kind: CtrlKind::Block, // only result_ty/result_slot are read by close_fallthrough
        header: merge,
        merge,
        result_ty: lw.ctrl_stack.last().unwrap().result_ty,
        result_slot: lw.ctrl_stack.last().unwrap().result_slot,
    };
    close_fallthrough(lw, &frame_snapshot, merge)?;
    lw.current = else_block;
    Ok(())
}

fn lower_end<'a>(lw: &mut Lowerer<'a, '_>) -> WResult<()> {
    let frame = lw.ctrl_stack.pop().ok_or_else(|| WasmError::new("`end` with no matching block"))?;
    let target = match &frame.kind {
        CtrlKind::Loop => frame.merge,
        _ => frame.merge,
    };
    close_fallthrough(lw, &frame, target)?;

    if let CtrlKind::If { else_block, saw_else } = frame.kind {
        if !saw_else {
            lw.push_instr_at(else_block, Instruction::new(Opcode::Br, Type::Void, liric_ir::VOID_VREG, vec![Operand::Block(frame.merge)]));
        }
    }

    lw.current = frame.merge;
    if let Some(ty) = frame.result_ty {
        let slot = frame.result_slot.unwrap();
        let v = lw.emit(Opcode::Load, ty, vec![Operand::VReg(slot)]);
        lw.push(v, ty);
    }
    Ok(())
}

fn finish_function<'a>(lw: &mut Lowerer<'a, '_>, func_result: Option<ValType>) -> WResult<()> {
    if lw.module.function(lw.fid).block(lw.current).has_terminator() {
        return Ok(());
    }
    match func_result {
        Some(ty) => {
            let (v, _) = lw.pop()?;
            lw.push_instr(Instruction::new(Opcode::Ret, ty.ir(), liric_ir::VOID_VREG, vec![v]));
        }
        None => {
            lw.push_instr(Instruction::new(Opcode::RetVoid, Type::Void, liric_ir::VOID_VREG, vec![]));
        }
    }
    Ok(())
}

fn target_frame(lw: &Lowerer, label: u32) -> WResult<(BlockId, Option<ValType>, Option<VReg>)> {
    let idx = lw.ctrl_stack.len().checked_sub(1 + label as usize).ok_or_else(|| WasmError::new("bad branch label"))?;
    let frame = &lw.ctrl_stack[idx];
    let target = match frame.kind {
        CtrlKind::Loop => frame.header,
        _ => frame.merge,
    };
    Ok((target, frame.result_ty, frame.result_slot))
}

fn lower_br<'a>(lw: &mut Lowerer<'a, '_>, label: u32) -> WResult<()> {
    let (target, result_ty, slot) = target_frame(lw, label)?;
    if let Some(ty) = result_ty {
        let (v, _) = lw.pop()?;
        lw.push_instr(Instruction::new(Opcode::Store, ty.ir(), liric_ir::VOID_VREG, vec![v, Operand::VReg(slot.unwrap())]));
    }
    lw.push_instr(Instruction::new(Opcode::Br, Type::Void, liric_ir::VOID_VREG, vec![Operand::Block(target)]));
    lw.set_unreachable_tail();
    Ok(())
}

fn lower_br_if<'a>(lw: &mut Lowerer<'a, '_>, label: u32) -> WResult<()> {
    let (target, result_ty, slot) = target_frame(lw, label)?;
    let (cond, _) = lw.pop()?;
    let cond_dest = lw.fresh_vreg();
    let mut cmp = Instruction::new(Opcode::ICmp, Type::I1, cond_dest, vec![Operand::Undef(Type::I32), cond, Operand::ImmI64(0)]);
    cmp.icmp_pred = Some(ICmpPredicate::Ne);
    lw.push_instr(cmp);

    let taken = lw.new_block();
    let cont = lw.new_block();
    lw.push_instr(Instruction::new(
        Opcode::CondBr,
        Type::Void,
        liric_ir::VOID_VREG,
        vec![Operand::VReg(cond_dest), Operand::Block(taken), Operand::Block(cont)],
    ));

    if let Some(ty) = result_ty {
        let (v, _) = lw.value_stack.last().copied().ok_or_else(|| WasmError::new("value stack underflow"))?;
        lw.push_instr_at(taken, Instruction::new(Opcode::Store, ty.ir(), liric_ir::VOID_VREG, vec![v, Operand::VReg(slot.unwrap())]));
    }
    lw.push_instr_at(taken, Instruction::new(Opcode::Br, Type::Void, liric_ir::VOID_VREG, vec![Operand::Block(target)]));

    lw.current = cont;
    Ok(())
}

fn lower_return<'a>(lw: &mut Lowerer<'a, '_>, func_result: Option<ValType>) -> WResult<()> {
    match func_result {
        Some(ty) => {
            let (v, _) = lw.pop()?;
            lw.push_instr(Instruction::new(Opcode::Ret, ty.ir(), liric_ir::VOID_VREG, vec![v]));
        }
        None => {
            lw.push_instr(Instruction::new(Opcode::RetVoid, Type::Void, liric_ir::VOID_VREG, vec![]));
        }
    }
    lw.set_unreachable_tail();
    Ok(())
}

fn lower_call<'a>(lw: &mut Lowerer<'a, '_>, func_idx: u32) -> WResult<()> {
    let fid = *lw.func_ids.get(func_idx as usize).ok_or_else(|| WasmError::new("bad call target index"))?;
    let ty = lw.func_types[func_idx as usize].clone();
    let mut args = Vec::with_capacity(ty.params.len());
    for _ in 0..ty.params.len() {
        args.push(lw.pop()?);
    }
    args.reverse();

    let sym = lw.module.function(fid).symbol;
    let mut operands = vec![Operand::Global(sym, 0)];
    for (val, ty) in &args {
        operands.push(Operand::Undef(ty.ir()));
        operands.push(*val);
    }
    let ret_ty = ty.results.first().copied();
    let dest = if ret_ty.is_some() { lw.fresh_vreg() } else { liric_ir::VOID_VREG };
    let mut instr = Instruction::new(Opcode::Call, ret_ty.map(|t| t.ir()).unwrap_or(Type::Void), dest, operands);
    instr.call_flags = Some(liric_ir::CallFlags { external_abi: false, vararg: false, fixed_args: ty.params.len() as u32 });
    lw.push_instr(instr);
    if let Some(rt) = ret_ty {
        lw.push(Operand::VReg(dest), rt);
    }
    Ok(())
}

fn lower_select<'a>(lw: &mut Lowerer<'a, '_>) -> WResult<()> {
    let (cond, _) = lw.pop()?;
    let (b, ty) = lw.pop()?;
    let (a, _) = lw.pop()?;
    let cond_dest = lw.fresh_vreg();
    let mut cmp = Instruction::new(Opcode::ICmp, Type::I1, cond_dest, vec![Operand::Undef(Type::I32), cond, Operand::ImmI64(0)]);
    cmp.icmp_pred = Some(ICmpPredicate::Ne);
    lw.push_instr(cmp);
    let v = lw.emit(Opcode::Select, ty, vec![Operand::VReg(cond_dest), a, b]);
    lw.push(v, ty);
    Ok(())
}

fn lower_load<'a>(lw: &mut Lowerer<'a, '_>, op: u8, r: &mut Reader<'_>) -> WResult<()> {
    r.uleb32()?; // align, unused
    let offset = r.uleb32()? as i64;
    let (addr, _) = lw.pop()?;
    let addr64 = lw.emit_cast(CastKind::Zext, ValType::I32, ValType::I64, addr);
    let effective = lw.emit(Opcode::Add, ValType::I64, vec![addr64, Operand::ImmI64(offset)]);
    let ptr_dest = lw.fresh_vreg();
    lw.push_instr(Instruction::new(Opcode::Cast(CastKind::IntToPtr), Type::Ptr, ptr_dest, vec![Operand::Undef(Type::I64), effective]));
    let ptr = Operand::VReg(ptr_dest);

    let (load_ty, result_ty, ext): (Type, ValType, Option<CastKind>) = match op {
        0x28 => (Type::I32, ValType::I32, None),
        0x29 => (Type::I64, ValType::I64, None),
        0x2a => (Type::F32, ValType::F32, None),
        0x2b => (Type::F64, ValType::F64, None),
        0x2c => (Type::I8, ValType::I32, Some(CastKind::Sext)),
        0x2d => (Type::I8, ValType::I32, Some(CastKind::Zext)),
        0x2e => (Type::I16, ValType::I32, Some(CastKind::Sext)),
        0x2f => (Type::I16, ValType::I32, Some(CastKind::Zext)),
        0x30 => (Type::I8, ValType::I64, Some(CastKind::Sext)),
        0x31 => (Type::I8, ValType::I64, Some(CastKind::Zext)),
        0x32 => (Type::I16, ValType::I64, Some(CastKind::Sext)),
        0x33 => (Type::I16, ValType::I64, Some(CastKind::Zext)),
        0x34 => (Type::I32, ValType::I64, Some(CastKind::Sext)),
        0x35 => (Type::I32, ValType::I64, Some(CastKind::Zext)),
        other => return Err(WasmError::new(format!("unsupported load opcode 0x{other:02x}"))),
    };
    let loaded_dest = lw.fresh_vreg();
    lw.push_instr(Instruction::new(Opcode::Load, load_ty, loaded_dest, vec![ptr]));
    let loaded = Operand::VReg(loaded_dest);

    let v = match ext {
        Some(kind) => {
            let dest = lw.fresh_vreg();
            lw.push_instr(Instruction::new(Opcode::Cast(kind), result_ty.ir(), dest, vec![Operand::Undef(load_ty), loaded]));
            Operand::VReg(dest)
        }
        None => loaded,
    };
    lw.push(v, result_ty);
    Ok(())
}

fn lower_store<'a>(lw: &mut Lowerer<'a, '_>, op: u8, r: &mut Reader<'_>) -> WResult<()> {
    r.uleb32()?; // align, unused
    let offset = r.uleb32()? as i64;
    let (val, val_ty) = lw.pop()?;
    let (addr, _) = lw.pop()?;
    let addr64 = lw.emit_cast(CastKind::Zext, ValType::I32, ValType::I64, addr);
    let effective = lw.emit(Opcode::Add, ValType::I64, vec![addr64, Operand::ImmI64(offset)]);
    let ptr_dest = lw.fresh_vreg();
    lw.push_instr(Instruction::new(Opcode::Cast(CastKind::IntToPtr), Type::Ptr, ptr_dest, vec![Operand::Undef(Type::I64), effective]));
    let ptr = Operand::VReg(ptr_dest);

    let store_ty = match op {
        0x36 => Type::I32,
        0x37 => Type::I64,
        0x38 => Type::F32,
        0x39 => Type::F64,
        0x3a => Type::I8,
        0x3b => Type::I16,
        0x3c => Type::I8,
        0x3d => Type::I16,
        0x3e => Type::I32,
        other => return Err(WasmError::new(format!("unsupported store opcode 0x{other:02x}"))),
    };
    let narrowed = if store_ty == val_ty.ir() {
        val
    } else {
        let dest = lw.fresh_vreg();
        lw.push_instr(Instruction::new(Opcode::Cast(CastKind::Trunc), store_ty, dest, vec![Operand::Undef(val_ty.ir()), val]));
        Operand::VReg(dest)
    };
    lw.push_instr(Instruction::new(Opcode::Store, store_ty, liric_ir::VOID_VREG, vec![narrowed, ptr]));
    Ok(())
}

fn lower_eqz<'a>(lw: &mut Lowerer<'a, '_>, op: u8) -> WResult<()> {
    let ty = if op == 0x45 { ValType::I32 } else { ValType::I64 };
    let (v, _) = lw.pop()?;
    let dest = lw.fresh_vreg();
    let mut cmp = Instruction::new(Opcode::ICmp, Type::I1, dest, vec![Operand::Undef(ty.ir()), v, Operand::ImmI64(0)]);
    cmp.icmp_pred = Some(ICmpPredicate::Eq);
    lw.push_instr(cmp);
    let boolean = lw.emit_bool_to_i32(Operand::VReg(dest));
    lw.push(boolean, ValType::I32);
    Ok(())
}

fn lower_icmp<'a>(lw: &mut Lowerer<'a, '_>, op: u8) -> WResult<()> {
    let (ty, pred) = icmp_opcode_table(op);
    let (rhs, _) = lw.pop()?;
    let (lhs, _) = lw.pop()?;
    let dest = lw.fresh_vreg();
    let mut cmp = Instruction::new(Opcode::ICmp, Type::I1, dest, vec![Operand::Undef(ty.ir()), lhs, rhs]);
    cmp.icmp_pred = Some(pred);
    lw.push_instr(cmp);
    let boolean = lw.emit_bool_to_i32(Operand::VReg(dest));
    lw.push(boolean, ValType::I32);
    Ok(())
}

fn icmp_opcode_table(op: u8) -> (ValType, ICmpPredicate) {
    use ICmpPredicate::*;
    match op {
        0x46 => (ValType::I32, Eq),
        0x47 => (ValType::I32, Ne),
        0x48 => (ValType::I32, Slt),
        0x49 => (ValType::I32, Ult),
        0x4a => (ValType::I32, Sgt),
        0x4b => (ValType::I32, Ugt),
        0x4c => (ValType::I32, Sle),
        0x4d => (ValType::I32, Ule),
        0x4e => (ValType::I32, Sge),
        0x4f => (ValType::I32, Uge),
        0x51 => (ValType::I64, Eq),
        0x52 => (ValType::I64, Ne),
        0x53 => (ValType::I64, Slt),
        0x54 => (ValType::I64, Ult),
        0x55 => (ValType::I64, Sgt),
        0x56 => (ValType::I64, Ugt),
        0x57 => (ValType::I64, Sle),
        0x58 => (ValType::I64, Ule),
        0x59 => (ValType::I64, Sge),
        0x5a => (ValType::I64, Uge),
        _ => unreachable!(),
    }
}

fn lower_fcmp<'a>(lw: &mut Lowerer<'a, '_>, op: u8) -> WResult<()> {
    use FCmpPredicate::*;
    let (ty, pred) = match op {
        0x5b => (ValType::F32, Oeq),
        0x5c => (ValType::F32, One),
        0x5d => (ValType::F32, Olt),
        0x5e => (ValType::F32, Ogt),
        0x5f => (ValType::F32, Ole),
        0x60 => (ValType::F32, Oge),
        0x61 => (ValType::F64, Oeq),
        0x62 => (ValType::F64, One),
        0x63 => (ValType::F64, Olt),
        0x64 => (ValType::F64, Ogt),
        0x65 => (ValType::F64, Ole),
        0x66 => (ValType::F64, Oge),
        _ => unreachable!(),
    };
    let (rhs, _) = lw.pop()?;
    let (lhs, _) = lw.pop()?;
    let dest = lw.fresh_vreg();
    let mut cmp = Instruction::new(Opcode::FCmp, Type::I1, dest, vec![Operand::Undef(ty.ir()), lhs, rhs]);
    cmp.fcmp_pred = Some(pred);
    lw.push_instr(cmp);
    let boolean = lw.emit_bool_to_i32(Operand::VReg(dest));
    lw.push(boolean, ValType::I32);
    Ok(())
}

fn lower_ibinop<'a>(lw: &mut Lowerer<'a, '_>, op: u8, ty: ValType) -> WResult<()> {
    debug_assert!(ty.is_int());
    let base = if ty == ValType::I32 { 0x6a } else { 0x7c };
    let opcode = match op - base {
        0 => Opcode::Add,
        1 => Opcode::Sub,
        2 => Opcode::Mul,
        3 => Opcode::SDiv,
        4 => Opcode::UDiv,
        5 => Opcode::SRem,
        6 => Opcode::URem,
        7 => Opcode::And,
        8 => Opcode::Or,
        9 => Opcode::Xor,
        10 => Opcode::Shl,
        11 => Opcode::AShr,
        12 => Opcode::LShr,
        other => return Err(WasmError::new(format!("unsupported integer binop offset {other}"))),
    };
    let (rhs, _) = lw.pop()?;
    let (lhs, _) = lw.pop()?;
    let v = lw.emit(opcode, ty, vec![lhs, rhs]);
    lw.push(v, ty);
    Ok(())
}

fn lower_fbinop<'a>(lw: &mut Lowerer<'a, '_>, op: u8, ty: ValType) -> WResult<()> {
    let base = if ty == ValType::F32 { 0x92 } else { 0xa0 };
    let opcode = match op - base {
        0 => Opcode::FAdd,
        1 => Opcode::FSub,
        2 => Opcode::FMul,
        3 => Opcode::FDiv,
        other => return Err(WasmError::new(format!("unsupported float binop offset {other}"))),
    };
    let (rhs, _) = lw.pop()?;
    let (lhs, _) = lw.pop()?;
    let v = lw.emit(opcode, ty, vec![lhs, rhs]);
    lw.push(v, ty);
    Ok(())
}

fn lower_funop<'a>(lw: &mut Lowerer<'a, '_>, ty: ValType) -> WResult<()> {
    let (v, _) = lw.pop()?;
    let r = lw.emit(Opcode::FNeg, ty, vec![v]);
    lw.push(r, ty);
    Ok(())
}

fn lower_conv<'a>(lw: &mut Lowerer<'a, '_>, kind: CastKind, src: ValType, dst: ValType) -> WResult<()> {
    let (v, _) = lw.pop()?;
    let r = lw.emit_cast(kind, src, dst, v);
    lw.push(r, dst);
    Ok(())
}

/// Decodes and lowers `bytes` into `module` in one step, declaring a
/// synthetic global per wasm global definition so `global.get`/
/// `global.set` have something to address.
pub fn parse<'a>(bytes: &[u8], module: &mut Module<'a>) -> WResult<()> {
    parse_streaming(bytes, module, |_, _| {})
}

pub fn parse_streaming<'a>(
    bytes: &[u8],
    module: &mut Module<'a>,
    on_function: impl FnMut(&Module<'a>, FunctionId),
) -> WResult<()> {
    let wasm = decode(bytes)?;
    for (idx, g) in wasm.globals.iter().enumerate() {
        let init: Vec<u8> = match g.init {
            ConstExpr::I32(v) => (v as i64).to_le_bytes().to_vec(),
            ConstExpr::I64(v) => v.to_le_bytes().to_vec(),
            ConstExpr::F32(v) => (v as f64).to_le_bytes().to_vec(),
            ConstExpr::F64(v) => v.to_le_bytes().to_vec(),
            ConstExpr::GlobalGet(_) => vec![0; 8],
        };
        module.declare_global(
            &global_name(idx as u32),
            g.ty.ir(),
            Some(&init),
            liric_ir::GlobalFlags { is_const: !g.mutable, is_external: false, is_local: true },
        );
    }
    lower(&wasm, module, on_function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liric_arena::Arena;

    fn encode_section(id: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![id];
        out.extend(uleb(payload.len() as u32));
        out.extend_from_slice(payload);
        out
    }

    fn uleb(mut v: u32) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
        out
    }

    fn sleb(mut v: i64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
            if done {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
        out
    }

    // (func (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)
    fn add_module_bytes() -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend([1, 0, 0, 0]);

        let mut type_sec = uleb(1);
        type_sec.push(0x60);
        type_sec.extend(uleb(2));
        type_sec.push(0x7f);
        type_sec.push(0x7f);
        type_sec.extend(uleb(1));
        type_sec.push(0x7f);
        bytes.extend(encode_section(1, &type_sec));

        let mut func_sec = uleb(1);
        func_sec.extend(uleb(0));
        bytes.extend(encode_section(3, &func_sec));

        let mut export_sec = uleb(1);
        export_sec.extend(uleb(3));
        export_sec.extend(b"add");
        export_sec.push(0x00);
        export_sec.extend(uleb(0));
        bytes.extend(encode_section(7, &export_sec));

        let mut body = uleb(0); // no extra locals
        body.push(0x20);
        body.extend(uleb(0));
        body.push(0x20);
        body.extend(uleb(1));
        body.push(0x6a); // i32.add
        body.push(0x0b); // end

        let mut code_sec = uleb(1);
        code_sec.extend(uleb(body.len() as u32));
        code_sec.extend(body);
        bytes.extend(encode_section(10, &code_sec));

        bytes
    }

    #[test]
    fn recognizes_magic() {
        assert!(is_wasm(&add_module_bytes()));
        assert!(!is_wasm(b"define i32 @f()"));
    }

    #[test]
    fn decodes_add_function_shape() {
        let wasm = decode(&add_module_bytes()).unwrap();
        assert_eq!(wasm.types.len(), 1);
        assert_eq!(wasm.func_types, vec![0]);
        assert_eq!(wasm.exports[0].name, "add");
        assert_eq!(wasm.code.len(), 1);
    }

    #[test]
    fn lowers_add_function_to_ir() {
        let arena = Arena::new();
        let mut module = Module::new(&arena, "m");
        parse(&add_module_bytes(), &mut module).unwrap();
        let fid = module.find_function("add").unwrap();
        let func = module.function(fid);
        assert!(!func.is_decl);
        assert_eq!(func.ret_ty, Type::I32);
        let last = func.block(liric_ir::ENTRY_BLOCK).instructions.last().unwrap();
        assert_eq!(last.opcode, Opcode::Ret);
    }

    #[test]
    fn sleb_blocktype_round_trips_through_helper() {
        assert_eq!(sleb(-64), vec![0x40]);
        assert_eq!(sleb(-1), vec![0x7f]);
    }
}
