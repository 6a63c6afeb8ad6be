//! Input adapter: `.wasm`/`.wat` files to the structured module IR
//!
//! Decoding goes through wasmparser; `.wat` text is lowered to binary with
//! the `wat` crate first. The flat operator stream is rebuilt into nested
//! expressions, with branch depths resolved to synthesized label names
//! (`$B0`, `$L1`, `$I2`, function level `$func`). Debug names from the
//! `name` custom section override the synthesized `$f<n>`/`$p<n>`/`$l<n>`
//! bindings when present.

use crate::errors::{WasmatiError, WasmatiResult};
use crate::ir::{ConstValue, Expr, ExprId, ExprKind, FuncIr, ModuleIr, ValueType};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use wasmparser::{
    BlockType, CompositeType, ExternalKind, FunctionBody, Name, NameSectionReader, Operator,
    Parser, Payload, TypeRef, ValType, Validator,
};

/// Label every branch can name without being inside any block: the
/// function body itself. The CFG builder maps it to the return sink.
pub const FUNC_LEVEL_LABEL: &str = "$func";

#[derive(Debug, Clone, Copy, Default)]
pub struct FrontendOptions {
    pub force_wat: bool,
    pub force_wasm: bool,
    /// Run the wasmparser validator before decoding (`--no-check` clears).
    pub validate: bool,
}

impl FrontendOptions {
    pub fn checked() -> FrontendOptions {
        FrontendOptions {
            validate: true,
            ..Default::default()
        }
    }
}

/// Load a module from disk, deciding the format by flag or extension.
pub fn load_module(path: &Path, opts: &FrontendOptions) -> WasmatiResult<ModuleIr> {
    let is_wat = opts.force_wat
        || (!opts.force_wasm
            && matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("wat") | Some("wast")
            ));
    let bytes = if is_wat {
        wat::parse_file(path)?
    } else if opts.force_wasm
        || path.extension().and_then(|e| e.to_str()) == Some("wasm")
    {
        std::fs::read(path)?
    } else {
        return Err(WasmatiError::input(format!(
            "unable to determine input format of {} (use --wat or --wasm)",
            path.display()
        )));
    };
    module_from_bytes(&bytes, opts.validate)
}

/// Convenience entry for tests and the REPL: text straight to IR.
pub fn module_from_wat(text: &str, validate: bool) -> WasmatiResult<ModuleIr> {
    let bytes = wat::parse_str(text)?;
    module_from_bytes(&bytes, validate)
}

struct FuncSig {
    params: Vec<ValueType>,
    results: Vec<ValueType>,
}

/// Decode a binary module into the IR.
pub fn module_from_bytes(bytes: &[u8], validate: bool) -> WasmatiResult<ModuleIr> {
    if validate {
        Validator::new().validate_all(bytes)?;
    }

    let mut types: Vec<FuncSig> = Vec::new();
    let mut func_types: Vec<u32> = Vec::new(); // one entry per function, imports first
    let mut import_funcs = 0u32;
    let mut import_names: Vec<String> = Vec::new();
    let mut global_types: Vec<ValueType> = Vec::new();
    let mut exports: HashMap<u32, String> = HashMap::new();
    let mut bodies: Vec<FunctionBody> = Vec::new();
    let mut start = None;
    let mut module_name = None;
    let mut func_names: HashMap<u32, String> = HashMap::new();
    let mut local_names: HashMap<u32, HashMap<u32, String>> = HashMap::new();
    let mut global_names: HashMap<u32, String> = HashMap::new();

    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::TypeSection(reader) => {
                for group in reader {
                    for sub in group?.into_types() {
                        match sub.composite_type {
                            CompositeType::Func(f) => types.push(FuncSig {
                                params: f.params().iter().map(|t| val_type(*t)).collect::<WasmatiResult<_>>()?,
                                results: f.results().iter().map(|t| val_type(*t)).collect::<WasmatiResult<_>>()?,
                            }),
                            _ => {
                                return Err(WasmatiError::input(
                                    "GC composite types are not supported",
                                ))
                            }
                        }
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import?;
                    match import.ty {
                        TypeRef::Func(ty) => {
                            func_types.push(ty);
                            import_names
                                .push(format!("${}.{}", import.module, import.name));
                            import_funcs += 1;
                        }
                        TypeRef::Global(g) => global_types.push(val_type(g.content_type)?),
                        _ => {}
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                for ty in reader {
                    func_types.push(ty?);
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    global_types.push(val_type(global?.ty.content_type)?);
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    if export.kind == ExternalKind::Func {
                        exports.insert(export.index, export.name.to_string());
                    }
                }
            }
            Payload::StartSection { func, .. } => start = Some(func),
            Payload::CodeSectionEntry(body) => bodies.push(body),
            Payload::CustomSection(custom) if custom.name() == "name" => {
                let reader = NameSectionReader::new(custom.data(), custom.data_offset());
                for name in reader {
                    match name? {
                        Name::Module { name, .. } => module_name = Some(format!("${}", name)),
                        Name::Function(map) => {
                            for naming in map {
                                let naming = naming?;
                                func_names.insert(naming.index, format!("${}", naming.name));
                            }
                        }
                        Name::Local(map) => {
                            for indirect in map {
                                let indirect = indirect?;
                                let per_func =
                                    local_names.entry(indirect.index).or_default();
                                for naming in indirect.names {
                                    let naming = naming?;
                                    per_func
                                        .insert(naming.index, format!("${}", naming.name));
                                }
                            }
                        }
                        Name::Global(map) => {
                            for naming in map {
                                let naming = naming?;
                                global_names.insert(naming.index, format!("${}", naming.name));
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if bodies.len() + import_funcs as usize != func_types.len() {
        return Err(WasmatiError::input(format!(
            "module declares {} functions but carries {} bodies",
            func_types.len() as u32 - import_funcs,
            bodies.len()
        )));
    }

    let globals: Vec<(String, ValueType)> = global_types
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let name = global_names
                .get(&(i as u32))
                .cloned()
                .unwrap_or_else(|| format!("$g{}", i));
            (name, *ty)
        })
        .collect();

    let sig_of = |func_index: u32| -> &FuncSig { &types[func_types[func_index as usize] as usize] };
    let name_of = |func_index: u32| -> String {
        if let Some(name) = func_names.get(&func_index) {
            return name.clone();
        }
        if (func_index as usize) < import_names.len() {
            return import_names[func_index as usize].clone();
        }
        if let Some(name) = exports.get(&func_index) {
            return format!("${}", name);
        }
        format!("$f{}", func_index)
    };
    let resolved_names: Vec<String> = (0..func_types.len() as u32).map(|i| name_of(i)).collect();

    let mut funcs = Vec::with_capacity(func_types.len());
    let mut expr_ids = ExprIdGen::default();

    for index in 0..import_funcs {
        let sig = sig_of(index);
        funcs.push(FuncIr {
            name: name_of(index),
            index,
            params: sig
                .params
                .iter()
                .enumerate()
                .map(|(i, ty)| (format!("$p{}", i), *ty))
                .collect(),
            locals: Vec::new(),
            results: sig.results.clone(),
            is_import: true,
            is_export: exports.contains_key(&index),
            body: Vec::new(),
        });
    }

    for (body_index, body) in bodies.iter().enumerate() {
        let index = import_funcs + body_index as u32;
        let sig = sig_of(index);
        let names = local_names.get(&index);
        let binding = |slot: u32, fallback: String| -> String {
            names
                .and_then(|m| m.get(&slot))
                .cloned()
                .unwrap_or(fallback)
        };

        let params: Vec<(String, ValueType)> = sig
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| (binding(i as u32, format!("$p{}", i)), *ty))
            .collect();

        let mut locals = Vec::new();
        let mut slot = params.len() as u32;
        for group in body.get_locals_reader()? {
            let (count, ty) = group?;
            let ty = val_type(ty)?;
            for _ in 0..count {
                locals.push((binding(slot, format!("$l{}", slot)), ty));
                slot += 1;
            }
        }

        let mut decoder = BodyDecoder {
            types: &types,
            func_types: &func_types,
            func_names: &resolved_names,
            locals: {
                let mut all: Vec<String> = params.iter().map(|(n, _)| n.clone()).collect();
                all.extend(locals.iter().map(|(n, _)| n.clone()));
                all
            },
            globals: globals.iter().map(|(n, _)| n.clone()).collect(),
            expr_ids: &mut expr_ids,
            label_counter: 0,
        };
        let exprs = decoder.decode(body)?;

        funcs.push(FuncIr {
            name: name_of(index),
            index,
            params,
            locals,
            results: sig.results.clone(),
            is_import: false,
            is_export: exports.contains_key(&index),
            body: exprs,
        });
    }

    debug!(
        functions = funcs.len(),
        globals = globals.len(),
        "module decoded"
    );

    Ok(ModuleIr {
        name: module_name,
        globals,
        funcs,
        start,
    })
}

fn val_type(ty: ValType) -> WasmatiResult<ValueType> {
    match ty {
        ValType::I32 => Ok(ValueType::I32),
        ValType::I64 => Ok(ValueType::I64),
        ValType::F32 => Ok(ValueType::F32),
        ValType::F64 => Ok(ValueType::F64),
        other => Err(WasmatiError::input(format!(
            "unsupported value type {:?}",
            other
        ))),
    }
}

#[derive(Default)]
struct ExprIdGen {
    next: u32,
}

impl ExprIdGen {
    fn next(&mut self) -> ExprId {
        let id = ExprId(self.next);
        self.next += 1;
        id
    }
}

enum FrameKind {
    Block,
    Loop,
    If { nresults: u32, in_else: bool },
}

struct Frame {
    kind: FrameKind,
    label: String,
    nresults: u32,
    exprs: Vec<Expr>,
    else_exprs: Vec<Expr>,
}

struct BodyDecoder<'a> {
    types: &'a [FuncSig],
    func_types: &'a [u32],
    func_names: &'a [String],
    locals: Vec<String>,
    globals: Vec<String>,
    expr_ids: &'a mut ExprIdGen,
    label_counter: u32,
}

impl<'a> BodyDecoder<'a> {
    fn func_sig(&self, func_index: u32) -> (u32, u32) {
        let sig = &self.types[self.func_types[func_index as usize] as usize];
        (sig.params.len() as u32, sig.results.len() as u32)
    }

    fn decode(&mut self, body: &FunctionBody) -> WasmatiResult<Vec<Expr>> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut result: Vec<Expr> = Vec::new();

        for op in body.get_operators_reader()? {
            let op = op?;
            if let Operator::End = op {
                match frames.pop() {
                    None => break, // function end
                    Some(frame) => {
                        let expr = self.close_frame(frame);
                        self.push_expr(&mut frames, &mut result, expr);
                    }
                }
                continue;
            }
            if let Operator::Else = op {
                match frames.last_mut() {
                    Some(Frame {
                        kind: FrameKind::If { in_else, .. },
                        ..
                    }) => *in_else = true,
                    _ => return Err(WasmatiError::input("else outside of if")),
                }
                continue;
            }
            match self.lower(&op, &frames)? {
                Lowered::Expr(kind) => {
                    let expr = Expr {
                        id: self.expr_ids.next(),
                        kind,
                    };
                    self.push_expr(&mut frames, &mut result, expr);
                }
                Lowered::Open(kind, nresults) => {
                    let label = self.fresh_label(&kind);
                    frames.push(Frame {
                        kind,
                        label,
                        nresults,
                        exprs: Vec::new(),
                        else_exprs: Vec::new(),
                    });
                }
                Lowered::Skipped => {}
            }
        }

        Ok(result)
    }

    fn push_expr(&self, frames: &mut [Frame], result: &mut Vec<Expr>, expr: Expr) {
        match frames.last_mut() {
            Some(Frame {
                kind: FrameKind::If { in_else: true, .. },
                else_exprs,
                ..
            }) => else_exprs.push(expr),
            Some(frame) => frame.exprs.push(expr),
            None => result.push(expr),
        }
    }

    fn close_frame(&mut self, frame: Frame) -> Expr {
        let id = self.expr_ids.next();
        let kind = match frame.kind {
            FrameKind::Block => ExprKind::Block {
                label: frame.label,
                nresults: frame.nresults,
                body: frame.exprs,
            },
            FrameKind::Loop => ExprKind::Loop {
                label: frame.label,
                nresults: frame.nresults,
                body: frame.exprs,
            },
            FrameKind::If { nresults, .. } => ExprKind::If {
                label: frame.label,
                nresults,
                true_body: frame.exprs,
                false_body: frame.else_exprs,
            },
        };
        Expr { id, kind }
    }

    fn fresh_label(&mut self, kind: &FrameKind) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        match kind {
            FrameKind::Block => format!("$B{}", n),
            FrameKind::Loop => format!("$L{}", n),
            FrameKind::If { .. } => format!("$I{}", n),
        }
    }

    fn resolve_label(&self, frames: &[Frame], relative_depth: u32) -> String {
        let depth = relative_depth as usize;
        if depth < frames.len() {
            frames[frames.len() - 1 - depth].label.clone()
        } else {
            FUNC_LEVEL_LABEL.to_string()
        }
    }

    fn local_name(&self, index: u32) -> String {
        self.locals
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| format!("$l{}", index))
    }

    fn global_name(&self, index: u32) -> String {
        self.globals
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| format!("$g{}", index))
    }

    fn block_results(&self, blockty: &BlockType) -> u32 {
        match blockty {
            BlockType::Empty => 0,
            BlockType::Type(_) => 1,
            BlockType::FuncType(idx) => self
                .types
                .get(*idx as usize)
                .map(|sig| sig.results.len() as u32)
                .unwrap_or(0),
        }
    }

    fn lower(&mut self, op: &Operator, frames: &[Frame]) -> WasmatiResult<Lowered> {
        use ExprKind as K;
        let kind = match op {
            Operator::Nop => K::Nop,
            Operator::Unreachable => K::Unreachable,
            Operator::Return => K::Return,
            Operator::Drop => K::Drop,
            Operator::Select | Operator::TypedSelect { .. } => K::Select,
            Operator::MemorySize { .. } => K::MemorySize,
            Operator::MemoryGrow { .. } => K::MemoryGrow,

            Operator::Block { blockty } => {
                return Ok(Lowered::Open(FrameKind::Block, self.block_results(blockty)))
            }
            Operator::Loop { blockty } => {
                return Ok(Lowered::Open(FrameKind::Loop, self.block_results(blockty)))
            }
            Operator::If { blockty } => {
                let nresults = self.block_results(blockty);
                return Ok(Lowered::Open(
                    FrameKind::If {
                        nresults,
                        in_else: false,
                    },
                    nresults,
                ));
            }

            Operator::Br { relative_depth } => K::Br {
                label: self.resolve_label(frames, *relative_depth),
            },
            Operator::BrIf { relative_depth } => K::BrIf {
                label: self.resolve_label(frames, *relative_depth),
            },
            Operator::BrTable { targets } => {
                let mut labels = Vec::with_capacity(targets.len() as usize);
                for t in targets.targets() {
                    labels.push(self.resolve_label(frames, t?));
                }
                K::BrTable {
                    targets: labels,
                    default: self.resolve_label(frames, targets.default()),
                }
            }

            Operator::Call { function_index } => {
                let (nargs, nresults) = self.func_sig(*function_index);
                K::Call {
                    label: self.func_names[*function_index as usize].clone(),
                    nargs,
                    nresults,
                }
            }
            Operator::CallIndirect { type_index, .. } => {
                let sig = self
                    .types
                    .get(*type_index as usize)
                    .ok_or_else(|| WasmatiError::input("call_indirect to unknown type"))?;
                K::CallIndirect {
                    label: "$T0".to_string(),
                    nargs: sig.params.len() as u32,
                    nresults: sig.results.len() as u32,
                }
            }

            Operator::LocalGet { local_index } => K::LocalGet {
                label: self.local_name(*local_index),
            },
            Operator::LocalSet { local_index } => K::LocalSet {
                label: self.local_name(*local_index),
            },
            Operator::LocalTee { local_index } => K::LocalTee {
                label: self.local_name(*local_index),
            },
            Operator::GlobalGet { global_index } => K::GlobalGet {
                label: self.global_name(*global_index),
            },
            Operator::GlobalSet { global_index } => K::GlobalSet {
                label: self.global_name(*global_index),
            },

            Operator::I32Const { value } => K::Const(ConstValue::I32(*value as u32)),
            Operator::I64Const { value } => K::Const(ConstValue::I64(*value as u64)),
            Operator::F32Const { value } => K::Const(ConstValue::F32(value.bits())),
            Operator::F64Const { value } => K::Const(ConstValue::F64(value.bits())),

            _ => {
                if let Some((kind, mnemonic)) = classify_opcode(op) {
                    match kind {
                        OpClass::Binary => K::Binary {
                            opcode: mnemonic.to_string(),
                        },
                        OpClass::Compare => K::Compare {
                            opcode: mnemonic.to_string(),
                        },
                        OpClass::Convert => K::Convert {
                            opcode: mnemonic.to_string(),
                        },
                        OpClass::Unary => K::Unary {
                            opcode: mnemonic.to_string(),
                        },
                    }
                } else if let Some((mnemonic, offset, is_store)) = classify_memory(op) {
                    if is_store {
                        K::Store {
                            opcode: mnemonic.to_string(),
                            offset,
                        }
                    } else {
                        K::Load {
                            opcode: mnemonic.to_string(),
                            offset,
                        }
                    }
                } else {
                    warn!(?op, "unsupported operator skipped");
                    return Ok(Lowered::Skipped);
                }
            }
        };
        Ok(Lowered::Expr(kind))
    }
}

enum Lowered {
    Expr(ExprKind),
    Open(FrameKind, u32),
    Skipped,
}

enum OpClass {
    Binary,
    Compare,
    Convert,
    Unary,
}

/// Text mnemonic and category for the numeric operator set.
fn classify_opcode(op: &Operator) -> Option<(OpClass, &'static str)> {
    use OpClass::*;
    use Operator as O;
    Some(match op {
        O::I32Add => (Binary, "i32.add"),
        O::I32Sub => (Binary, "i32.sub"),
        O::I32Mul => (Binary, "i32.mul"),
        O::I32DivS => (Binary, "i32.div_s"),
        O::I32DivU => (Binary, "i32.div_u"),
        O::I32RemS => (Binary, "i32.rem_s"),
        O::I32RemU => (Binary, "i32.rem_u"),
        O::I32And => (Binary, "i32.and"),
        O::I32Or => (Binary, "i32.or"),
        O::I32Xor => (Binary, "i32.xor"),
        O::I32Shl => (Binary, "i32.shl"),
        O::I32ShrS => (Binary, "i32.shr_s"),
        O::I32ShrU => (Binary, "i32.shr_u"),
        O::I32Rotl => (Binary, "i32.rotl"),
        O::I32Rotr => (Binary, "i32.rotr"),
        O::I64Add => (Binary, "i64.add"),
        O::I64Sub => (Binary, "i64.sub"),
        O::I64Mul => (Binary, "i64.mul"),
        O::I64DivS => (Binary, "i64.div_s"),
        O::I64DivU => (Binary, "i64.div_u"),
        O::I64RemS => (Binary, "i64.rem_s"),
        O::I64RemU => (Binary, "i64.rem_u"),
        O::I64And => (Binary, "i64.and"),
        O::I64Or => (Binary, "i64.or"),
        O::I64Xor => (Binary, "i64.xor"),
        O::I64Shl => (Binary, "i64.shl"),
        O::I64ShrS => (Binary, "i64.shr_s"),
        O::I64ShrU => (Binary, "i64.shr_u"),
        O::I64Rotl => (Binary, "i64.rotl"),
        O::I64Rotr => (Binary, "i64.rotr"),
        O::F32Add => (Binary, "f32.add"),
        O::F32Sub => (Binary, "f32.sub"),
        O::F32Mul => (Binary, "f32.mul"),
        O::F32Div => (Binary, "f32.div"),
        O::F32Min => (Binary, "f32.min"),
        O::F32Max => (Binary, "f32.max"),
        O::F32Copysign => (Binary, "f32.copysign"),
        O::F64Add => (Binary, "f64.add"),
        O::F64Sub => (Binary, "f64.sub"),
        O::F64Mul => (Binary, "f64.mul"),
        O::F64Div => (Binary, "f64.div"),
        O::F64Min => (Binary, "f64.min"),
        O::F64Max => (Binary, "f64.max"),
        O::F64Copysign => (Binary, "f64.copysign"),

        O::I32Eq => (Compare, "i32.eq"),
        O::I32Ne => (Compare, "i32.ne"),
        O::I32LtS => (Compare, "i32.lt_s"),
        O::I32LtU => (Compare, "i32.lt_u"),
        O::I32GtS => (Compare, "i32.gt_s"),
        O::I32GtU => (Compare, "i32.gt_u"),
        O::I32LeS => (Compare, "i32.le_s"),
        O::I32LeU => (Compare, "i32.le_u"),
        O::I32GeS => (Compare, "i32.ge_s"),
        O::I32GeU => (Compare, "i32.ge_u"),
        O::I64Eq => (Compare, "i64.eq"),
        O::I64Ne => (Compare, "i64.ne"),
        O::I64LtS => (Compare, "i64.lt_s"),
        O::I64LtU => (Compare, "i64.lt_u"),
        O::I64GtS => (Compare, "i64.gt_s"),
        O::I64GtU => (Compare, "i64.gt_u"),
        O::I64LeS => (Compare, "i64.le_s"),
        O::I64LeU => (Compare, "i64.le_u"),
        O::I64GeS => (Compare, "i64.ge_s"),
        O::I64GeU => (Compare, "i64.ge_u"),
        O::F32Eq => (Compare, "f32.eq"),
        O::F32Ne => (Compare, "f32.ne"),
        O::F32Lt => (Compare, "f32.lt"),
        O::F32Gt => (Compare, "f32.gt"),
        O::F32Le => (Compare, "f32.le"),
        O::F32Ge => (Compare, "f32.ge"),
        O::F64Eq => (Compare, "f64.eq"),
        O::F64Ne => (Compare, "f64.ne"),
        O::F64Lt => (Compare, "f64.lt"),
        O::F64Gt => (Compare, "f64.gt"),
        O::F64Le => (Compare, "f64.le"),
        O::F64Ge => (Compare, "f64.ge"),

        O::I32WrapI64 => (Convert, "i32.wrap_i64"),
        O::I64ExtendI32S => (Convert, "i64.extend_i32_s"),
        O::I64ExtendI32U => (Convert, "i64.extend_i32_u"),
        O::I32TruncF32S => (Convert, "i32.trunc_f32_s"),
        O::I32TruncF32U => (Convert, "i32.trunc_f32_u"),
        O::I32TruncF64S => (Convert, "i32.trunc_f64_s"),
        O::I32TruncF64U => (Convert, "i32.trunc_f64_u"),
        O::I64TruncF32S => (Convert, "i64.trunc_f32_s"),
        O::I64TruncF32U => (Convert, "i64.trunc_f32_u"),
        O::I64TruncF64S => (Convert, "i64.trunc_f64_s"),
        O::I64TruncF64U => (Convert, "i64.trunc_f64_u"),
        O::F32ConvertI32S => (Convert, "f32.convert_i32_s"),
        O::F32ConvertI32U => (Convert, "f32.convert_i32_u"),
        O::F32ConvertI64S => (Convert, "f32.convert_i64_s"),
        O::F32ConvertI64U => (Convert, "f32.convert_i64_u"),
        O::F64ConvertI32S => (Convert, "f64.convert_i32_s"),
        O::F64ConvertI32U => (Convert, "f64.convert_i32_u"),
        O::F64ConvertI64S => (Convert, "f64.convert_i64_s"),
        O::F64ConvertI64U => (Convert, "f64.convert_i64_u"),
        O::F32DemoteF64 => (Convert, "f32.demote_f64"),
        O::F64PromoteF32 => (Convert, "f64.promote_f32"),
        O::I32ReinterpretF32 => (Convert, "i32.reinterpret_f32"),
        O::I64ReinterpretF64 => (Convert, "i64.reinterpret_f64"),
        O::F32ReinterpretI32 => (Convert, "f32.reinterpret_i32"),
        O::F64ReinterpretI64 => (Convert, "f64.reinterpret_i64"),

        O::I32Eqz => (Unary, "i32.eqz"),
        O::I64Eqz => (Unary, "i64.eqz"),
        O::I32Clz => (Unary, "i32.clz"),
        O::I32Ctz => (Unary, "i32.ctz"),
        O::I32Popcnt => (Unary, "i32.popcnt"),
        O::I64Clz => (Unary, "i64.clz"),
        O::I64Ctz => (Unary, "i64.ctz"),
        O::I64Popcnt => (Unary, "i64.popcnt"),
        O::I32Extend8S => (Unary, "i32.extend8_s"),
        O::I32Extend16S => (Unary, "i32.extend16_s"),
        O::I64Extend8S => (Unary, "i64.extend8_s"),
        O::I64Extend16S => (Unary, "i64.extend16_s"),
        O::I64Extend32S => (Unary, "i64.extend32_s"),
        O::F32Abs => (Unary, "f32.abs"),
        O::F32Neg => (Unary, "f32.neg"),
        O::F32Sqrt => (Unary, "f32.sqrt"),
        O::F32Ceil => (Unary, "f32.ceil"),
        O::F32Floor => (Unary, "f32.floor"),
        O::F32Trunc => (Unary, "f32.trunc"),
        O::F32Nearest => (Unary, "f32.nearest"),
        O::F64Abs => (Unary, "f64.abs"),
        O::F64Neg => (Unary, "f64.neg"),
        O::F64Sqrt => (Unary, "f64.sqrt"),
        O::F64Ceil => (Unary, "f64.ceil"),
        O::F64Floor => (Unary, "f64.floor"),
        O::F64Trunc => (Unary, "f64.trunc"),
        O::F64Nearest => (Unary, "f64.nearest"),
        _ => return None,
    })
}

/// Memory operator: mnemonic, static offset, is-store.
fn classify_memory(op: &Operator) -> Option<(&'static str, u32, bool)> {
    use Operator as O;
    Some(match op {
        O::I32Load { memarg } => ("i32.load", memarg.offset as u32, false),
        O::I64Load { memarg } => ("i64.load", memarg.offset as u32, false),
        O::F32Load { memarg } => ("f32.load", memarg.offset as u32, false),
        O::F64Load { memarg } => ("f64.load", memarg.offset as u32, false),
        O::I32Load8S { memarg } => ("i32.load8_s", memarg.offset as u32, false),
        O::I32Load8U { memarg } => ("i32.load8_u", memarg.offset as u32, false),
        O::I32Load16S { memarg } => ("i32.load16_s", memarg.offset as u32, false),
        O::I32Load16U { memarg } => ("i32.load16_u", memarg.offset as u32, false),
        O::I64Load8S { memarg } => ("i64.load8_s", memarg.offset as u32, false),
        O::I64Load8U { memarg } => ("i64.load8_u", memarg.offset as u32, false),
        O::I64Load16S { memarg } => ("i64.load16_s", memarg.offset as u32, false),
        O::I64Load16U { memarg } => ("i64.load16_u", memarg.offset as u32, false),
        O::I64Load32S { memarg } => ("i64.load32_s", memarg.offset as u32, false),
        O::I64Load32U { memarg } => ("i64.load32_u", memarg.offset as u32, false),
        O::I32Store { memarg } => ("i32.store", memarg.offset as u32, true),
        O::I64Store { memarg } => ("i64.store", memarg.offset as u32, true),
        O::F32Store { memarg } => ("f32.store", memarg.offset as u32, true),
        O::F64Store { memarg } => ("f64.store", memarg.offset as u32, true),
        O::I32Store8 { memarg } => ("i32.store8", memarg.offset as u32, true),
        O::I32Store16 { memarg } => ("i32.store16", memarg.offset as u32, true),
        O::I64Store8 { memarg } => ("i64.store8", memarg.offset as u32, true),
        O::I64Store16 { memarg } => ("i64.store16", memarg.offset as u32, true),
        O::I64Store32 { memarg } => ("i64.store32", memarg.offset as u32, true),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_module() {
        let ir = module_from_wat(
            r#"(module
                 (func $add (param $x i32) (param $y i32) (result i32)
                   local.get $x
                   local.get $y
                   i32.add))"#,
            true,
        )
        .unwrap();
        assert_eq!(ir.funcs.len(), 1);
        let f = &ir.funcs[0];
        assert_eq!(f.name, "$add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].0, "$x");
        assert_eq!(f.body.len(), 3);
        assert!(matches!(f.body[2].kind, ExprKind::Binary { ref opcode } if opcode == "i32.add"));
    }

    #[test]
    fn test_imports_and_exports_are_flagged() {
        let ir = module_from_wat(
            r#"(module
                 (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
                 (func $main (export "main")
                   i32.const 0
                   i32.const 0
                   i32.const 0
                   call $read
                   drop))"#,
            true,
        )
        .unwrap();
        assert_eq!(ir.funcs.len(), 2);
        assert!(ir.funcs[0].is_import);
        assert_eq!(ir.funcs[0].name, "$read");
        assert!(ir.funcs[1].is_export);
        let call = ir.funcs[1]
            .body
            .iter()
            .find(|e| matches!(e.kind, ExprKind::Call { .. }))
            .unwrap();
        match &call.kind {
            ExprKind::Call { nargs, nresults, .. } => {
                assert_eq!((*nargs, *nresults), (3, 1));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_branch_depths_resolve_to_labels() {
        let ir = module_from_wat(
            r#"(module
                 (func $f
                   (block
                     (loop
                       br 0
                       br 1))))"#,
            false,
        )
        .unwrap();
        let body = &ir.funcs[0].body;
        let block = match &body[0].kind {
            ExprKind::Block { body, .. } => body,
            other => panic!("expected block, got {:?}", other),
        };
        let (loop_label, loop_body) = match &block[0].kind {
            ExprKind::Loop { label, body, .. } => (label.clone(), body),
            other => panic!("expected loop, got {:?}", other),
        };
        assert!(matches!(&loop_body[0].kind, ExprKind::Br { label } if *label == loop_label));
        assert!(matches!(&loop_body[1].kind, ExprKind::Br { label } if label.starts_with("$B")));
    }
}
