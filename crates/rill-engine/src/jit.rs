//! Cranelift JIT backend.
//!
//! Every resolved function becomes one native function with the signature
//!
//! ```text
//! fn(env: *mut ArrayTable, data: *mut u32, args: *const u32, outs: *mut u32)
//! ```
//!
//! `data` points at the function's own segment; a call passes
//! `data + offset` for the callee's region, with arguments and outlets in
//! stack slots. Float temporaries are Cranelift `f32` variables and array
//! handles `i32` variables. `rem` and array access go through `extern "C"`
//! helpers so both backends share one implementation of them.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;

use cranelift_codegen::ir::condcodes::FloatCC;
use cranelift_codegen::ir::{
    AbiParam, FuncRef, InstBuilder, MemFlags, StackSlotData, StackSlotKind, Type, Value, types,
};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use rill_ir::{
    BinaryOp, CompareOp, Constant, DataType, Instruction, Operand, Source, Target, VarRef,
};

use crate::arrays::ArrayTable;
use crate::error::{EngineError, Result};
use crate::layout::{Program, ProgramFunction};
use crate::program::{Backend, Context, OptLevel, Routine};

/// Backend that compiles to native code with Cranelift.
#[derive(Debug, Clone, Copy, Default)]
pub struct Jit {
    opt_level: OptLevel,
}

impl Jit {
    /// Creates a JIT backend with the given optimisation level.
    pub fn new(opt_level: OptLevel) -> Self {
        Self { opt_level }
    }
}

// ---------------------------------------------------------------------------
// Runtime helpers (called from generated code)
// ---------------------------------------------------------------------------

extern "C" fn rill_rem(a: f32, b: f32) -> f32 {
    BinaryOp::Rem.apply(a, b)
}

extern "C" fn rill_array_read(env: *const ArrayTable, handle: u32, index: f32) -> f32 {
    // SAFETY: generated code passes the `env` it was called with, which
    // `JitRoutine::run` derives from a live `&mut ArrayTable`.
    unsafe { (*env).read(handle, index) }
}

extern "C" fn rill_array_write(env: *mut ArrayTable, handle: u32, index: f32, value: f32) {
    // SAFETY: as in `rill_array_read`; no other reference to the table is
    // live while generated code runs.
    unsafe { (*env).write(handle, index, value) }
}

extern "C" fn rill_array_len(env: *const ArrayTable, handle: u32) -> f32 {
    // SAFETY: as in `rill_array_read`.
    unsafe { (*env).length(handle) }
}

fn helper_symbols() -> [(&'static str, *const u8); 4] {
    [
        ("rill_rem", rill_rem as *const u8),
        ("rill_array_read", rill_array_read as *const u8),
        ("rill_array_write", rill_array_write as *const u8),
        ("rill_array_len", rill_array_len as *const u8),
    ]
}

struct HelperIds {
    rem: FuncId,
    read: FuncId,
    write: FuncId,
    len: FuncId,
}

impl HelperIds {
    fn declare(module: &mut JITModule, ptr: Type) -> Result<Self> {
        let mut declare = |name: &str, params: &[Type], ret: Option<Type>| {
            let mut sig = module.make_signature();
            sig.params.extend(params.iter().map(|t| AbiParam::new(*t)));
            sig.returns.extend(ret.map(AbiParam::new));
            module
                .declare_function(name, Linkage::Import, &sig)
                .map_err(EngineError::codegen)
        };
        Ok(Self {
            rem: declare("rill_rem", &[types::F32, types::F32], Some(types::F32))?,
            read: declare(
                "rill_array_read",
                &[ptr, types::I32, types::F32],
                Some(types::F32),
            )?,
            write: declare(
                "rill_array_write",
                &[ptr, types::I32, types::F32, types::F32],
                None,
            )?,
            len: declare("rill_array_len", &[ptr, types::I32], Some(types::F32))?,
        })
    }
}

#[derive(Clone, Copy)]
struct HelperRefs {
    rem: FuncRef,
    read: FuncRef,
    write: FuncRef,
    len: FuncRef,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

impl Backend for Jit {
    fn name(&self) -> &'static str {
        "jit"
    }

    fn compile(&self, program: &Program) -> Result<Box<dyn Routine>> {
        let mut flags = settings::builder();
        flags
            .set("opt_level", self.opt_level.as_str())
            .map_err(EngineError::codegen)?;
        let isa = cranelift_native::builder()
            .map_err(|e| EngineError::Codegen(format!("native ISA not available: {e}")))?
            .finish(settings::Flags::new(flags))
            .map_err(EngineError::codegen)?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        for (name, ptr) in helper_symbols() {
            builder.symbol(name, ptr);
        }
        let mut module = JITModule::new(builder);
        let ptr = module.target_config().pointer_type();
        let helper_ids = HelperIds::declare(&mut module, ptr)?;

        let mut sig = module.make_signature();
        sig.params.extend([AbiParam::new(ptr); 4]);

        let ids = program
            .functions()
            .iter()
            .enumerate()
            .map(|(i, _)| {
                module
                    .declare_function(&format!("rill_fn{i}"), Linkage::Local, &sig)
                    .map_err(EngineError::codegen)
            })
            .collect::<Result<Vec<FuncId>>>()?;

        let mut ctx = module.make_context();
        let mut fb_ctx = FunctionBuilderContext::new();
        for (i, func) in program.functions().iter().enumerate() {
            ctx.func.signature = sig.clone();
            {
                let mut b = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
                let callees = func
                    .children
                    .values()
                    .map(|c| (c.function, module.declare_func_in_func(ids[c.function], b.func)))
                    .collect();
                let helpers = HelperRefs {
                    rem: module.declare_func_in_func(helper_ids.rem, b.func),
                    read: module.declare_func_in_func(helper_ids.read, b.func),
                    write: module.declare_func_in_func(helper_ids.write, b.func),
                    len: module.declare_func_in_func(helper_ids.len, b.func),
                };
                lower_function(&mut b, program, func, callees, helpers, ptr);
                b.finalize();
            }
            module
                .define_function(ids[i], &mut ctx)
                .map_err(|e| EngineError::Codegen(format!("'{}': {e}", func.ir.name)))?;
            module.clear_context(&mut ctx);
        }
        module.finalize_definitions().map_err(EngineError::codegen)?;

        let code = module.get_finalized_function(ids[program.entry()]);
        // SAFETY: the entry function was compiled with the `EntryFn`
        // signature above and stays mapped until `module` is freed.
        let entry = unsafe { std::mem::transmute::<*const u8, EntryFn>(code) };

        tracing::debug!(
            functions = ids.len(),
            opt_level = self.opt_level.as_str(),
            "jit routine compiled"
        );
        Ok(Box::new(JitRoutine {
            module: Some(module),
            entry,
        }))
    }
}

fn cl_type(data_type: DataType) -> Type {
    match data_type {
        DataType::Float => types::F32,
        DataType::Array => types::I32,
    }
}

fn float_cc(op: CompareOp) -> FloatCC {
    match op {
        CompareOp::Eq => FloatCC::Equal,
        CompareOp::Ne => FloatCC::NotEqual,
        CompareOp::Lt => FloatCC::LessThan,
        CompareOp::Le => FloatCC::LessThanOrEqual,
        CompareOp::Gt => FloatCC::GreaterThan,
        CompareOp::Ge => FloatCC::GreaterThanOrEqual,
    }
}

fn lower_function(
    b: &mut FunctionBuilder<'_>,
    program: &Program,
    func: &ProgramFunction,
    callees: HashMap<usize, FuncRef>,
    helpers: HelperRefs,
    ptr: Type,
) {
    let entry_block = b.create_block();
    b.append_block_params_for_function_params(entry_block);
    b.switch_to_block(entry_block);
    let params = b.block_params(entry_block).to_vec();
    let (env, data, args_ptr, outs) = (params[0], params[1], params[2], params[3]);

    let args = func
        .ir
        .inlets
        .iter()
        .enumerate()
        .map(|(i, inlet)| {
            b.ins()
                .load(cl_type(inlet.data_type), MemFlags::trusted(), args_ptr, (i * 4) as i32)
        })
        .collect();
    let locals = func
        .ir
        .locals
        .iter()
        .map(|l| b.declare_var(cl_type(l.data_type)))
        .collect();

    let mut lowering = Lowering {
        b,
        program,
        func,
        callees,
        helpers,
        ptr,
        env,
        data,
        outs,
        args,
        vars: HashMap::new(),
        locals,
    };
    lowering.block(&func.ir.body);

    let b = lowering.b;
    b.ins().return_(&[]);
    b.seal_all_blocks();
}

struct Lowering<'a, 'f> {
    b: &'a mut FunctionBuilder<'f>,
    program: &'a Program,
    func: &'a ProgramFunction,
    callees: HashMap<usize, FuncRef>,
    helpers: HelperRefs,
    ptr: Type,
    env: Value,
    data: Value,
    outs: Value,
    args: Vec<Value>,
    vars: HashMap<VarRef, Variable>,
    locals: Vec<Variable>,
}

impl Lowering<'_, '_> {
    fn zero(&mut self, ty: Type) -> Value {
        if ty == types::F32 {
            self.b.ins().f32const(0.0)
        } else {
            self.b.ins().iconst(types::I32, 0)
        }
    }

    fn operand(&mut self, op: &Operand) -> Value {
        match *op {
            Operand::Literal(x) => self.b.ins().f32const(x),
            Operand::Arg(i) => self.args[i as usize],
            Operand::Var(v) => match self.vars.get(&v) {
                Some(var) => self.b.use_var(*var),
                None => self.b.ins().f32const(0.0),
            },
            Operand::Constant(Constant::SampleRate) => {
                self.b.ins().f32const(self.program.sample_rate())
            }
            Operand::Constant(Constant::EmptyArray) => self.b.ins().iconst(types::I32, 0),
        }
    }

    fn define(&mut self, v: VarRef, value: Value) {
        let ty = self.b.func.dfg.value_type(value);
        let var = match self.vars.get(&v) {
            Some(var) => *var,
            None => {
                let var = self.b.declare_var(ty);
                self.vars.insert(v, var);
                var
            }
        };
        self.b.def_var(var, value);
    }

    fn call_helper(&mut self, helper: FuncRef, args: &[Value]) -> Option<Value> {
        let call = self.b.ins().call(helper, args);
        self.b.inst_results(call).first().copied()
    }

    fn stack_buffer(&mut self, cells: usize) -> Value {
        let bytes = (cells.max(1) * 4) as u32;
        let slot = self
            .b
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, bytes, 2));
        self.b.ins().stack_addr(self.ptr, slot, 0)
    }

    fn block(&mut self, body: &[Instruction]) {
        for inst in body {
            self.instruction(inst);
        }
    }

    fn instruction(&mut self, inst: &Instruction) {
        let flags = MemFlags::trusted();
        match inst {
            Instruction::Alloc(local) => {
                let var = self.locals[local.0 as usize];
                let ty = cl_type(self.func.ir.locals[local.0 as usize].data_type);
                let zero = self.zero(ty);
                self.b.def_var(var, zero);
            }
            Instruction::Load(dst, source) => {
                let value = match *source {
                    Source::Local(local) => self.b.use_var(self.locals[local.0 as usize]),
                    Source::Data(field) => {
                        let ty = cl_type(self.func.ir.data[field.0 as usize].data_type);
                        self.b.ins().load(ty, flags, self.data, (field.0 * 4) as i32)
                    }
                    Source::LastValue(id, field) => {
                        let child = self.func.children[&id];
                        let callee = &self.program.functions()[child.function].ir;
                        let ty = cl_type(callee.data[field.0 as usize].data_type);
                        let offset = ((child.offset + field.0) * 4) as i32;
                        self.b.ins().load(ty, flags, self.data, offset)
                    }
                };
                self.define(*dst, value);
            }
            Instruction::Store(target, src) => {
                let value = self.operand(src);
                match *target {
                    Target::Local(local) => self.b.def_var(self.locals[local.0 as usize], value),
                    Target::Data(field) => {
                        self.b.ins().store(flags, value, self.data, (field.0 * 4) as i32);
                    }
                    Target::Outlet(outlet) => {
                        self.b.ins().store(flags, value, self.outs, (outlet.0 * 4) as i32);
                    }
                }
            }
            Instruction::Binary(dst, op, a, b) => {
                let (a, b) = (self.operand(a), self.operand(b));
                let value = match op {
                    BinaryOp::Add => self.b.ins().fadd(a, b),
                    BinaryOp::Sub => self.b.ins().fsub(a, b),
                    BinaryOp::Mul => self.b.ins().fmul(a, b),
                    BinaryOp::Div => self.b.ins().fdiv(a, b),
                    BinaryOp::Rem => match self.call_helper(self.helpers.rem, &[a, b]) {
                        Some(v) => v,
                        None => self.zero(types::F32),
                    },
                };
                self.define(*dst, value);
            }
            Instruction::Truncate(dst, a) => {
                let a = self.operand(a);
                let value = self.b.ins().trunc(a);
                self.define(*dst, value);
            }
            Instruction::Compare(dst, op, a, b) => {
                let (a, b) = (self.operand(a), self.operand(b));
                let test = self.b.ins().fcmp(float_cc(*op), a, b);
                let one = self.b.ins().f32const(1.0);
                let zero = self.zero(types::F32);
                let value = self.b.ins().select(test, one, zero);
                self.define(*dst, value);
            }
            Instruction::Conditional(test, then, otherwise) => {
                let test = self.operand(test);
                let zero = self.zero(types::F32);
                let cond = self.b.ins().fcmp(FloatCC::NotEqual, test, zero);

                let then_block = self.b.create_block();
                let else_block = self.b.create_block();
                let merge = self.b.create_block();
                self.b.ins().brif(cond, then_block, &[], else_block, &[]);

                self.b.switch_to_block(then_block);
                self.block(then);
                self.b.ins().jump(merge, &[]);

                self.b.switch_to_block(else_block);
                self.block(otherwise);
                self.b.ins().jump(merge, &[]);

                self.b.switch_to_block(merge);
            }
            Instruction::IndexLoad(dst, array, index) => {
                let args = [self.env, self.operand(array), self.operand(index)];
                let value = match self.call_helper(self.helpers.read, &args) {
                    Some(v) => v,
                    None => self.zero(types::F32),
                };
                self.define(*dst, value);
            }
            Instruction::IndexStore(array, index, value) => {
                let args = [
                    self.env,
                    self.operand(array),
                    self.operand(index),
                    self.operand(value),
                ];
                self.call_helper(self.helpers.write, &args);
            }
            Instruction::Length(dst, array) => {
                let args = [self.env, self.operand(array)];
                let value = match self.call_helper(self.helpers.len, &args) {
                    Some(v) => v,
                    None => self.zero(types::F32),
                };
                self.define(*dst, value);
            }
            Instruction::Call(id, _, args, results) => {
                let child = self.func.children[id];
                let callee = &self.program.functions()[child.function].ir;
                let func_ref = self.callees[&child.function];

                let arg_buf = self.stack_buffer(callee.inlets.len());
                for (i, arg) in args.iter().enumerate() {
                    let value = self.operand(arg);
                    self.b.ins().store(flags, value, arg_buf, (i * 4) as i32);
                }
                let out_buf = self.stack_buffer(callee.outlets.len());
                let region = self.b.ins().iadd_imm(self.data, i64::from(child.offset) * 4);
                self.b
                    .ins()
                    .call(func_ref, &[self.env, region, arg_buf, out_buf]);

                for (j, dst) in results.iter().enumerate() {
                    let ty = cl_type(callee.outlets[j].data_type);
                    let value = self.b.ins().load(ty, flags, out_buf, (j * 4) as i32);
                    self.define(*dst, value);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Routine
// ---------------------------------------------------------------------------

type EntryFn = unsafe extern "C" fn(*mut ArrayTable, *const AtomicU32, *const f32, *mut f32);

struct JitRoutine {
    /// Owns the code pages `entry` points into.
    module: Option<JITModule>,
    entry: EntryFn,
}

// SAFETY: the module is only touched again on drop, and the generated code
// keeps no thread-local state.
unsafe impl Send for JitRoutine {}

impl Routine for JitRoutine {
    fn run(&mut self, ctx: &mut Context<'_>, inputs: &[f32], outputs: &mut [f32]) {
        let env: *mut ArrayTable = ctx.arrays;
        // SAFETY: the engine sizes `inputs`, `outputs` and the data segment
        // from the same program this code was compiled from. Generated code
        // accesses the data segment with plain 32-bit loads and stores, which
        // other threads only touch through atomics.
        unsafe {
            (self.entry)(env, ctx.data.as_ptr(), inputs.as_ptr(), outputs.as_mut_ptr());
        }
    }
}

impl Drop for JitRoutine {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: `entry` is never called after this point.
            unsafe { module.free_memory() };
        }
    }
}
