//! Interpreter backend.
//!
//! IR is first translated into [`Op`]s with every name, call id and constant
//! resolved, so running a frame is a walk over plain indices. Frames live on
//! one preallocated stack of 32-bit cells:
//!
//! ```text
//! | inlets | outlets | temporaries | locals |   callee frame ...
//! ```

use std::sync::atomic::Ordering;

use rill_ir::{
    BinaryOp, CompareOp, Constant, Instruction, Operand, Source, Target,
};

use crate::error::Result;
use crate::layout::{Program, ProgramFunction};
use crate::program::{Backend, Context, Routine};

/// Backend that executes IR directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl Backend for Interpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile(&self, program: &Program) -> Result<Box<dyn Routine>> {
        let sample_rate = program.sample_rate();
        let mut functions: Vec<Compiled> = Vec::with_capacity(program.functions().len());
        for func in program.functions() {
            let frame = Frame::of(func);
            let code = translate(&func.ir.body, func, &frame, sample_rate);
            let depth = frame.size
                + func
                    .children
                    .values()
                    .map(|c| functions[c.function].depth)
                    .max()
                    .unwrap_or(0);
            functions.push(Compiled { code, frame, depth });
        }
        let entry = program.entry();
        let stack = vec![0; functions[entry].depth as usize];
        tracing::debug!(stack = stack.len(), "interpreter routine built");
        Ok(Box::new(Interpreted {
            functions,
            entry,
            stack,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    inlets: u32,
    vars: u32,
    size: u32,
}

impl Frame {
    fn of(func: &ProgramFunction) -> Self {
        let inlets = func.ir.inlets.len() as u32;
        let outlets = func.ir.outlets.len() as u32;
        Self {
            inlets,
            vars: inlets + outlets,
            size: inlets + outlets + func.vars + func.ir.locals.len() as u32,
        }
    }

    fn local(&self, func: &ProgramFunction, local: u32) -> u32 {
        self.vars + func.vars + local
    }
}

/// A value read by an op: a frame cell or an immediate.
#[derive(Debug, Clone, Copy)]
enum Val {
    Imm(u32),
    Cell(u32),
}

#[derive(Debug, Clone)]
enum Op {
    Set { dst: u32, src: Val },
    LoadData { dst: u32, slot: u32 },
    StoreData { slot: u32, src: Val },
    Binary { dst: u32, op: BinaryOp, a: Val, b: Val },
    Truncate { dst: u32, a: Val },
    Compare { dst: u32, op: CompareOp, a: Val, b: Val },
    Branch { test: Val, then: Box<[Op]>, otherwise: Box<[Op]> },
    IndexLoad { dst: u32, array: Val, index: Val },
    IndexStore { array: Val, index: Val, value: Val },
    Length { dst: u32, array: Val },
    Call { function: usize, offset: u32, args: Box<[Val]>, results: Box<[u32]> },
}

struct Compiled {
    code: Box<[Op]>,
    frame: Frame,
    depth: u32,
}

fn translate(body: &[Instruction], func: &ProgramFunction, frame: &Frame, sample_rate: f32) -> Box<[Op]> {
    let var = |v: rill_ir::VarRef| frame.vars + v.0;
    let val = |op: &Operand| match *op {
        Operand::Literal(x) => Val::Imm(x.to_bits()),
        Operand::Arg(i) => Val::Cell(i),
        Operand::Var(v) => Val::Cell(var(v)),
        Operand::Constant(Constant::SampleRate) => Val::Imm(sample_rate.to_bits()),
        Operand::Constant(Constant::EmptyArray) => Val::Imm(0),
    };

    body.iter()
        .map(|inst| match inst {
            Instruction::Alloc(local) => Op::Set {
                dst: frame.local(func, local.0),
                src: Val::Imm(0),
            },
            Instruction::Load(dst, source) => match *source {
                Source::Local(local) => Op::Set {
                    dst: var(*dst),
                    src: Val::Cell(frame.local(func, local.0)),
                },
                Source::Data(field) => Op::LoadData {
                    dst: var(*dst),
                    slot: field.0,
                },
                Source::LastValue(id, field) => Op::LoadData {
                    dst: var(*dst),
                    slot: func.children.get(&id).map_or(0, |c| c.offset) + field.0,
                },
            },
            Instruction::Store(target, src) => match *target {
                Target::Local(local) => Op::Set {
                    dst: frame.local(func, local.0),
                    src: val(src),
                },
                Target::Data(field) => Op::StoreData {
                    slot: field.0,
                    src: val(src),
                },
                Target::Outlet(outlet) => Op::Set {
                    dst: frame.inlets + outlet.0,
                    src: val(src),
                },
            },
            Instruction::Binary(dst, op, a, b) => Op::Binary {
                dst: var(*dst),
                op: *op,
                a: val(a),
                b: val(b),
            },
            Instruction::Truncate(dst, a) => Op::Truncate {
                dst: var(*dst),
                a: val(a),
            },
            Instruction::Compare(dst, op, a, b) => Op::Compare {
                dst: var(*dst),
                op: *op,
                a: val(a),
                b: val(b),
            },
            Instruction::Conditional(test, then, otherwise) => Op::Branch {
                test: val(test),
                then: translate(then, func, frame, sample_rate),
                otherwise: translate(otherwise, func, frame, sample_rate),
            },
            Instruction::IndexLoad(dst, array, index) => Op::IndexLoad {
                dst: var(*dst),
                array: val(array),
                index: val(index),
            },
            Instruction::IndexStore(array, index, value) => Op::IndexStore {
                array: val(array),
                index: val(index),
                value: val(value),
            },
            Instruction::Length(dst, array) => Op::Length {
                dst: var(*dst),
                array: val(array),
            },
            Instruction::Call(id, _, args, results) => {
                let child = func.children.get(id).copied().unwrap_or(crate::layout::Child {
                    function: 0,
                    offset: 0,
                });
                Op::Call {
                    function: child.function,
                    offset: child.offset,
                    args: args.iter().map(val).collect(),
                    results: results.iter().map(|r| var(*r)).collect(),
                }
            }
        })
        .collect()
}

struct Interpreted {
    functions: Vec<Compiled>,
    entry: usize,
    stack: Vec<u32>,
}

impl Routine for Interpreted {
    fn run(&mut self, ctx: &mut Context<'_>, inputs: &[f32], outputs: &mut [f32]) {
        let entry = &self.functions[self.entry];
        let inlets = entry.frame.inlets as usize;
        for (cell, x) in self.stack[..inlets].iter_mut().zip(inputs) {
            *cell = x.to_bits();
        }
        let mut machine = Machine {
            functions: &self.functions,
            stack: &mut self.stack,
            ctx,
        };
        machine.exec(&entry.code, 0, 0, entry.frame.size);
        for (out, cell) in outputs.iter_mut().zip(&self.stack[inlets..]) {
            *out = f32::from_bits(*cell);
        }
    }
}

struct Machine<'m, 'c, 'd> {
    functions: &'m [Compiled],
    stack: &'m mut [u32],
    ctx: &'c mut Context<'d>,
}

impl Machine<'_, '_, '_> {
    #[inline]
    fn get(&self, fp: usize, v: Val) -> u32 {
        match v {
            Val::Imm(bits) => bits,
            Val::Cell(i) => self.stack[fp + i as usize],
        }
    }

    #[inline]
    fn float(&self, fp: usize, v: Val) -> f32 {
        f32::from_bits(self.get(fp, v))
    }

    #[inline]
    fn set(&mut self, fp: usize, dst: u32, bits: u32) {
        self.stack[fp + dst as usize] = bits;
    }

    /// Runs `code` with its frame at `fp` and its segment at `base`.
    /// `size` is the frame size, where callee frames start.
    fn exec(&mut self, code: &[Op], fp: usize, base: usize, size: u32) {
        for op in code {
            match op {
                Op::Set { dst, src } => {
                    let bits = self.get(fp, *src);
                    self.set(fp, *dst, bits);
                }
                Op::LoadData { dst, slot } => {
                    let bits = self.ctx.data[base + *slot as usize].load(Ordering::Relaxed);
                    self.set(fp, *dst, bits);
                }
                Op::StoreData { slot, src } => {
                    let bits = self.get(fp, *src);
                    self.ctx.data[base + *slot as usize].store(bits, Ordering::Relaxed);
                }
                Op::Binary { dst, op, a, b } => {
                    let x = op.apply(self.float(fp, *a), self.float(fp, *b));
                    self.set(fp, *dst, x.to_bits());
                }
                Op::Truncate { dst, a } => {
                    let x = self.float(fp, *a).trunc();
                    self.set(fp, *dst, x.to_bits());
                }
                Op::Compare { dst, op, a, b } => {
                    let x = op.apply(self.float(fp, *a), self.float(fp, *b));
                    self.set(fp, *dst, x.to_bits());
                }
                Op::Branch {
                    test,
                    then,
                    otherwise,
                } => {
                    let block = if self.float(fp, *test) != 0.0 {
                        then
                    } else {
                        otherwise
                    };
                    self.exec(block, fp, base, size);
                }
                Op::IndexLoad { dst, array, index } => {
                    let x = self
                        .ctx
                        .arrays
                        .read(self.get(fp, *array), self.float(fp, *index));
                    self.set(fp, *dst, x.to_bits());
                }
                Op::IndexStore {
                    array,
                    index,
                    value,
                } => {
                    let (h, i, x) = (
                        self.get(fp, *array),
                        self.float(fp, *index),
                        self.float(fp, *value),
                    );
                    self.ctx.arrays.write(h, i, x);
                }
                Op::Length { dst, array } => {
                    let x = self.ctx.arrays.length(self.get(fp, *array));
                    self.set(fp, *dst, x.to_bits());
                }
                Op::Call {
                    function,
                    offset,
                    args,
                    results,
                } => {
                    let functions = self.functions;
                    let callee = &functions[*function];
                    let callee_fp = fp + size as usize;
                    for (i, arg) in args.iter().enumerate() {
                        let bits = self.get(fp, *arg);
                        self.stack[callee_fp + i] = bits;
                    }
                    self.exec(
                        &callee.code,
                        callee_fp,
                        base + *offset as usize,
                        callee.frame.size,
                    );
                    let outlets = callee_fp + callee.frame.inlets as usize;
                    for (j, dst) in results.iter().enumerate() {
                        let bits = self.stack[outlets + j];
                        self.set(fp, *dst, bits);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::ArrayTable;
    use rill_ir::{Library, parse_function};
    use std::sync::atomic::AtomicU32;

    fn run_frames(source: &str, frames: &[&[f32]]) -> Vec<Vec<f32>> {
        let library = Library::core().unwrap();
        let entry = parse_function(source).unwrap();
        let program = Program::resolve(&entry, &library, 48000.0).unwrap();
        let layout = program.layout();
        let data: Vec<AtomicU32> = layout
            .slots()
            .iter()
            .map(|s| AtomicU32::new(s.default.to_bits()))
            .collect();
        let mut arrays = ArrayTable::new();
        let mut routine = Interpreter.compile(&program).unwrap();
        frames
            .iter()
            .map(|inputs| {
                let mut out = vec![0.0; entry.outlets.len()];
                let mut ctx = Context {
                    data: &data,
                    arrays: &mut arrays,
                };
                routine.run(&mut ctx, inputs, &mut out);
                out
            })
            .collect()
    }

    #[test]
    fn nested_calls_keep_separate_state() {
        let out = run_frames(
            "func main(x: float) -> (a: float, b: float)\nbegin\n  call lag#0($x) -> %a\n  call lag#1(%a) -> %b\n  store #a, %a\n  store #b, %b\nend\n",
            &[&[1.0], &[2.0], &[3.0]],
        );
        assert_eq!(out, vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![2.0, 1.0]]);
    }

    #[test]
    fn conditionals_and_locals() {
        let out = run_frames(
            "func main(x: float) -> (out: float)\nbegin\n  alloc !r: float\n  lt %neg, $x, 0\n  if %neg\n    store !r, -1\n  else\n    store !r, SampleRate\n  end\n  load %r, !r\n  store #out, %r\nend\n",
            &[&[-3.0], &[3.0]],
        );
        assert_eq!(out, vec![vec![-1.0], vec![48000.0]]);
    }

    #[test]
    fn last_value_reads_callee_state() {
        let out = run_frames(
            "func main(x: float) -> (out: float)\nbegin\n  load %before, last(0, 0)\n  call lag#0($x) -> %a\n  add %sum, %before, %a\n  store #out, %sum\nend\n",
            &[&[5.0], &[7.0]],
        );
        assert_eq!(out, vec![vec![0.0], vec![10.0]]);
    }
}
