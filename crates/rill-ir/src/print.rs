//! Text rendering of IR functions.
//!
//! The output is accepted by [`parse_function`](crate::parse_function), so
//! printing and re-parsing yields an equal function.

use std::fmt::{self, Display, Formatter, Write};

use crate::function::{Fallback, IrFunction};
use crate::ir::{Constant, Instruction, Operand, Source, Target};
use crate::parse::Item;

/// Formats a float so the lexer reads back the same value.
fn number(value: f32) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else {
        format!("{value:?}")
    }
}

struct Printer<'a> {
    func: &'a IrFunction,
}

impl Printer<'_> {
    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Literal(v) => number(*v),
            Operand::Arg(i) => match self.func.inlets.get(*i as usize) {
                Some(inlet) => format!("${}", inlet.name),
                None => format!("${i}"),
            },
            Operand::Var(v) => format!("%{}", v.0),
            Operand::Constant(Constant::SampleRate) => "SampleRate".to_owned(),
            Operand::Constant(Constant::EmptyArray) => "[]".to_owned(),
        }
    }

    fn data(&self, idx: u32) -> String {
        match self.func.data.get(idx as usize) {
            Some(field) => format!("@{}", field.name),
            None => format!("@{idx}"),
        }
    }

    fn local(&self, idx: u32) -> String {
        match self.func.locals.get(idx as usize) {
            Some(field) => format!("!{}", field.name),
            None => format!("!{idx}"),
        }
    }

    fn block(&self, out: &mut String, body: &[Instruction], depth: usize) -> fmt::Result {
        for inst in body {
            self.instruction(out, inst, depth)?;
        }
        Ok(())
    }

    fn instruction(&self, out: &mut String, inst: &Instruction, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match inst {
            Instruction::Alloc(l) => {
                let field = self.func.locals.get(l.0 as usize);
                write!(out, "{indent}alloc {}", self.local(l.0))?;
                if let Some(field) = field
                    && field.data_type != crate::DataType::Float
                {
                    write!(out, ": {}", field.data_type)?;
                }
                writeln!(out)
            }
            Instruction::Load(dst, source) => {
                let source = match source {
                    Source::Local(l) => self.local(l.0),
                    Source::Data(d) => self.data(d.0),
                    Source::LastValue(call, field) => format!("last({call}, {})", field.0),
                };
                writeln!(out, "{indent}load %{}, {source}", dst.0)
            }
            Instruction::Store(target, op) => {
                let target = match target {
                    Target::Local(l) => self.local(l.0),
                    Target::Data(d) => self.data(d.0),
                    Target::Outlet(o) => match self.func.outlets.get(o.0 as usize) {
                        Some(outlet) => format!("#{}", outlet.name),
                        None => format!("#{}", o.0),
                    },
                };
                writeln!(out, "{indent}store {target}, {}", self.operand(op))
            }
            Instruction::Binary(dst, op, a, b) => writeln!(
                out,
                "{indent}{} %{}, {}, {}",
                op.mnemonic(),
                dst.0,
                self.operand(a),
                self.operand(b)
            ),
            Instruction::Compare(dst, op, a, b) => writeln!(
                out,
                "{indent}{} %{}, {}, {}",
                op.mnemonic(),
                dst.0,
                self.operand(a),
                self.operand(b)
            ),
            Instruction::Truncate(dst, a) => {
                writeln!(out, "{indent}trunc %{}, {}", dst.0, self.operand(a))
            }
            Instruction::Length(dst, a) => {
                writeln!(out, "{indent}len %{}, {}", dst.0, self.operand(a))
            }
            Instruction::IndexLoad(dst, array, index) => writeln!(
                out,
                "{indent}iload %{}, {}, {}",
                dst.0,
                self.operand(array),
                self.operand(index)
            ),
            Instruction::IndexStore(array, index, value) => writeln!(
                out,
                "{indent}istore {}, {}, {}",
                self.operand(array),
                self.operand(index),
                self.operand(value)
            ),
            Instruction::Conditional(test, then_block, else_block) => {
                writeln!(out, "{indent}if {}", self.operand(test))?;
                self.block(out, then_block, depth + 1)?;
                if !else_block.is_empty() {
                    writeln!(out, "{indent}else")?;
                    self.block(out, else_block, depth + 1)?;
                }
                writeln!(out, "{indent}end")
            }
            Instruction::Call(id, name, args, results) => {
                let args: Vec<_> = args.iter().map(|a| self.operand(a)).collect();
                write!(out, "{indent}call {name}#{id}({})", args.join(", "))?;
                if !results.is_empty() {
                    let results: Vec<_> = results.iter().map(|r| format!("%{}", r.0)).collect();
                    write!(out, " -> {}", results.join(", "))?;
                }
                writeln!(out)
            }
        }
    }
}

impl Display for IrFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inlets: Vec<_> = self
            .inlets
            .iter()
            .map(|inlet| {
                let fallback = match inlet.fallback {
                    Fallback::Value(v) if v == 0.0 && v.is_sign_positive() => String::new(),
                    Fallback::Value(v) => format!(" = {}", number(v)),
                    Fallback::Normal => " = normal".to_owned(),
                    Fallback::Skip => " = skip".to_owned(),
                    Fallback::EmptyArray => String::new(),
                };
                format!("{}: {}{fallback}", inlet.name, inlet.data_type)
            })
            .collect();
        let outlets: Vec<_> = self
            .outlets
            .iter()
            .map(|o| format!("{}: {}", o.name, o.data_type))
            .collect();
        writeln!(
            f,
            "func {}({}) -> ({})",
            self.name,
            inlets.join(", "),
            outlets.join(", ")
        )?;

        if let Some(lag) = self.lag
            && let Some(field) = self.data.get(lag.field.0 as usize)
        {
            writeln!(f, "  @lag({} = {})", field.name, number(lag.default))?;
        }
        if let Some(display) = &self.display {
            writeln!(f, "  @display(\"{display}\")")?;
        }
        if !self.data.is_empty() {
            writeln!(f, "data")?;
            for field in &self.data {
                writeln!(f, "  {}: {}", field.name, field.data_type)?;
            }
        }

        let mut body = String::new();
        Printer { func: self }.block(&mut body, &self.body, 1)?;
        write!(f, "begin\n{body}end")
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Item::Function(func) => func.fmt(f),
            Item::Alias { name, target } => write!(f, "alias {name}: {target}"),
        }
    }
}
