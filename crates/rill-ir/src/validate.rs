//! Structural checks for IR functions.
//!
//! [`validate`] checks a function on its own: operand types, temporaries
//! defined before use, outlets written on every path, fallback and lag rules,
//! and unique call ids. When a [`Library`] is supplied, call sites are also
//! checked against the callee's signature.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::IrError;
use crate::function::{Fallback, IrFunction};
use crate::ir::{
    CallId, Constant, DataType, Instruction, Operand, Source, Target, VarRef, walk_body,
};
use crate::library::Library;

/// Validates `func`, resolving callees through `library` when given.
pub fn validate(func: &IrFunction, library: Option<&Library>) -> Result<(), IrError> {
    let err = |message: String| IrError::validation(&func.name, message);

    check_unique_names(func)?;

    for (idx, inlet) in func.inlets.iter().enumerate() {
        match (inlet.fallback, inlet.data_type) {
            (Fallback::Skip, _) if !func.is_lag_capable() => {
                return Err(err(format!(
                    "inlet '{}' uses 'skip' but the function has no @lag field",
                    inlet.name
                )));
            }
            (Fallback::Normal, _) if idx == 0 => {
                return Err(err(format!(
                    "inlet '{}' uses 'normal' but has no previous inlet",
                    inlet.name
                )));
            }
            (Fallback::EmptyArray, DataType::Float) => {
                return Err(err(format!("float inlet '{}' cannot default to []", inlet.name)));
            }
            (Fallback::Value(_) | Fallback::Normal, DataType::Array) => {
                return Err(err(format!("array inlet '{}' must default to []", inlet.name)));
            }
            _ => {}
        }
    }

    if let Some(lag) = func.lag {
        match func.data.get(lag.field.0 as usize) {
            Some(field) if field.data_type == DataType::Float => {}
            Some(field) => {
                return Err(err(format!("@lag field '{}' must be a float", field.name)));
            }
            None => return Err(err(format!("@lag field @{} does not exist", lag.field.0))),
        }
    }

    let mut calls: HashMap<CallId, &str> = HashMap::new();
    let mut duplicate = None;
    walk_body(&func.body, |inst| {
        if let Instruction::Call(id, name, ..) = inst
            && calls.insert(*id, name).is_some()
        {
            duplicate.get_or_insert(*id);
        }
    });
    if let Some(id) = duplicate {
        return Err(err(format!("call id #{id} is used more than once")));
    }

    let mut checker = Checker {
        func,
        library,
        calls: &calls,
        vars: HashMap::new(),
    };
    let written = checker.block(&func.body, BTreeSet::new())?;

    for (idx, outlet) in func.outlets.iter().enumerate() {
        if !written.contains(&(idx as u32)) {
            return Err(IrError::OutletNotWritten {
                function: func.name.clone(),
                outlet: outlet.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_unique_names(func: &IrFunction) -> Result<(), IrError> {
    let groups: [(&str, Vec<&str>); 3] = [
        ("inlet", func.inlets.iter().map(|i| i.name.as_str()).collect()),
        ("outlet", func.outlets.iter().map(|o| o.name.as_str()).collect()),
        ("data field", func.data.iter().map(|d| d.name.as_str()).collect()),
    ];
    for (kind, names) in groups {
        let mut seen = HashSet::new();
        if let Some(name) = names.into_iter().find(|n| !seen.insert(*n)) {
            return Err(IrError::validation(
                &func.name,
                format!("{kind} '{name}' is declared twice"),
            ));
        }
    }
    Ok(())
}

/// Walks a body tracking temporary types and written outlets.
///
/// A temporary's type is `None` when it comes from a call whose callee is not
/// known (no library supplied); such values match any expected type.
struct Checker<'a> {
    func: &'a IrFunction,
    library: Option<&'a Library>,
    calls: &'a HashMap<CallId, &'a str>,
    vars: HashMap<VarRef, Option<DataType>>,
}

impl Checker<'_> {
    fn err(&self, message: String) -> IrError {
        IrError::validation(&self.func.name, message)
    }

    fn operand_type(&self, op: &Operand) -> Result<Option<DataType>, IrError> {
        match op {
            Operand::Literal(_) | Operand::Constant(Constant::SampleRate) => {
                Ok(Some(DataType::Float))
            }
            Operand::Constant(Constant::EmptyArray) => Ok(Some(DataType::Array)),
            Operand::Arg(i) => self
                .func
                .inlets
                .get(*i as usize)
                .map(|inlet| Some(inlet.data_type))
                .ok_or_else(|| self.err(format!("inlet ${i} does not exist"))),
            Operand::Var(v) => self
                .vars
                .get(v)
                .copied()
                .ok_or_else(|| self.err(format!("temporary %{} is used before assignment", v.0))),
        }
    }

    fn expect(&self, op: &Operand, expected: DataType, what: &str) -> Result<(), IrError> {
        match self.operand_type(op)? {
            Some(found) if found != expected => Err(self.err(format!(
                "{what} expects {expected}, found {found}"
            ))),
            _ => Ok(()),
        }
    }

    fn define(&mut self, var: VarRef, data_type: Option<DataType>) -> Result<(), IrError> {
        match self.vars.insert(var, data_type) {
            Some(Some(old)) if data_type.is_some_and(|new| new != old) => Err(self.err(format!(
                "temporary %{} changes type from {old}",
                var.0
            ))),
            _ => Ok(()),
        }
    }

    fn local_type(&self, idx: u32) -> Result<DataType, IrError> {
        self.func
            .locals
            .get(idx as usize)
            .map(|l| l.data_type)
            .ok_or_else(|| self.err(format!("scratch cell !{idx} does not exist")))
    }

    fn data_type(&self, idx: u32) -> Result<DataType, IrError> {
        self.func
            .data
            .get(idx as usize)
            .map(|d| d.data_type)
            .ok_or_else(|| self.err(format!("data field @{idx} does not exist")))
    }

    /// Returns the set of outlets written on every path through `body`.
    fn block(
        &mut self,
        body: &[Instruction],
        mut written: BTreeSet<u32>,
    ) -> Result<BTreeSet<u32>, IrError> {
        for inst in body {
            match inst {
                Instruction::Alloc(l) => {
                    self.local_type(l.0)?;
                }
                Instruction::Load(dst, source) => {
                    let data_type = match source {
                        Source::Local(l) => Some(self.local_type(l.0)?),
                        Source::Data(d) => Some(self.data_type(d.0)?),
                        Source::LastValue(call, field) => self.last_value_type(*call, field.0)?,
                    };
                    self.define(*dst, data_type)?;
                }
                Instruction::Store(target, op) => {
                    let (expected, what) = match target {
                        Target::Local(l) => (self.local_type(l.0)?, "scratch cell store"),
                        Target::Data(d) => (self.data_type(d.0)?, "data store"),
                        Target::Outlet(o) => {
                            let outlet = self.func.outlets.get(o.0 as usize).ok_or_else(|| {
                                self.err(format!("outlet #{} does not exist", o.0))
                            })?;
                            written.insert(o.0);
                            (outlet.data_type, "outlet store")
                        }
                    };
                    self.expect(op, expected, what)?;
                }
                Instruction::Binary(dst, op, a, b) => {
                    self.expect(a, DataType::Float, op.mnemonic())?;
                    self.expect(b, DataType::Float, op.mnemonic())?;
                    self.define(*dst, Some(DataType::Float))?;
                }
                Instruction::Compare(dst, op, a, b) => {
                    self.expect(a, DataType::Float, op.mnemonic())?;
                    self.expect(b, DataType::Float, op.mnemonic())?;
                    self.define(*dst, Some(DataType::Float))?;
                }
                Instruction::Truncate(dst, a) => {
                    self.expect(a, DataType::Float, "trunc")?;
                    self.define(*dst, Some(DataType::Float))?;
                }
                Instruction::Length(dst, a) => {
                    self.expect(a, DataType::Array, "len")?;
                    self.define(*dst, Some(DataType::Float))?;
                }
                Instruction::IndexLoad(dst, array, index) => {
                    self.expect(array, DataType::Array, "iload")?;
                    self.expect(index, DataType::Float, "iload index")?;
                    self.define(*dst, Some(DataType::Float))?;
                }
                Instruction::IndexStore(array, index, value) => {
                    self.expect(array, DataType::Array, "istore")?;
                    self.expect(index, DataType::Float, "istore index")?;
                    self.expect(value, DataType::Float, "istore value")?;
                }
                Instruction::Conditional(test, then_block, else_block) => {
                    self.expect(test, DataType::Float, "if")?;
                    // Temporaries, like outlets, survive the `if` only when
                    // both branches assign them.
                    let before = self.vars.clone();
                    let then_written = self.block(then_block, written.clone())?;
                    let then_vars = std::mem::replace(&mut self.vars, before);
                    let else_written = self.block(else_block, written.clone())?;
                    for (var, ty) in &self.vars {
                        if let (Some(Some(a)), Some(b)) = (then_vars.get(var), ty)
                            && a != b
                        {
                            return Err(self.err(format!(
                                "temporary %{} is {a} in one branch and {b} in the other",
                                var.0
                            )));
                        }
                    }
                    self.vars.retain(|var, _| then_vars.contains_key(var));
                    written = then_written.intersection(&else_written).copied().collect();
                }
                Instruction::Call(_, name, args, results) => {
                    self.call(name, args, results)?;
                }
            }
        }
        Ok(written)
    }

    fn call(&mut self, name: &str, args: &[Operand], results: &[VarRef]) -> Result<(), IrError> {
        let Some(library) = self.library else {
            for arg in args {
                self.operand_type(arg)?;
            }
            for result in results {
                self.define(*result, None)?;
            }
            return Ok(());
        };

        let callee = library
            .get(name)
            .ok_or_else(|| IrError::UnknownFunction(name.to_owned()))?;
        if args.len() != callee.inlets.len() {
            return Err(self.err(format!(
                "call to '{name}' passes {} arguments, expected {}",
                args.len(),
                callee.inlets.len()
            )));
        }
        for (arg, inlet) in args.iter().zip(&callee.inlets) {
            self.expect(arg, inlet.data_type, &format!("'{name}' inlet '{}'", inlet.name))?;
        }
        if results.len() > callee.outlets.len() {
            return Err(self.err(format!(
                "call to '{name}' receives {} results, but it has {} outlets",
                results.len(),
                callee.outlets.len()
            )));
        }
        for (result, outlet) in results.iter().zip(&callee.outlets) {
            self.define(*result, Some(outlet.data_type))?;
        }
        Ok(())
    }

    fn last_value_type(&self, call: CallId, field: u32) -> Result<Option<DataType>, IrError> {
        let name = self
            .calls
            .get(&call)
            .ok_or_else(|| self.err(format!("last value refers to missing call #{call}")))?;
        let Some(library) = self.library else {
            return Ok(None);
        };
        let callee = library
            .get(name)
            .ok_or_else(|| IrError::UnknownFunction((*name).to_owned()))?;
        callee
            .data
            .get(field as usize)
            .map(|d| Some(d.data_type))
            .ok_or_else(|| self.err(format!("'{name}' has no data field @{field}")))
    }
}
