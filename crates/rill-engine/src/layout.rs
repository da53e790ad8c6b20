//! Call-tree resolution and data-segment layout.
//!
//! Every function gets a relative layout: its own data fields first, then
//! one region per call site holding the callee's whole segment, in call id
//! order. A function is compiled once and runs against whichever region its
//! caller hands it.
//!
//! Flattening the tree from the entry function gives every slot a key made
//! of the call path and the field name, for example `lag#3.prev` or
//! `main:math5#5.lag#0.prev`. Keys are stable across recompiles as long as
//! the call ids and callee names are, which is what state migration matches
//! on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rill_ir::{CallId, DataType, Instruction, IrFunction, Library, walk_body};

use crate::error::{EngineError, Result};

/// A call site's callee and the offset of its region in the caller's segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    /// Index of the callee in [`Program::functions`].
    pub function: usize,
    /// Slot offset relative to the caller's segment.
    pub offset: u32,
}

/// One resolved function.
#[derive(Debug, Clone)]
pub struct ProgramFunction {
    /// The IR.
    pub ir: Arc<IrFunction>,
    /// Slots in this function's segment, children included.
    pub size: u32,
    /// Number of `%` temporaries the body uses.
    pub vars: u32,
    /// Call sites of the body.
    pub children: BTreeMap<CallId, Child>,
}

/// A function with its whole call tree resolved. Callees precede callers;
/// the entry function is last.
#[derive(Debug, Clone)]
pub struct Program {
    functions: Vec<ProgramFunction>,
    sample_rate: f32,
}

impl Program {
    /// Resolves every function reachable from `entry` through `library`.
    pub fn resolve(entry: &IrFunction, library: &Library, sample_rate: f32) -> Result<Self> {
        for (kind, ports) in [
            ("inlet", entry.inlets.iter().map(|i| (&i.name, i.data_type)).collect::<Vec<_>>()),
            ("outlet", entry.outlets.iter().map(|o| (&o.name, o.data_type)).collect()),
        ] {
            if let Some((name, _)) = ports.iter().find(|(_, t)| *t != DataType::Float) {
                return Err(EngineError::mismatch(format!(
                    "{kind} '{name}' of '{}' must be a float to run at the top level",
                    entry.name
                )));
            }
        }

        let mut resolver = Resolver {
            library,
            functions: Vec::new(),
            index: HashMap::new(),
            stack: Vec::new(),
        };
        resolver.visit(Arc::new(entry.clone()), false)?;

        tracing::debug!(
            entry = %entry.name,
            functions = resolver.functions.len(),
            "program resolved"
        );
        Ok(Self {
            functions: resolver.functions,
            sample_rate,
        })
    }

    /// Resolved functions, callees first.
    pub fn functions(&self) -> &[ProgramFunction] {
        &self.functions
    }

    /// Index of the entry function.
    pub fn entry(&self) -> usize {
        self.functions.len() - 1
    }

    /// The entry function.
    pub fn entry_function(&self) -> &ProgramFunction {
        &self.functions[self.entry()]
    }

    /// Value of the `SampleRate` constant.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Flattens the segment of the entry function into keyed slots.
    pub fn layout(&self) -> Layout {
        let mut layout = Layout {
            slots: Vec::with_capacity(self.entry_function().size as usize),
            index: HashMap::new(),
            calls: BTreeMap::new(),
        };
        self.flatten(self.entry(), "", &mut layout.slots);
        for (i, slot) in layout.slots.iter().enumerate() {
            layout.index.insert(slot.key.clone(), i);
        }

        let entry = self.entry_function();
        for (id, child) in &entry.children {
            let callee = &self.functions[child.function].ir;
            let field_slot = |field: usize| child.offset as usize + field;
            layout.calls.insert(
                id.0,
                TopCall {
                    lag: callee.lag.map(|lag| field_slot(lag.field.0 as usize)),
                    array: callee
                        .data
                        .iter()
                        .position(|f| f.data_type == DataType::Array)
                        .map(field_slot),
                    function: callee.name.clone(),
                },
            );
        }

        tracing::debug!(slots = layout.slots.len(), "data layout built");
        layout
    }

    fn flatten(&self, function: usize, prefix: &str, slots: &mut Vec<Slot>) {
        let func = &self.functions[function];
        for (i, field) in func.ir.data.iter().enumerate() {
            let default = match func.ir.lag {
                Some(lag) if lag.field.0 as usize == i => lag.default,
                _ => 0.0,
            };
            slots.push(Slot {
                key: format!("{prefix}{}", field.name),
                data_type: field.data_type,
                default,
            });
        }
        for (id, child) in &func.children {
            let callee = &self.functions[child.function].ir.name;
            self.flatten(child.function, &format!("{prefix}{callee}#{id}."), slots);
        }
    }
}

struct Resolver<'a> {
    library: &'a Library,
    functions: Vec<ProgramFunction>,
    index: HashMap<String, usize>,
    stack: Vec<String>,
}

impl Resolver<'_> {
    fn visit(&mut self, ir: Arc<IrFunction>, shared: bool) -> Result<usize> {
        if self.stack.contains(&ir.name) {
            return Err(EngineError::RecursiveCall(ir.name.clone()));
        }
        if shared && let Some(&idx) = self.index.get(&ir.name) {
            return Ok(idx);
        }

        let mut calls = Vec::new();
        let mut vars = 0u32;
        walk_body(&ir.body, |inst| {
            let mut def = |v: u32| vars = vars.max(v + 1);
            match inst {
                Instruction::Load(v, _)
                | Instruction::Binary(v, ..)
                | Instruction::Truncate(v, _)
                | Instruction::Compare(v, ..)
                | Instruction::IndexLoad(v, ..)
                | Instruction::Length(v, _) => def(v.0),
                Instruction::Call(id, name, _, results) => {
                    for r in results {
                        def(r.0);
                    }
                    calls.push((*id, name.clone()));
                }
                _ => {}
            }
        });

        self.stack.push(ir.name.clone());
        let mut children = BTreeMap::new();
        let mut callees = Vec::with_capacity(calls.len());
        for (id, name) in calls {
            let callee = self
                .library
                .get(&name)
                .ok_or_else(|| EngineError::UnknownFunction(name.clone()))?;
            callees.push((id, self.visit(Arc::clone(callee), true)?));
        }
        self.stack.pop();

        let mut size = ir.data.len() as u32;
        for (id, function) in callees {
            children.insert(id, Child { function, offset: size });
            size += self.functions[function].size;
        }

        let idx = self.functions.len();
        if shared {
            self.index.insert(ir.name.clone(), idx);
        }
        self.functions.push(ProgramFunction {
            ir,
            size,
            vars,
            children,
        });
        Ok(idx)
    }
}

/// One flattened data slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Call path and field name.
    pub key: String,
    /// Field type.
    pub data_type: DataType,
    /// Value at instantiation, before presets.
    pub default: f32,
}

/// A call site of the entry function, addressed by its call id.
#[derive(Debug, Clone, PartialEq)]
pub struct TopCall {
    /// Canonical callee name.
    pub function: String,
    /// Slot of the callee's lag field.
    pub lag: Option<usize>,
    /// Slot of the callee's first array field.
    pub array: Option<usize>,
}

/// The entry function's segment, flattened.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    calls: BTreeMap<u32, TopCall>,
}

impl Layout {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the program has no persistent state.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All slots in segment order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Slot index of `key`.
    pub fn slot(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Top-level call site `node`.
    pub fn call(&self, node: u32) -> Option<&TopCall> {
        self.calls.get(&node)
    }

    /// Slot of the lag field of top-level call `node`.
    pub fn lag_slot(&self, node: u32) -> Option<usize> {
        self.calls.get(&node).and_then(|c| c.lag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_ir::parse_function;

    fn lib() -> Library {
        Library::core().unwrap()
    }

    #[test]
    fn keys_follow_call_paths() {
        let mut library = lib();
        library
            .load_source(
                "func pair(x: float) -> (out: float)\nbegin\n  call lag#0($x) -> %a\n  call lag#1(%a) -> %b\n  store #out, %b\nend\n",
            )
            .unwrap();
        let entry = parse_function(
            "func main(x: float) -> (out: float)\ndata\n  gain: float\nbegin\n  call pair#4($x) -> %a\n  call delta#2(%a) -> %b\n  store #out, %b\nend\n",
        )
        .unwrap();

        let program = Program::resolve(&entry, &library, 48000.0).unwrap();
        let layout = program.layout();
        let keys: Vec<&str> = layout.slots().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "gain",
                "delta#2.prev",
                "delta#2.out",
                "pair#4.lag#0.prev",
                "pair#4.lag#1.prev"
            ]
        );
        assert_eq!(layout.lag_slot(2), Some(2));
        assert_eq!(layout.lag_slot(4), None);
        assert_eq!(program.entry_function().size, 5);
        assert_eq!(program.entry_function().vars, 2);
    }

    #[test]
    fn shared_callees_resolve_once() {
        let entry = parse_function(
            "func main() -> (out: float)\nbegin\n  call lag#0(1) -> %a\n  call lag#1(%a) -> %b\n  store #out, %b\nend\n",
        )
        .unwrap();
        let program = Program::resolve(&entry, &lib(), 48000.0).unwrap();
        assert_eq!(program.functions().len(), 2);
        assert_eq!(program.entry(), 1);
    }

    #[test]
    fn unknown_and_recursive_calls_fail() {
        let entry = parse_function(
            "func main() -> (out: float)\nbegin\n  call nothing#0() -> %a\n  store #out, %a\nend\n",
        )
        .unwrap();
        assert!(matches!(
            Program::resolve(&entry, &lib(), 48000.0),
            Err(EngineError::UnknownFunction(name)) if name == "nothing"
        ));

        let mut library = lib();
        library
            .load_source(
                "func ping() -> (out: float)\nbegin\n  call pong#0() -> %a\n  store #out, %a\nend\n\
                 func pong() -> (out: float)\nbegin\n  call ping#0() -> %a\n  store #out, %a\nend\n",
            )
            .unwrap();
        let entry = library.get("ping").unwrap();
        assert!(matches!(
            Program::resolve(entry, &library, 48000.0),
            Err(EngineError::RecursiveCall(_))
        ));
    }

    #[test]
    fn lag_defaults_and_array_slots() {
        let mut library = lib();
        library
            .load_source(
                "func hold() -> (out: float)\n  @lag(v = 0.5)\ndata\n  v: float\nbegin\n  load %v, @v\n  store #out, %v\nend\n",
            )
            .unwrap();
        let entry = parse_function(
            "func main() -> (out: float)\nbegin\n  call hold#1() -> %a\n  call buffer#2() -> %b\n  store #out, %a\nend\n",
        )
        .unwrap();
        let layout = Program::resolve(&entry, &library, 48000.0).unwrap().layout();
        assert_eq!(layout.slots()[0].default, 0.5);
        assert_eq!(layout.call(2).unwrap().array, Some(1));
        assert_eq!(layout.slots()[1].data_type, DataType::Array);
    }

    #[test]
    fn array_ports_cannot_run_at_top_level() {
        let entry = lib().get("length").unwrap().clone();
        assert!(matches!(
            Program::resolve(&entry, &lib(), 48000.0),
            Err(EngineError::TypeMismatch(_))
        ));
    }
}
