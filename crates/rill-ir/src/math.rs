//! Math expression compiler.
//!
//! Compiles one-line arithmetic expressions into IR functions with a single
//! `out` outlet. Inline math nodes in flows use this syntax.
//!
//! ```text
//! = $0 * 0.5 + lag($1)
//! = ($0 > 0.5) * SampleRate
//! ```
//!
//! ## Grammar
//!
//! ```text
//! math       ::= '=' compare
//! compare    ::= additive ( ( '==' | '!=' | '<' | '<=' | '>' | '>=' ) additive )*
//! additive   ::= term ( ( '+' | '-' ) term )*
//! term       ::= unary ( ( '*' | '/' | '%' ) unary )*
//! unary      ::= '-' unary | atom
//! atom       ::= number | '$' digits | name ( '(' args? ')' )? | '(' compare ')'
//! ```
//!
//! All binary operators are left-associative. `SampleRate` is the engine's
//! sample rate; any other bare name is a call with no arguments.

use crate::error::MathError;
use crate::function::{Inlet, IrFunction, Outlet};
use crate::ir::{
    BinaryOp, CallId, CompareOp, Constant, Instruction, Operand, OutletRef, Target, VarRef,
};

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

/// Binary operators of the expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    /// Arithmetic, lowered to a `BinaryOp`.
    Arith(BinaryOp),
    /// Comparison, lowered to a `CompareOp`.
    Compare(CompareOp),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Float literal.
    Number(f32),
    /// Positional inlet `$N`.
    Arg(u32),
    /// The `SampleRate` constant.
    SampleRate,
    /// Unary minus.
    Neg(Box<Expr>),
    /// Binary operator application.
    Binary(MathOp, Box<Expr>, Box<Expr>),
    /// Call of a named function; the result is its first outlet.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Highest `$N` referenced, if any.
    pub fn max_arg(&self) -> Option<u32> {
        match self {
            Self::Arg(n) => Some(*n),
            Self::Number(_) | Self::SampleRate => None,
            Self::Neg(e) => e.max_arg(),
            Self::Binary(_, a, b) => a.max_arg().max(b.max_arg()),
            Self::Call(_, args) => args.iter().filter_map(Expr::max_arg).max(),
        }
    }
}

/// A parsed `= ...` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MathExpression {
    /// Source text.
    pub text: String,
    /// Parsed tree.
    pub expr: Expr,
}

impl MathExpression {
    /// Parses expression text. The text must start with `=`.
    pub fn parse(text: &str) -> Result<Self, MathError> {
        let mut parser = Parser::new(text);
        parser.skip_ws();
        if parser.peek() != Some('=') {
            return Err(MathError::syntax(parser.pos, "expression must start with '='"));
        }
        parser.advance();
        let expr = parser.parse_compare()?;
        parser.skip_ws();
        if let Some(c) = parser.peek() {
            return Err(MathError::syntax(parser.pos, format!("unexpected '{c}'")));
        }
        Ok(Self {
            text: text.to_owned(),
            expr,
        })
    }

    /// Number of inlets the expression needs: highest `$N` plus one.
    pub fn inlet_count(&self) -> u32 {
        self.expr.max_arg().map_or(0, |n| n + 1)
    }

    /// Compiles to an IR function called `name`.
    ///
    /// With `inlets` given, the function has exactly that many inlets and a
    /// `$N` past them is [`MathError::UnboundArgument`]. Otherwise the count
    /// is derived from the expression.
    pub fn compile(&self, name: &str, inlets: Option<u32>) -> Result<IrFunction, MathError> {
        let count = match inlets {
            Some(declared) => {
                if let Some(max) = self.expr.max_arg()
                    && max >= declared
                {
                    return Err(MathError::UnboundArgument {
                        index: max,
                        inlets: declared,
                    });
                }
                declared
            }
            None => self.inlet_count(),
        };

        let mut func = IrFunction::new(name);
        func.inlets = (0..count).map(|i| Inlet::float(format!("in{i}"))).collect();
        func.outlets.push(Outlet::float("out"));

        let mut emitter = Emitter::default();
        let result = emitter.expr(&self.expr);
        emitter
            .body
            .push(Instruction::Store(Target::Outlet(OutletRef(0)), result));
        func.body = emitter.body;

        #[cfg(feature = "tracing")]
        tracing::debug!(name, inlets = count, instructions = func.body.len(), "math: compiled");

        Ok(func)
    }
}

/// Parses and compiles `text` in one step.
pub fn compile_expression(
    name: &str,
    text: &str,
    inlets: Option<u32>,
) -> Result<IrFunction, MathError> {
    MathExpression::parse(text)?.compile(name, inlets)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Recursive descent parser over the ASCII expression text.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).map(|&b| b as char)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).map(|&b| b as char)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s.as_bytes())
    }

    fn unexpected(&self) -> MathError {
        match self.peek() {
            Some(c) => MathError::syntax(self.pos, format!("unexpected '{c}'")),
            None => MathError::syntax(self.pos, "unexpected end of expression"),
        }
    }

    /// `compare ::= additive ( cmp additive )*`
    fn parse_compare(&mut self) -> Result<Expr, MathError> {
        let mut lhs = self.parse_additive()?;
        loop {
            self.skip_ws();
            let (op, width) = if self.starts_with("==") {
                (CompareOp::Eq, 2)
            } else if self.starts_with("!=") {
                (CompareOp::Ne, 2)
            } else if self.starts_with("<=") {
                (CompareOp::Le, 2)
            } else if self.starts_with(">=") {
                (CompareOp::Ge, 2)
            } else if self.starts_with("<") {
                (CompareOp::Lt, 1)
            } else if self.starts_with(">") {
                (CompareOp::Gt, 1)
            } else {
                return Ok(lhs);
            };
            self.pos += width;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(MathOp::Compare(op), Box::new(lhs), Box::new(rhs));
        }
    }

    /// `additive ::= term ( ( '+' | '-' ) term )*`
    fn parse_additive(&mut self) -> Result<Expr, MathError> {
        let mut lhs = self.parse_term()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(MathOp::Arith(op), Box::new(lhs), Box::new(rhs));
        }
    }

    /// `term ::= unary ( ( '*' | '/' | '%' ) unary )*`
    fn parse_term(&mut self) -> Result<Expr, MathError> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                Some('%') => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(MathOp::Arith(op), Box::new(lhs), Box::new(rhs));
        }
    }

    /// `unary ::= '-' unary | atom`
    ///
    /// A minus directly before a number is folded into the literal.
    fn parse_unary(&mut self) -> Result<Expr, MathError> {
        self.skip_ws();
        if self.peek() == Some('-') {
            if self
                .peek_at(1)
                .is_some_and(|c| c.is_ascii_digit() || c == '.')
            {
                return self.parse_number();
            }
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, MathError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '.' || c == '+' => self.parse_number(),
            Some('$') => {
                let start = self.pos;
                self.advance();
                let digits = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
                let text = std::str::from_utf8(&self.input[digits..self.pos]).unwrap_or("");
                text.parse::<u32>()
                    .map(Expr::Arg)
                    .map_err(|_| MathError::syntax(start, "expected an argument index after '$'"))
            }
            Some('(') => {
                self.advance();
                let inner = self.parse_compare()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err(self.unexpected());
                }
                self.advance();
                Ok(inner)
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_name(),
            _ => Err(self.unexpected()),
        }
    }

    /// `name ( '(' compare ( ',' compare )* ')' )?`
    fn parse_name(&mut self) -> Result<Expr, MathError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            self.advance();
        }
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();

        self.skip_ws();
        if self.peek() != Some('(') {
            if name == "SampleRate" {
                return Ok(Expr::SampleRate);
            }
            return Ok(Expr::Call(name, Vec::new()));
        }
        self.advance();

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(Expr::Call(name, args));
        }
        loop {
            args.push(self.parse_compare()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.advance(),
                Some(')') => {
                    self.advance();
                    return Ok(Expr::Call(name, args));
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    /// `[+-]? digits ( '.' digits )? ( [eE] [+-]? digits )?`
    fn parse_number(&mut self) -> Result<Expr, MathError> {
        let start = self.pos;
        if matches!(self.peek(), Some('+' | '-')) {
            self.advance();
        }
        let mut mantissa = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            mantissa = true;
        }
        if self.peek() == Some('.') {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                mantissa = true;
            }
        }
        if !mantissa {
            return Err(MathError::syntax(start, "expected a number"));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exp_start = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(MathError::syntax(exp_start, "expected exponent digits"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = String::from_utf8_lossy(&self.input[start..self.pos]);
        text.parse::<f32>()
            .map(Expr::Number)
            .map_err(|_| MathError::syntax(start, format!("invalid number '{text}'")))
    }
}

// ---------------------------------------------------------------------------
// Code generation
// ---------------------------------------------------------------------------

/// Emits one instruction per operator application.
#[derive(Default)]
struct Emitter {
    body: Vec<Instruction>,
    next_var: u32,
    next_call: u32,
}

impl Emitter {
    fn fresh(&mut self) -> VarRef {
        self.next_var += 1;
        VarRef(self.next_var - 1)
    }

    fn expr(&mut self, expr: &Expr) -> Operand {
        match expr {
            Expr::Number(v) => Operand::Literal(*v),
            Expr::Arg(n) => Operand::Arg(*n),
            Expr::SampleRate => Operand::Constant(Constant::SampleRate),
            Expr::Neg(inner) => {
                let value = self.expr(inner);
                let dst = self.fresh();
                self.body.push(Instruction::Binary(
                    dst,
                    BinaryOp::Mul,
                    value,
                    Operand::Literal(-1.0),
                ));
                Operand::Var(dst)
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.expr(lhs);
                let b = self.expr(rhs);
                let dst = self.fresh();
                self.body.push(match op {
                    MathOp::Arith(op) => Instruction::Binary(dst, *op, a, b),
                    MathOp::Compare(op) => Instruction::Compare(dst, *op, a, b),
                });
                Operand::Var(dst)
            }
            Expr::Call(name, args) => {
                let args = args.iter().map(|a| self.expr(a)).collect();
                let dst = self.fresh();
                let id = CallId(self.next_call);
                self.next_call += 1;
                self.body
                    .push(Instruction::Call(id, name.clone(), args, vec![dst]));
                Operand::Var(dst)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Expr {
        MathExpression::parse(text).unwrap().expr
    }

    fn arith(op: BinaryOp, a: Expr, b: Expr) -> Expr {
        Expr::Binary(MathOp::Arith(op), Box::new(a), Box::new(b))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse("= $0 + $1 * 2"),
            arith(
                BinaryOp::Add,
                Expr::Arg(0),
                arith(BinaryOp::Mul, Expr::Arg(1), Expr::Number(2.0))
            )
        );
    }

    #[test]
    fn operators_are_left_associative() {
        assert_eq!(
            parse("=1-2-3"),
            arith(
                BinaryOp::Sub,
                arith(BinaryOp::Sub, Expr::Number(1.0), Expr::Number(2.0)),
                Expr::Number(3.0)
            )
        );
    }

    #[test]
    fn comparison_binds_loosest() {
        let Expr::Binary(MathOp::Compare(CompareOp::Le), lhs, _) = parse("= $0 + 1 <= 2") else {
            panic!("expected comparison at the root");
        };
        assert!(matches!(*lhs, Expr::Binary(MathOp::Arith(BinaryOp::Add), ..)));
    }

    #[test]
    fn names_calls_and_constants() {
        assert_eq!(parse("= SampleRate"), Expr::SampleRate);
        assert_eq!(parse("= noise"), Expr::Call("noise".into(), vec![]));
        assert_eq!(
            parse("= lag($0, -1.5e2)"),
            Expr::Call("lag".into(), vec![Expr::Arg(0), Expr::Number(-150.0)])
        );
        assert_eq!(parse("= -$0"), Expr::Neg(Box::new(Expr::Arg(0))));
    }

    #[test]
    fn syntax_errors_report_offset() {
        assert_eq!(
            MathExpression::parse("$0 + 1").unwrap_err(),
            MathError::syntax(0, "expression must start with '='")
        );
        let err = MathExpression::parse("= 1 + * 2").unwrap_err();
        assert!(matches!(err, MathError::Syntax { offset: 6, .. }), "{err}");
        let err = MathExpression::parse("= (1 + 2").unwrap_err();
        assert!(matches!(err, MathError::Syntax { offset: 8, .. }), "{err}");
    }

    #[test]
    fn unbound_argument_against_declared_inlets() {
        let err = compile_expression("m", "= $0 + $2", Some(2)).unwrap_err();
        assert_eq!(err, MathError::UnboundArgument { index: 2, inlets: 2 });

        let func = compile_expression("m", "= $0 + $2", None).unwrap();
        assert_eq!(func.inlets.len(), 3);
        assert_eq!(func.outlets.len(), 1);
    }

    #[test]
    fn compiles_one_instruction_per_operator() {
        let func = compile_expression("m", "= -($0 * 2) < 3", None).unwrap();
        assert_eq!(
            func.body,
            vec![
                Instruction::Binary(VarRef(0), BinaryOp::Mul, Operand::Arg(0), Operand::Literal(2.0)),
                Instruction::Binary(VarRef(1), BinaryOp::Mul, Operand::Var(VarRef(0)), Operand::Literal(-1.0)),
                Instruction::Compare(VarRef(2), CompareOp::Lt, Operand::Var(VarRef(1)), Operand::Literal(3.0)),
                Instruction::Store(Target::Outlet(OutletRef(0)), Operand::Var(VarRef(2))),
            ]
        );
        crate::validate(&func, None).unwrap();
    }

    #[test]
    fn calls_get_distinct_ids() {
        let func = compile_expression("m", "= lag($0) + lag($0)", None).unwrap();
        let ids: Vec<_> = func
            .body
            .iter()
            .filter_map(|i| match i {
                Instruction::Call(id, ..) => Some(id.0),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
