//! Parser for the IR text syntax.
//!
//! ```text
//! ; Comments run from ';' to the end of the line.
//! func latch(value: float, update: float) -> (out: float)
//!   @lag(prev = 0)
//! data
//!   prev: float
//! begin
//!   if $update
//!     store @prev, $value
//!   end
//!   load %0, @prev
//!   store #out, %0
//! end
//!
//! alias hold: latch
//! ```
//!
//! ## Grammar
//!
//! ```text
//! source    ::= ( function | alias )*
//! alias     ::= 'alias' name ':' name
//! function  ::= 'func' name '(' inlets? ')' ( '->' '(' outlets? ')' )?
//!               attribute* ( 'data' field* )? 'begin' instr* 'end'
//! inlet     ::= name ':' type ( '=' ( number | 'normal' | 'skip' ) )?
//! attribute ::= '@lag' '(' name ( '=' number )? ')' | '@display' '(' string ')'
//! instr     ::= mnemonic operands          (one per line)
//!             | 'if' operand instr* ( 'else' instr* )? 'end'
//! operand   ::= number | '$'inlet | '%'temp | 'SampleRate' | '[' ']'
//! ```
//!
//! Instructions are line-oriented; every other construct is too, so errors
//! report a line number. A colon directly between two name characters is
//! part of the name (`main:math3`), so declarations put a space after it.

use std::collections::HashMap;

use crate::error::IrError;
use crate::function::{Fallback, Field, Inlet, IrFunction, LagAttr, Outlet};
use crate::ir::{
    BinaryOp, CallId, CompareOp, Constant, DataRef, DataType, Instruction, LocalRef, Operand,
    OutletRef, Source, Target, VarRef,
};

/// A top-level item of an IR source file.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A function definition.
    Function(IrFunction),
    /// `alias name: target`
    Alias {
        /// New callable name.
        name: String,
        /// Existing function it refers to.
        target: String,
    },
}

/// Parses every function and alias in `text`.
pub fn parse_source(text: &str) -> Result<Vec<Item>, IrError> {
    let lines = tokenize(text)?;
    let mut parser = Parser { lines, pos: 0 };
    let mut items = Vec::new();
    while let Some(item) = parser.parse_item()? {
        items.push(item);
    }
    Ok(items)
}

/// Parses a source containing exactly one function definition.
pub fn parse_function(text: &str) -> Result<IrFunction, IrError> {
    let mut items = parse_source(text)?.into_iter();
    match (items.next(), items.next()) {
        (Some(Item::Function(func)), None) => Ok(func),
        _ => Err(IrError::syntax(1, "expected exactly one function definition")),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f32),
    /// Sigil-prefixed reference such as `$value` or `%0`.
    Ref(char, String),
    Str(String),
    Punct(char),
    Arrow,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::Ref(c, s) => write!(f, "'{c}{s}'"),
            Token::Str(s) => write!(f, "string \"{s}\""),
            Token::Punct(c) => write!(f, "'{c}'"),
            Token::Arrow => f.write_str("'->'"),
        }
    }
}

struct Line {
    number: usize,
    tokens: Vec<Token>,
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn tokenize(text: &str) -> Result<Vec<Line>, IrError> {
    let mut lines = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let number = idx + 1;
        let tokens = tokenize_line(raw, number)?;
        if !tokens.is_empty() {
            lines.push(Line { number, tokens });
        }
    }
    Ok(lines)
}

fn tokenize_line(line: &str, number: usize) -> Result<Vec<Token>, IrError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let b = bytes[pos];
        let next = bytes.get(pos + 1).copied();
        match b {
            b';' => break,
            _ if b.is_ascii_whitespace() => pos += 1,
            b'-' if next == Some(b'>') => {
                tokens.push(Token::Arrow);
                pos += 2;
            }
            b'-' if line[pos..].starts_with("-inf") => {
                tokens.push(Token::Number(f32::NEG_INFINITY));
                pos += 4;
            }
            b'0'..=b'9' | b'-' | b'+' | b'.'
                if b.is_ascii_digit() || next.is_some_and(|n| n.is_ascii_digit() || n == b'.') =>
            {
                let start = pos;
                pos += 1;
                while pos < bytes.len() {
                    let c = bytes[pos];
                    let exponent_sign = (c == b'-' || c == b'+')
                        && matches!(bytes[pos - 1], b'e' | b'E');
                    if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || exponent_sign
                    {
                        pos += 1;
                    } else {
                        break;
                    }
                }
                let literal = &line[start..pos];
                let value = literal.parse::<f32>().map_err(|_| {
                    IrError::syntax(number, format!("invalid number '{literal}'"))
                })?;
                tokens.push(Token::Number(value));
            }
            b'"' => {
                let start = pos + 1;
                let end = line[start..]
                    .find('"')
                    .ok_or_else(|| IrError::syntax(number, "unterminated string"))?;
                tokens.push(Token::Str(line[start..start + end].to_owned()));
                pos = start + end + 1;
            }
            b'$' | b'%' | b'@' | b'#' | b'!' => {
                let start = pos + 1;
                pos = start;
                while pos < bytes.len() && is_ident_char(bytes[pos]) {
                    pos += 1;
                }
                if pos == start {
                    return Err(IrError::syntax(
                        number,
                        format!("expected a name after '{}'", b as char),
                    ));
                }
                tokens.push(Token::Ref(b as char, line[start..pos].to_owned()));
            }
            b'(' | b')' | b',' | b':' | b'=' | b'[' | b']' => {
                tokens.push(Token::Punct(b as char));
                pos += 1;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = pos;
                while pos < bytes.len() {
                    let joined = bytes[pos] == b':'
                        && bytes.get(pos + 1).is_some_and(|&n| is_ident_char(n));
                    if !is_ident_char(bytes[pos]) && !joined {
                        break;
                    }
                    pos += 1;
                }
                tokens.push(Token::Ident(line[start..pos].to_owned()));
            }
            _ => {
                let ch = line[pos..].chars().next().unwrap_or('?');
                return Err(IrError::syntax(
                    number,
                    format!("unexpected character '{ch}'"),
                ));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Token cursor (one line)
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a Line) -> Self {
        Self {
            tokens: &line.tokens,
            pos: 0,
            line: line.number,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> IrError {
        IrError::syntax(self.line, message)
    }

    fn unexpected(&self, token: Option<&Token>, expected: &str) -> IrError {
        match token {
            Some(t) => self.error(format!("expected {expected}, found {t}")),
            None => self.error(format!("expected {expected}, found end of line")),
        }
    }

    fn eat_punct(&mut self, ch: char) -> bool {
        if self.peek() == Some(&Token::Punct(ch)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, ch: char) -> Result<(), IrError> {
        let token = self.next();
        if token == Some(&Token::Punct(ch)) {
            Ok(())
        } else {
            Err(self.unexpected(token, &format!("'{ch}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<&'a str, IrError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(self.unexpected(other, "a name")),
        }
    }

    fn expect_number(&mut self) -> Result<f32, IrError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(*n),
            other => Err(self.unexpected(other, "a number")),
        }
    }

    fn expect_ref(&mut self, sigil: char) -> Result<&'a str, IrError> {
        match self.next() {
            Some(Token::Ref(c, name)) if *c == sigil => Ok(name),
            other => Err(self.unexpected(other, &format!("a '{sigil}' reference"))),
        }
    }

    fn expect_type(&mut self) -> Result<DataType, IrError> {
        match self.expect_ident()? {
            "float" => Ok(DataType::Float),
            "array" => Ok(DataType::Array),
            other => Err(self.error(format!("unknown type '{other}'"))),
        }
    }

    fn expect_end(&self) -> Result<(), IrError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error(format!("unexpected trailing {t}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

/// Name tables used while parsing one function body.
struct Scope {
    vars: HashMap<String, VarRef>,
    next_call: u32,
}

impl Parser {
    fn current(&self) -> Option<&Line> {
        self.lines.get(self.pos)
    }

    fn last_line(&self) -> usize {
        self.lines.last().map_or(1, |l| l.number)
    }

    fn first_word(&self) -> Option<&str> {
        match self.current()?.tokens.first()? {
            Token::Ident(word) => Some(word),
            _ => None,
        }
    }

    fn parse_item(&mut self) -> Result<Option<Item>, IrError> {
        let Some(line) = self.lines.get(self.pos) else {
            return Ok(None);
        };
        let mut cur = Cursor::new(line);
        let keyword = cur.expect_ident()?.to_owned();
        match keyword.as_str() {
            "alias" => {
                let name = cur.expect_ident()?.to_owned();
                cur.expect_punct(':')?;
                let target = cur.expect_ident()?.to_owned();
                cur.expect_end()?;
                self.pos += 1;
                Ok(Some(Item::Alias { name, target }))
            }
            "func" => self.parse_function().map(|f| Some(Item::Function(f))),
            other => Err(cur.error(format!("expected 'func' or 'alias', found '{other}'"))),
        }
    }

    fn parse_function(&mut self) -> Result<IrFunction, IrError> {
        let line = &self.lines[self.pos];
        let mut cur = Cursor::new(line);
        cur.expect_ident()?; // func
        let mut func = IrFunction::new(cur.expect_ident()?);

        cur.expect_punct('(')?;
        if !cur.eat_punct(')') {
            loop {
                func.inlets.push(parse_inlet(&mut cur)?);
                if cur.eat_punct(')') {
                    break;
                }
                cur.expect_punct(',')?;
            }
        }

        if cur.peek() == Some(&Token::Arrow) {
            cur.next();
            cur.expect_punct('(')?;
            if !cur.eat_punct(')') {
                loop {
                    let name = cur.expect_ident()?.to_owned();
                    cur.expect_punct(':')?;
                    let data_type = cur.expect_type()?;
                    func.outlets.push(Outlet { name, data_type });
                    if cur.eat_punct(')') {
                        break;
                    }
                    cur.expect_punct(',')?;
                }
            }
        }
        cur.expect_end()?;
        self.pos += 1;

        // Attributes reference data fields, which are declared afterwards.
        let mut lag: Option<(usize, String, f32)> = None;
        while let Some(line) = self.current() {
            let mut cur = Cursor::new(line);
            match cur.peek() {
                Some(Token::Ref('@', attr)) if attr == "lag" => {
                    cur.next();
                    cur.expect_punct('(')?;
                    let field = cur.expect_ident()?.to_owned();
                    let default = if cur.eat_punct('=') {
                        cur.expect_number()?
                    } else {
                        0.0
                    };
                    cur.expect_punct(')')?;
                    cur.expect_end()?;
                    lag = Some((line.number, field, default));
                }
                Some(Token::Ref('@', attr)) if attr == "display" => {
                    cur.next();
                    cur.expect_punct('(')?;
                    let text = match cur.next() {
                        Some(Token::Str(s)) => s.clone(),
                        other => return Err(cur.unexpected(other, "a string")),
                    };
                    cur.expect_punct(')')?;
                    cur.expect_end()?;
                    func.display = Some(text);
                }
                Some(Token::Ref('@', attr)) => {
                    return Err(cur.error(format!("unknown attribute '@{attr}'")));
                }
                _ => break,
            }
            self.pos += 1;
        }

        if self.first_word() == Some("data") {
            self.pos += 1;
            while let Some(line) = self.current() {
                if self.first_word() == Some("begin") {
                    break;
                }
                let mut cur = Cursor::new(line);
                let name = cur.expect_ident()?.to_owned();
                cur.expect_punct(':')?;
                let data_type = cur.expect_type()?;
                cur.expect_end()?;
                func.data.push(Field { name, data_type });
                self.pos += 1;
            }
        }

        if let Some((line, field, default)) = lag {
            let field = func
                .data_index(&field)
                .ok_or_else(|| IrError::syntax(line, format!("unknown data field '{field}'")))?;
            func.lag = Some(LagAttr { field, default });
        }

        match self.current() {
            Some(line) if self.first_word() == Some("begin") => {
                Cursor::new(line).expect_end_after(1)?;
                self.pos += 1;
            }
            Some(line) => return Err(IrError::syntax(line.number, "expected 'begin'")),
            None => return Err(IrError::syntax(self.last_line(), "expected 'begin'")),
        }

        let mut scope = Scope {
            vars: HashMap::new(),
            next_call: 0,
        };
        let (body, _) = self.parse_block(&mut func, &mut scope, &["end"])?;
        func.body = body;
        Ok(func)
    }

    /// Parses instructions until a line starting with one of `terminators`,
    /// which is consumed and returned.
    fn parse_block(
        &mut self,
        func: &mut IrFunction,
        scope: &mut Scope,
        terminators: &[&'static str],
    ) -> Result<(Vec<Instruction>, &'static str), IrError> {
        let mut block = Vec::new();
        loop {
            let Some(word) = self.first_word() else {
                return match self.current() {
                    Some(line) => Err(IrError::syntax(line.number, "expected an instruction")),
                    None => Err(IrError::syntax(
                        self.last_line(),
                        format!("expected '{}'", terminators.join("' or '")),
                    )),
                };
            };
            if let Some(term) = terminators.iter().find(|t| **t == word) {
                Cursor::new(&self.lines[self.pos]).expect_end_after(1)?;
                self.pos += 1;
                return Ok((block, *term));
            }

            if word == "if" {
                let line = &self.lines[self.pos];
                let mut cur = Cursor::new(line);
                cur.next();
                let test = parse_operand(&mut cur, func, scope)?;
                cur.expect_end()?;
                self.pos += 1;
                let (then_block, term) = self.parse_block(func, scope, &["else", "end"])?;
                let else_block = if term == "else" {
                    self.parse_block(func, scope, &["end"])?.0
                } else {
                    Vec::new()
                };
                block.push(Instruction::Conditional(test, then_block, else_block));
                continue;
            }

            let line = &self.lines[self.pos];
            let inst = parse_instruction(&mut Cursor::new(line), func, scope)?;
            block.push(inst);
            self.pos += 1;
        }
    }
}

impl Cursor<'_> {
    fn expect_end_after(mut self, skip: usize) -> Result<(), IrError> {
        self.pos += skip;
        self.expect_end()
    }
}

fn parse_inlet(cur: &mut Cursor<'_>) -> Result<Inlet, IrError> {
    let name = cur.expect_ident()?.to_owned();
    cur.expect_punct(':')?;
    let data_type = cur.expect_type()?;
    let mut fallback = Fallback::default_for(data_type);
    if cur.eat_punct('=') {
        fallback = match (cur.next(), data_type) {
            (Some(Token::Number(v)), DataType::Float) => Fallback::Value(*v),
            (Some(Token::Ident(word)), _) if word == "skip" => Fallback::Skip,
            (Some(Token::Ident(word)), DataType::Float) if word == "normal" => Fallback::Normal,
            (Some(Token::Ident(word)), DataType::Float) if word == "inf" => {
                Fallback::Value(f32::INFINITY)
            }
            (other, DataType::Float) => {
                return Err(cur.unexpected(other, "a number, 'normal' or 'skip'"));
            }
            (other, DataType::Array) => return Err(cur.unexpected(other, "'skip'")),
        };
    }
    Ok(Inlet {
        name,
        data_type,
        fallback,
    })
}

fn parse_instruction(
    cur: &mut Cursor<'_>,
    func: &mut IrFunction,
    scope: &mut Scope,
) -> Result<Instruction, IrError> {
    let mnemonic = cur.expect_ident()?;
    let inst = match mnemonic {
        "alloc" => {
            let name = cur.expect_ref('!')?;
            let data_type = if cur.eat_punct(':') {
                cur.expect_type()?
            } else {
                DataType::Float
            };
            let local = match func.locals.iter().position(|l| l.name == name) {
                Some(idx) if func.locals[idx].data_type != data_type => {
                    return Err(cur.error(format!("scratch cell '!{name}' changes type")));
                }
                Some(idx) => LocalRef(idx as u32),
                None => {
                    func.locals.push(Field::new(name, data_type));
                    LocalRef(func.locals.len() as u32 - 1)
                }
            };
            Instruction::Alloc(local)
        }
        "load" => {
            let dst = define_var(cur, scope)?;
            cur.expect_punct(',')?;
            let source = match cur.next() {
                Some(Token::Ref('@', name)) => Source::Data(resolve_data(cur, func, name)?),
                Some(Token::Ref('!', name)) => Source::Local(resolve_local(cur, func, name)?),
                Some(Token::Ident(word)) if word == "last" => {
                    cur.expect_punct('(')?;
                    let call = cur.expect_number()?;
                    cur.expect_punct(',')?;
                    let field = cur.expect_number()?;
                    cur.expect_punct(')')?;
                    Source::LastValue(CallId(call as u32), DataRef(field as u32))
                }
                other => return Err(cur.unexpected(other, "'@field', '!cell' or 'last(..)'")),
            };
            Instruction::Load(dst, source)
        }
        "store" => {
            let target = match cur.next() {
                Some(Token::Ref('@', name)) => Target::Data(resolve_data(cur, func, name)?),
                Some(Token::Ref('!', name)) => Target::Local(resolve_local(cur, func, name)?),
                Some(Token::Ref('#', name)) => Target::Outlet(resolve_outlet(cur, func, name)?),
                other => return Err(cur.unexpected(other, "'@field', '!cell' or '#outlet'")),
            };
            cur.expect_punct(',')?;
            Instruction::Store(target, parse_operand(cur, func, scope)?)
        }
        "add" | "sub" | "mul" | "div" | "rem" => {
            let op = match mnemonic {
                "add" => BinaryOp::Add,
                "sub" => BinaryOp::Sub,
                "mul" => BinaryOp::Mul,
                "div" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            let (dst, a, b) = parse_ternary(cur, func, scope)?;
            Instruction::Binary(dst, op, a, b)
        }
        "eq" | "ne" | "lt" | "le" | "gt" | "ge" => {
            let op = match mnemonic {
                "eq" => CompareOp::Eq,
                "ne" => CompareOp::Ne,
                "lt" => CompareOp::Lt,
                "le" => CompareOp::Le,
                "gt" => CompareOp::Gt,
                _ => CompareOp::Ge,
            };
            let (dst, a, b) = parse_ternary(cur, func, scope)?;
            Instruction::Compare(dst, op, a, b)
        }
        "trunc" => {
            let (dst, a) = parse_binary(cur, func, scope)?;
            Instruction::Truncate(dst, a)
        }
        "len" => {
            let (dst, a) = parse_binary(cur, func, scope)?;
            Instruction::Length(dst, a)
        }
        "iload" => {
            let (dst, array, index) = parse_ternary(cur, func, scope)?;
            Instruction::IndexLoad(dst, array, index)
        }
        "istore" => {
            let array = parse_operand(cur, func, scope)?;
            cur.expect_punct(',')?;
            let index = parse_operand(cur, func, scope)?;
            cur.expect_punct(',')?;
            let value = parse_operand(cur, func, scope)?;
            Instruction::IndexStore(array, index, value)
        }
        "call" => {
            let name = cur.expect_ident()?.to_owned();
            let id = match cur.peek() {
                Some(Token::Ref('#', id)) => {
                    cur.next();
                    let id = id
                        .parse::<u32>()
                        .map_err(|_| cur.error(format!("invalid call id '#{id}'")))?;
                    scope.next_call = scope.next_call.max(id + 1);
                    CallId(id)
                }
                _ => {
                    scope.next_call += 1;
                    CallId(scope.next_call - 1)
                }
            };
            cur.expect_punct('(')?;
            let mut args = Vec::new();
            if !cur.eat_punct(')') {
                loop {
                    args.push(parse_operand(cur, func, scope)?);
                    if cur.eat_punct(')') {
                        break;
                    }
                    cur.expect_punct(',')?;
                }
            }
            let mut results = Vec::new();
            if cur.peek() == Some(&Token::Arrow) {
                cur.next();
                loop {
                    results.push(define_var(cur, scope)?);
                    if !cur.eat_punct(',') {
                        break;
                    }
                }
            }
            Instruction::Call(id, name, args, results)
        }
        other => return Err(cur.error(format!("unknown instruction '{other}'"))),
    };
    cur.expect_end()?;
    Ok(inst)
}

fn parse_binary(
    cur: &mut Cursor<'_>,
    func: &IrFunction,
    scope: &mut Scope,
) -> Result<(VarRef, Operand), IrError> {
    let dst = define_var(cur, scope)?;
    cur.expect_punct(',')?;
    let a = parse_operand(cur, func, scope)?;
    Ok((dst, a))
}

fn parse_ternary(
    cur: &mut Cursor<'_>,
    func: &IrFunction,
    scope: &mut Scope,
) -> Result<(VarRef, Operand, Operand), IrError> {
    let (dst, a) = parse_binary(cur, func, scope)?;
    cur.expect_punct(',')?;
    let b = parse_operand(cur, func, scope)?;
    Ok((dst, a, b))
}

fn define_var(cur: &mut Cursor<'_>, scope: &mut Scope) -> Result<VarRef, IrError> {
    let name = cur.expect_ref('%')?;
    let next = VarRef(scope.vars.len() as u32);
    Ok(*scope.vars.entry(name.to_owned()).or_insert(next))
}

fn parse_operand(
    cur: &mut Cursor<'_>,
    func: &IrFunction,
    scope: &Scope,
) -> Result<Operand, IrError> {
    match cur.next() {
        Some(Token::Number(v)) => Ok(Operand::Literal(*v)),
        Some(Token::Ident(word)) => match word.as_str() {
            "SampleRate" => Ok(Operand::Constant(Constant::SampleRate)),
            "inf" => Ok(Operand::Literal(f32::INFINITY)),
            "NaN" => Ok(Operand::Literal(f32::NAN)),
            other => Err(cur.error(format!("unknown constant '{other}'"))),
        },
        Some(Token::Ref('$', name)) => {
            let index = match name.parse::<u32>() {
                Ok(index) => index,
                Err(_) => func
                    .inlet_index(name)
                    .ok_or_else(|| cur.error(format!("unknown inlet '${name}'")))?,
            };
            Ok(Operand::Arg(index))
        }
        Some(Token::Ref('%', name)) => scope
            .vars
            .get(name.as_str())
            .map(|v| Operand::Var(*v))
            .ok_or_else(|| cur.error(format!("temporary '%{name}' used before assignment"))),
        Some(Token::Punct('[')) => {
            cur.expect_punct(']')?;
            Ok(Operand::Constant(Constant::EmptyArray))
        }
        other => Err(cur.unexpected(other, "an operand")),
    }
}

fn resolve_data(cur: &Cursor<'_>, func: &IrFunction, name: &str) -> Result<DataRef, IrError> {
    match name.parse::<u32>() {
        Ok(idx) => Ok(DataRef(idx)),
        Err(_) => func
            .data_index(name)
            .ok_or_else(|| cur.error(format!("unknown data field '@{name}'"))),
    }
}

fn resolve_local(cur: &Cursor<'_>, func: &IrFunction, name: &str) -> Result<LocalRef, IrError> {
    func.locals
        .iter()
        .position(|l| l.name == name)
        .map(|idx| LocalRef(idx as u32))
        .ok_or_else(|| cur.error(format!("scratch cell '!{name}' used before 'alloc'")))
}

fn resolve_outlet(cur: &Cursor<'_>, func: &IrFunction, name: &str) -> Result<OutletRef, IrError> {
    match name.parse::<u32>() {
        Ok(idx) => Ok(OutletRef(idx)),
        Err(_) => func
            .outlet_index(name)
            .map(OutletRef)
            .ok_or_else(|| cur.error(format!("unknown outlet '#{name}'"))),
    }
}
