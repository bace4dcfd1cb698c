//! Script compilation and evaluation.
//!
//! The evaluator covers the expression subset the bridge exercises: literal
//! values, arithmetic with JS number semantics, string concatenation, global
//! and member property access, assignment, and calls into template-backed
//! functions. Scripts are fully parsed before any statement runs, so a
//! malformed source faults as a compiler error without side effects.

use crate::engine::NativeEngine;
use crate::heap::ValueRef;
use crate::value::JsValue;
use crate::value_type::JsValueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Compiler,
    Execution,
    Internal,
}

impl FaultKind {
    /// The negative handle type tag reported for this fault.
    pub fn tag(self) -> JsValueType {
        match self {
            FaultKind::Compiler => JsValueType::CompilerError,
            FaultKind::Execution => JsValueType::ExecutionError,
            FaultKind::Internal => JsValueType::InternalError,
        }
    }
}

/// A script failure with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFault {
    pub kind: FaultKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ScriptFault {
    fn compiler(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self { kind: FaultKind::Compiler, message: message.into(), line, column }
    }

    fn execution(message: impl Into<String>) -> Self {
        Self { kind: FaultKind::Execution, message: message.into(), line: 0, column: 0 }
    }

    pub fn format(&self, source_label: &str) -> String {
        format!(
            "{}\r\n  Location: {}:{}:{}",
            self.message, source_label, self.line, self.column
        )
    }
}

/// Parse and run `source` against the engine's global object. The value of
/// the last statement is the script's result.
pub fn evaluate(engine: &mut NativeEngine, source: &str) -> Result<ValueRef, ScriptFault> {
    let program = parse(source)?;
    let mut result = None;
    for statement in &program {
        result = Some(eval_expr(engine, statement)?);
    }
    Ok(match result {
        Some(v) => v,
        None => engine.heap_mut().alloc(JsValue::Undefined),
    })
}

// ----------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    column: u32,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), line: 1, column: 1 }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ScriptFault> {
        let mut tokens = Vec::new();
        loop {
            while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.chars.peek() else {
                tokens.push(Token { tok: Tok::Eof, line, column });
                return Ok(tokens);
            };

            let tok = if c.is_ascii_digit() {
                let mut text = String::new();
                while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
                    text.push(self.bump().unwrap());
                }
                let n = text.parse::<f64>().map_err(|_| {
                    ScriptFault::compiler(format!("malformed number '{text}'"), line, column)
                })?;
                Tok::Number(n)
            } else if c == '"' || c == '\'' {
                let quote = self.bump().unwrap();
                let mut text = String::new();
                loop {
                    match self.bump() {
                        Some(c) if c == quote => break,
                        Some('\\') => match self.bump() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(c) => text.push(c),
                            None => {
                                return Err(ScriptFault::compiler(
                                    "unterminated string literal",
                                    line,
                                    column,
                                ));
                            }
                        },
                        Some(c) => text.push(c),
                        None => {
                            return Err(ScriptFault::compiler(
                                "unterminated string literal",
                                line,
                                column,
                            ));
                        }
                    }
                }
                Tok::Str(text)
            } else if c.is_alphabetic() || c == '_' || c == '$' {
                let mut text = String::new();
                while matches!(self.chars.peek(),
                    Some(c) if c.is_alphanumeric() || *c == '_' || *c == '$')
                {
                    text.push(self.bump().unwrap());
                }
                Tok::Ident(text)
            } else if "+-*/%().,;=[]".contains(c) {
                self.bump();
                Tok::Punct(c)
            } else {
                return Err(ScriptFault::compiler(
                    format!("unexpected character '{c}'"),
                    line,
                    column,
                ));
            };
            tokens.push(Token { tok, line, column });
        }
    }
}

// ----------------------------------------------------------------------
// Parser

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        self.pos += 1;
        t
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek().tok == Tok::Punct(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ScriptFault> {
        let t = self.peek().clone();
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(ScriptFault::compiler(format!("expected '{c}'"), t.line, t.column))
        }
    }

    fn program(&mut self) -> Result<Vec<Expr>, ScriptFault> {
        let mut statements = Vec::new();
        loop {
            while self.eat_punct(';') {}
            if self.peek().tok == Tok::Eof {
                return Ok(statements);
            }
            statements.push(self.expression()?);
            if self.peek().tok != Tok::Eof {
                self.expect_punct(';')?;
            }
        }
    }

    fn expression(&mut self) -> Result<Expr, ScriptFault> {
        let lhs = self.additive()?;
        if self.peek().tok == Tok::Punct('=') {
            let t = self.bump();
            if !matches!(lhs, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..)) {
                return Err(ScriptFault::compiler(
                    "invalid assignment target",
                    t.line,
                    t.column,
                ));
            }
            let rhs = self.expression()?;
            return Ok(Expr::Assign(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ScriptFault> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek().tok {
                Tok::Punct('+') => BinOp::Add,
                Tok::Punct('-') => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptFault> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().tok {
                Tok::Punct('*') => BinOp::Mul,
                Tok::Punct('/') => BinOp::Div,
                Tok::Punct('%') => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ScriptFault> {
        if self.eat_punct('-') {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ScriptFault> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct('.') {
                let t = self.bump();
                let Tok::Ident(name) = t.tok else {
                    return Err(ScriptFault::compiler(
                        "expected property name after '.'",
                        t.line,
                        t.column,
                    ));
                };
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat_punct('[') {
                let index = self.expression()?;
                self.expect_punct(']')?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_punct('(') {
                let mut args = Vec::new();
                if !self.eat_punct(')') {
                    loop {
                        args.push(self.expression()?);
                        if self.eat_punct(')') {
                            break;
                        }
                        self.expect_punct(',')?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptFault> {
        let t = self.bump();
        match t.tok {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                _ => Expr::Ident(name),
            }),
            Tok::Punct('(') => {
                let inner = self.expression()?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            Tok::Punct('[') => {
                let mut items = Vec::new();
                if !self.eat_punct(']') {
                    loop {
                        items.push(self.expression()?);
                        if self.eat_punct(']') {
                            break;
                        }
                        self.expect_punct(',')?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Eof => Err(ScriptFault::compiler("unexpected end of script", t.line, t.column)),
            _ => Err(ScriptFault::compiler("unexpected token", t.line, t.column)),
        }
    }
}

fn parse(source: &str) -> Result<Vec<Expr>, ScriptFault> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.program()
}

// ----------------------------------------------------------------------
// Evaluation

fn eval_expr(engine: &mut NativeEngine, expr: &Expr) -> Result<ValueRef, ScriptFault> {
    match expr {
        Expr::Number(n) => Ok(alloc_number(engine, *n)),
        Expr::Str(s) => Ok(engine.heap_mut().alloc(JsValue::Str(s.clone()))),
        Expr::Bool(b) => Ok(engine.heap_mut().alloc(JsValue::Boolean(*b))),
        Expr::Null => Ok(engine.heap_mut().alloc(JsValue::Null)),
        Expr::Undefined => Ok(engine.heap_mut().alloc(JsValue::Undefined)),
        Expr::Ident(name) => {
            let global = engine.global_value();
            Ok(match engine.get_property(global, name) {
                Some(v) => v,
                None => engine.heap_mut().alloc(JsValue::Undefined),
            })
        }
        Expr::Array(items) => {
            let mut refs = Vec::with_capacity(items.len());
            for item in items {
                refs.push(eval_expr(engine, item)?);
            }
            Ok(engine.heap_mut().alloc(JsValue::Array(refs)))
        }
        Expr::Member(object, name) => {
            let obj = eval_expr(engine, object)?;
            Ok(match engine.get_property(obj, name) {
                Some(v) => v,
                None => engine.heap_mut().alloc(JsValue::Undefined),
            })
        }
        Expr::Index(object, index) => {
            let obj = eval_expr(engine, object)?;
            let i = eval_expr(engine, index)?;
            let i = to_number(engine, i) as u32;
            Ok(match engine.get_element(obj, i) {
                Some(v) => v,
                None => engine.heap_mut().alloc(JsValue::Undefined),
            })
        }
        Expr::Assign(target, value) => {
            let v = eval_expr(engine, value)?;
            match target.as_ref() {
                Expr::Ident(name) => {
                    let global = engine.global_value();
                    engine.set_property(global, name, v);
                }
                Expr::Member(object, name) => {
                    let obj = eval_expr(engine, object)?;
                    engine.set_property(obj, name, v);
                }
                Expr::Index(object, index) => {
                    let obj = eval_expr(engine, object)?;
                    let i = eval_expr(engine, index)?;
                    let i = to_number(engine, i) as u32;
                    engine.set_element(obj, i, v);
                }
                _ => unreachable!("parser rejects other assignment targets"),
            }
            Ok(v)
        }
        Expr::Neg(inner) => {
            let v = eval_expr(engine, inner)?;
            let n = to_number(engine, v);
            Ok(alloc_number(engine, -n))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(engine, lhs)?;
            let r = eval_expr(engine, rhs)?;
            eval_binary(engine, *op, l, r)
        }
        Expr::Call(callee, args) => {
            let f = eval_expr(engine, callee)?;
            if !matches!(engine.heap().get(f), Some(JsValue::Function(_))) {
                let name = callee_name(callee);
                return Err(ScriptFault::execution(format!(
                    "TypeError: {name} is not a function"
                )));
            }
            let mut arg_refs = Vec::with_capacity(args.len());
            for arg in args {
                arg_refs.push(eval_expr(engine, arg)?);
            }
            let this = match callee.as_ref() {
                Expr::Member(object, _) => eval_expr(engine, object)?,
                _ => engine.global_value(),
            };
            match engine.call_function(f, this, &arg_refs) {
                Ok(Some(v)) => Ok(v),
                Ok(None) => Ok(engine.heap_mut().alloc(JsValue::Undefined)),
                Err(e) => Err(ScriptFault {
                    kind: FaultKind::Internal,
                    message: e.to_string(),
                    line: 0,
                    column: 0,
                }),
            }
        }
    }
}

fn callee_name(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(_, name) => name.clone(),
        _ => "expression".to_string(),
    }
}

fn alloc_number(engine: &mut NativeEngine, n: f64) -> ValueRef {
    let value = if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 {
        JsValue::Int32(n as i32)
    } else {
        JsValue::Number(n)
    };
    engine.heap_mut().alloc(value)
}

fn to_number(engine: &NativeEngine, v: ValueRef) -> f64 {
    match engine.heap().get(v) {
        Some(JsValue::Int32(i)) => *i as f64,
        Some(JsValue::Number(n)) | Some(JsValue::NumberObject(n)) => *n,
        Some(JsValue::Boolean(b)) | Some(JsValue::BooleanObject(b)) => {
            if *b { 1.0 } else { 0.0 }
        }
        Some(JsValue::Null) => 0.0,
        Some(JsValue::Str(s)) | Some(JsValue::StringObject(s)) => {
            s.trim().parse().unwrap_or(f64::NAN)
        }
        Some(JsValue::Date(ms)) => *ms,
        _ => f64::NAN,
    }
}

fn is_stringish(engine: &NativeEngine, v: ValueRef) -> bool {
    matches!(engine.heap().get(v), Some(JsValue::Str(_)) | Some(JsValue::StringObject(_)))
}

fn eval_binary(
    engine: &mut NativeEngine,
    op: BinOp,
    l: ValueRef,
    r: ValueRef,
) -> Result<ValueRef, ScriptFault> {
    if op == BinOp::Add && (is_stringish(engine, l) || is_stringish(engine, r)) {
        let ls = display(engine, l);
        let rs = display(engine, r);
        return Ok(engine.heap_mut().alloc(JsValue::Str(ls + &rs)));
    }
    let a = to_number(engine, l);
    let b = to_number(engine, r);
    // IEEE semantics throughout: division by zero yields an infinity.
    let n = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
    };
    Ok(alloc_number(engine, n))
}

fn display(engine: &NativeEngine, v: ValueRef) -> String {
    match engine.heap().get(v) {
        Some(value) => value.to_display_string(),
        None => "undefined".to_string(),
    }
}
