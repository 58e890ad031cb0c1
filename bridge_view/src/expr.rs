//! A small expression language for line bindings and dynamic colors.
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := "-" unary | power
//! power   := postfix ("^" unary)?
//! postfix := primary ("[" expr "]")*
//! primary := number | name | name "(" args ")" | "(" expr ")"
//! ```
//!
//! Only `step`, `row`, `data` and `t` are visible, plus the functions
//! `sum min max mean len abs sqrt norm col`. Nothing else can be reached.

use std::fmt;

use thiserror::Error;

use neurobridge::schema::Sample;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at {pos}: {msg}")]
    Parse { pos: usize, msg: String },
    #[error("unknown name `{0}`")]
    UnknownName(String),
    #[error("`{0}` is not bound here")]
    Unbound(&'static str),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("{name}() takes {expected} argument(s), got {found}")]
    Arity {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("index {index} out of range for length {len}")]
    Index { index: i64, len: usize },
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("expected {0}")]
    Type(&'static str),
    #[error("no sample")]
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

impl Value {
    pub fn from_sample(sample: &Sample) -> Result<Self, ExprError> {
        match sample {
            Sample::Scalar(x) => Ok(Value::Scalar(*x)),
            Sample::Vector(v) => Ok(Value::Vector(v.clone())),
            Sample::Matrix(m) => Ok(Value::Matrix(m.clone())),
            Sample::Missing => Err(ExprError::Missing),
        }
    }

    pub fn as_scalar(&self) -> Result<f64, ExprError> {
        match self {
            Value::Scalar(x) => Ok(*x),
            Value::Vector(v) if v.len() == 1 => Ok(v[0]),
            _ => Err(ExprError::Type("a scalar")),
        }
    }

    /// Flatten to a list of numbers; scalars become one-element lists.
    pub fn into_vec(self) -> Vec<f64> {
        match self {
            Value::Scalar(x) => vec![x],
            Value::Vector(v) => v,
            Value::Matrix(m) => m.into_iter().flatten().collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
            Value::Matrix(m) => m.len(),
        }
    }

    fn map(self, f: &impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(x) => Value::Scalar(f(x)),
            Value::Vector(v) => Value::Vector(v.into_iter().map(f).collect()),
            Value::Matrix(m) => Value::Matrix(
                m.into_iter()
                    .map(|r| r.into_iter().map(f).collect())
                    .collect(),
            ),
        }
    }
}

/// Names visible to an expression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub step: Option<f64>,
    pub t: Option<f64>,
    pub row: Option<&'a Sample>,
    pub data: Option<&'a Sample>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Var {
    Step,
    T,
    Row,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sum,
    Min,
    Max,
    Mean,
    Len,
    Abs,
    Sqrt,
    Norm,
    Col,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Func::Sum,
            "min" => Func::Min,
            "max" => Func::Max,
            "mean" => Func::Mean,
            "len" => Func::Len,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "norm" => Func::Norm,
            "col" => Func::Col,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Func::Sum => "sum",
            Func::Min => "min",
            Func::Max => "max",
            Func::Mean => "mean",
            Func::Len => "len",
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
            Func::Norm => "norm",
            Func::Col => "col",
        }
    }

    fn arity(self) -> usize {
        if self == Func::Col {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(Var),
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Index(Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// A parsed expression; parse once, evaluate every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut p = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = p.expr()?;
        if let Some((pos, tok)) = p.tokens.get(p.pos) {
            return Err(ExprError::Parse {
                pos: *pos,
                msg: format!("unexpected {tok:?}"),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn eval(&self, scope: &Scope<'_>) -> Result<Value, ExprError> {
        eval(&self.root, scope)
    }

    pub fn eval_scalar(&self, scope: &Scope<'_>) -> Result<f64, ExprError> {
        self.eval(scope)?.as_scalar()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Op(char),
}

fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>, ExprError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            // Exponent: 1e-3
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &src[start..i];
            let n = text.parse().map_err(|_| ExprError::Parse {
                pos: start,
                msg: format!("bad number `{text}`"),
            })?;
            out.push((start, Tok::Num(n)));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push((start, Tok::Ident(src[start..i].to_string())));
        } else if "+-*/^()[],".contains(c) {
            out.push((i, Tok::Op(c)));
            i += 1;
        } else {
            return Err(ExprError::Parse {
                pos: i,
                msg: format!("unexpected character `{c}`"),
            });
        }
    }
    Ok(out)
}

/// Deepest syntax tree the parser builds. Parsing and evaluation recurse
/// once per level, so this bounds their stack use.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::Parse {
                pos: self.here(),
                msg: format!("expression nested deeper than {MAX_DEPTH} levels"),
            });
        }
        Ok(())
    }

    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some((_, Tok::Op(c))) => Some(*c),
            _ => None,
        }
    }

    fn here(&self) -> usize {
        self.tokens.get(self.pos).map_or(usize::MAX, |(p, _)| *p)
    }

    fn expect(&mut self, op: char) -> Result<(), ExprError> {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError::Parse {
                pos: self.here(),
                msg: format!("expected `{op}`"),
            })
        }
    }

    // Left-associative chains deepen the tree by one per operator.
    fn expr(&mut self) -> Result<Node, ExprError> {
        let entered = self.depth;
        let mut lhs = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.descend()?;
            self.pos += 1;
            let rhs = self.term()?;
            let op = if op == '+' { BinOp::Add } else { BinOp::Sub };
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = entered;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, ExprError> {
        let entered = self.depth;
        let mut lhs = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek_op() {
            self.descend()?;
            self.pos += 1;
            let rhs = self.unary()?;
            let op = if op == '*' { BinOp::Mul } else { BinOp::Div };
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = entered;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        self.descend()?;
        let node = if self.peek_op() == Some('-') {
            self.pos += 1;
            Node::Neg(Box::new(self.unary()?))
        } else {
            self.power()?
        };
        self.depth -= 1;
        Ok(node)
    }

    fn power(&mut self) -> Result<Node, ExprError> {
        let base = self.postfix()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(Node::Bin(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Node, ExprError> {
        let entered = self.depth;
        let mut node = self.primary()?;
        while self.peek_op() == Some('[') {
            self.descend()?;
            self.pos += 1;
            let index = self.expr()?;
            self.expect(']')?;
            node = Node::Index(Box::new(node), Box::new(index));
        }
        self.depth = entered;
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        let pos = self.here();
        let Some((_, tok)) = self.tokens.get(self.pos).cloned() else {
            return Err(ExprError::Parse {
                pos,
                msg: "unexpected end of expression".to_string(),
            });
        };
        self.pos += 1;
        match tok {
            Tok::Num(n) => Ok(Node::Num(n)),
            Tok::Op('(') => {
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            Tok::Ident(name) if self.peek_op() == Some('(') => {
                let func = Func::lookup(&name).ok_or(ExprError::UnknownFunction(name))?;
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek_op() != Some(')') {
                    args.push(self.expr()?);
                    while self.peek_op() == Some(',') {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                }
                self.expect(')')?;
                if args.len() != func.arity() {
                    return Err(ExprError::Arity {
                        name: func.name(),
                        expected: func.arity(),
                        found: args.len(),
                    });
                }
                Ok(Node::Call(func, args))
            }
            Tok::Ident(name) => match name.as_str() {
                "step" => Ok(Node::Var(Var::Step)),
                "t" => Ok(Node::Var(Var::T)),
                "row" => Ok(Node::Var(Var::Row)),
                "data" => Ok(Node::Var(Var::Data)),
                _ => Err(ExprError::UnknownName(name)),
            },
            Tok::Op(c) => Err(ExprError::Parse {
                pos,
                msg: format!("unexpected `{c}`"),
            }),
        }
    }
}

fn eval(node: &Node, scope: &Scope<'_>) -> Result<Value, ExprError> {
    match node {
        Node::Num(n) => Ok(Value::Scalar(*n)),
        Node::Var(var) => match var {
            Var::Step => scope.step.map(Value::Scalar).ok_or(ExprError::Unbound("step")),
            Var::T => scope.t.map(Value::Scalar).ok_or(ExprError::Unbound("t")),
            Var::Row => Value::from_sample(scope.row.ok_or(ExprError::Unbound("row"))?),
            Var::Data => Value::from_sample(scope.data.ok_or(ExprError::Unbound("data"))?),
        },
        Node::Neg(inner) => Ok(eval(inner, scope)?.map(&|x| -x)),
        Node::Bin(op, lhs, rhs) => binary(*op, eval(lhs, scope)?, eval(rhs, scope)?),
        Node::Index(target, index) => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?.as_scalar()?;
            index_value(target, index)
        }
        Node::Call(func, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, scope)?);
            }
            call(*func, values)
        }
    }
}

fn apply(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => a.powf(b),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
    use Value::*;
    Ok(match (lhs, rhs) {
        (Scalar(a), Scalar(b)) => Scalar(apply(op, a, b)),
        (Scalar(a), other) => other.map(&|b| apply(op, a, b)),
        (other, Scalar(b)) => other.map(&|a| apply(op, a, b)),
        (Vector(a), Vector(b)) => {
            if a.len() != b.len() {
                return Err(ExprError::Shape(format!("vectors of length {} and {}", a.len(), b.len())));
            }
            Vector(a.iter().zip(&b).map(|(x, y)| apply(op, *x, *y)).collect())
        }
        (Matrix(a), Matrix(b)) => {
            let same = a.len() == b.len() && a.iter().zip(&b).all(|(r, s)| r.len() == s.len());
            if !same {
                return Err(ExprError::Shape("matrices of different shapes".to_string()));
            }
            Matrix(
                a.iter()
                    .zip(&b)
                    .map(|(r, s)| r.iter().zip(s).map(|(x, y)| apply(op, *x, *y)).collect())
                    .collect(),
            )
        }
        _ => return Err(ExprError::Shape("vector and matrix".to_string())),
    })
}

fn resolve_index(index: f64, len: usize) -> Result<usize, ExprError> {
    if index.fract() != 0.0 || !index.is_finite() {
        return Err(ExprError::Type("an integer index"));
    }
    let i = index as i64;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ExprError::Index { index: i, len });
    }
    Ok(resolved as usize)
}

fn index_value(target: Value, index: f64) -> Result<Value, ExprError> {
    match target {
        Value::Scalar(_) => Err(ExprError::Type("a vector or matrix to index")),
        Value::Vector(v) => Ok(Value::Scalar(v[resolve_index(index, v.len())?])),
        Value::Matrix(mut m) => {
            let i = resolve_index(index, m.len())?;
            Ok(Value::Vector(m.swap_remove(i)))
        }
    }
}

fn call(func: Func, mut args: Vec<Value>) -> Result<Value, ExprError> {
    if func == Func::Col {
        let index = args.pop().ok_or(ExprError::Type("a column index"))?.as_scalar()?;
        let Some(Value::Matrix(m)) = args.pop() else {
            return Err(ExprError::Type("a matrix for col()"));
        };
        let mut out = Vec::with_capacity(m.len());
        for row in &m {
            out.push(row[resolve_index(index, row.len())?]);
        }
        return Ok(Value::Vector(out));
    }

    let arg = args.pop().ok_or(ExprError::Type("an argument"))?;
    let scalar = match func {
        Func::Abs => return Ok(arg.map(&f64::abs)),
        Func::Sqrt => return Ok(arg.map(&f64::sqrt)),
        Func::Len => arg.len() as f64,
        Func::Sum => arg.into_vec().iter().sum(),
        Func::Norm => arg.into_vec().iter().map(|x| x * x).sum::<f64>().sqrt(),
        Func::Mean | Func::Min | Func::Max | Func::Col => {
            let values = arg.into_vec();
            if values.is_empty() {
                return Err(ExprError::Type("a non-empty argument"));
            }
            match func {
                Func::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                Func::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                _ => values.iter().sum::<f64>() / values.len() as f64,
            }
        }
    };
    Ok(Value::Scalar(scalar))
}
