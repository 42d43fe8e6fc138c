//! Band-algebra expressions.
//!
//! An expression is one or more comma separated sub-expressions, each producing
//! one output band. Bands are referenced as `b1`, `b2`, ... and combined with
//! arithmetic, comparison and logical operators and a small set of functions:
//!
//! - `(b4 - b1) / (b4 + b1)` - normalized difference
//! - `where(b1 > 0, b2 / b1, 0)` - conditional
//! - `b1, b2 * 0.5, sqrt(b3)` - three output bands
//!
//! Parsing produces an explicit syntax tree so an expression can be validated
//! before any pixel is read.

use std::collections::{BTreeSet, HashMap};

use crate::error::{ExportError, Result};
use crate::model::BandArray;

/// Value written where band math yields no valid result.
pub const NODATA_SENTINEL: f64 = -9999.0;

/// Results beyond this magnitude are treated as evaluation overflow.
const OVERFLOW_LIMIT: f64 = 1e30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sqrt,
    Abs,
    Exp,
    Log,
    Log10,
    Log1p,
    Expm1,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Arctan2,
    Sinh,
    Cosh,
    Tanh,
    Ceil,
    Floor,
    Where,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "log1p" => Function::Log1p,
            "expm1" => Function::Expm1,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "arcsin" => Function::Arcsin,
            "arccos" => Function::Arccos,
            "arctan" => Function::Arctan,
            "arctan2" => Function::Arctan2,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "ceil" => Function::Ceil,
            "floor" => Function::Floor,
            "where" => Function::Where,
            _ => return None,
        };
        Some(func)
    }

    fn arity(&self) -> usize {
        match self {
            Function::Arctan2 => 2,
            Function::Where => 3,
            _ => 1,
        }
    }

    fn apply_unary(&self, x: f64) -> f64 {
        match self {
            Function::Sqrt => x.sqrt(),
            Function::Abs => x.abs(),
            Function::Exp => x.exp(),
            Function::Log => x.ln(),
            Function::Log10 => x.log10(),
            Function::Log1p => x.ln_1p(),
            Function::Expm1 => x.exp_m1(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Arcsin => x.asin(),
            Function::Arccos => x.acos(),
            Function::Arctan => x.atan(),
            Function::Sinh => x.sinh(),
            Function::Cosh => x.cosh(),
            Function::Tanh => x.tanh(),
            Function::Ceil => x.ceil(),
            Function::Floor => x.floor(),
            Function::Arctan2 | Function::Where => unreachable!("not a unary function"),
        }
    }
}

/// Syntax tree of one sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Band(usize),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Call {
        func: Function,
        args: Vec<Node>,
    },
}

impl Node {
    fn collect_bands(&self, bands: &mut BTreeSet<usize>) {
        match self {
            Node::Number(_) => {}
            Node::Band(b) => {
                bands.insert(*b);
            }
            Node::Unary { operand, .. } => operand.collect_bands(bands),
            Node::Binary { lhs, rhs, .. } => {
                lhs.collect_bands(bands);
                rhs.collect_bands(bands);
            }
            Node::Call { args, .. } => args.iter().for_each(|a| a.collect_bands(bands)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubExpression {
    pub source: String,
    pub root: Node,
}

/// A parsed band-algebra expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    outputs: Vec<SubExpression>,
}

impl Expression {
    pub fn parse(input: &str) -> Result<Self> {
        let segments = split_top_level(input);
        let mut outputs = Vec::with_capacity(segments.len());

        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(ExportError::expression(input, "empty sub-expression"));
            }
            let tokens =
                tokenize(segment).map_err(|message| ExportError::expression(segment, message))?;
            let root = Parser::new(&tokens)
                .parse()
                .map_err(|message| ExportError::expression(segment, message))?;
            outputs.push(SubExpression {
                source: segment.to_string(),
                root,
            });
        }

        Ok(Self {
            source: input.to_string(),
            outputs,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn outputs(&self) -> &[SubExpression] {
        &self.outputs
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Distinct referenced band numbers in ascending order.
    pub fn bands(&self) -> Vec<usize> {
        let mut bands = BTreeSet::new();
        for output in &self.outputs {
            output.root.collect_bands(&mut bands);
        }
        bands.into_iter().collect()
    }

    /// Fails when a referenced band does not exist in a raster with `band_count` bands.
    pub fn check_bands(&self, band_count: usize) -> Result<()> {
        if let Some(band) = self.bands().into_iter().find(|b| *b == 0 || *b > band_count) {
            return Err(ExportError::expression(
                &self.source,
                format!("band b{band} does not exist (raster has {band_count} bands)"),
            ));
        }
        Ok(())
    }

    /// Evaluates every sub-expression elementwise over the bound bands.
    pub fn evaluate(&self, bands: &HashMap<usize, BandArray>) -> Result<Vec<BandArray>> {
        let (rows, cols) = match bands.values().next() {
            Some(first) => first.shape(),
            None => {
                return Err(ExportError::expression(
                    &self.source,
                    "expression does not reference any band",
                ))
            }
        };
        if bands.values().any(|b| b.shape() != (rows, cols)) {
            return Err(ExportError::expression(&self.source, "bands differ in shape"));
        }

        let len = rows * cols;
        self.outputs
            .iter()
            .map(|output| {
                eval_node(&output.root, bands, len)
                    .map(|values| BandArray::new(rows, cols, values))
                    .map_err(|message| ExportError::expression(&output.source, message))
            })
            .collect()
    }
}

/// Post-processes evaluated bands: single precision, NaN to 0, infinities to
/// the largest finite value, and the nodata sentinel in the first band where
/// alpha is zero or the result overflowed.
pub fn sanitize(results: &mut [BandArray], alpha: Option<&BandArray>) {
    for band in results.iter_mut() {
        for v in band.values.iter_mut() {
            *v = nan_to_num(*v as f32) as f64;
        }
    }

    let Some(first) = results.first_mut() else {
        return;
    };
    if let Some(alpha) = alpha {
        for (v, a) in first.values.iter_mut().zip(&alpha.values) {
            if *a == 0.0 {
                *v = NODATA_SENTINEL;
            }
        }
    }
    for v in first.values.iter_mut() {
        if *v > OVERFLOW_LIMIT || *v < -OVERFLOW_LIMIT {
            *v = NODATA_SENTINEL;
        }
    }
}

fn nan_to_num(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else if v == f32::INFINITY {
        f32::MAX
    } else if v == f32::NEG_INFINITY {
        f32::MIN
    } else {
        v
    }
}

fn truth(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_node(
    node: &Node,
    bands: &HashMap<usize, BandArray>,
    len: usize,
) -> std::result::Result<Vec<f64>, String> {
    match node {
        Node::Number(n) => Ok(vec![*n; len]),
        Node::Band(b) => bands
            .get(b)
            .map(|band| band.values.clone())
            .ok_or_else(|| format!("band b{b} was not read")),
        Node::Unary { op, operand } => {
            let mut values = eval_node(operand, bands, len)?;
            for v in values.iter_mut() {
                *v = match op {
                    UnaryOp::Neg => -*v,
                    UnaryOp::Not => flag(!truth(*v)),
                };
            }
            Ok(values)
        }
        Node::Binary { op, lhs, rhs } => {
            let mut values = eval_node(lhs, bands, len)?;
            let rhs = eval_node(rhs, bands, len)?;
            for (a, b) in values.iter_mut().zip(rhs) {
                *a = match op {
                    BinaryOp::Add => *a + b,
                    BinaryOp::Sub => *a - b,
                    BinaryOp::Mul => *a * b,
                    BinaryOp::Div => *a / b,
                    BinaryOp::Rem => *a % b,
                    BinaryOp::Pow => a.powf(b),
                    BinaryOp::Lt => flag(*a < b),
                    BinaryOp::Le => flag(*a <= b),
                    BinaryOp::Gt => flag(*a > b),
                    BinaryOp::Ge => flag(*a >= b),
                    BinaryOp::Eq => flag(*a == b),
                    BinaryOp::Ne => flag(*a != b),
                    BinaryOp::And => flag(truth(*a) && truth(b)),
                    BinaryOp::Or => flag(truth(*a) || truth(b)),
                };
            }
            Ok(values)
        }
        Node::Call { func, args } => {
            let mut evaluated = args
                .iter()
                .map(|arg| eval_node(arg, bands, len))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            match func {
                Function::Arctan2 => {
                    let x = evaluated.pop().unwrap_or_default();
                    let mut y = evaluated.pop().unwrap_or_default();
                    for (y, x) in y.iter_mut().zip(x) {
                        *y = y.atan2(x);
                    }
                    Ok(y)
                }
                Function::Where => {
                    let otherwise = evaluated.pop().unwrap_or_default();
                    let then = evaluated.pop().unwrap_or_default();
                    let mut cond = evaluated.pop().unwrap_or_default();
                    for ((c, t), o) in cond.iter_mut().zip(then).zip(otherwise) {
                        *c = if truth(*c) { t } else { o };
                    }
                    Ok(cond)
                }
                unary => {
                    let mut values = evaluated.pop().unwrap_or_default();
                    for v in values.iter_mut() {
                        *v = unary.apply_unary(*v);
                    }
                    Ok(values)
                }
            }
        }
    }
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                segments.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Band(usize),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Amp,
    Pipe,
    Tilde,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{text}'"))?;
            tokens.push(Token::Number(value));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(classify_word(word)?);
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::StarStar, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('&', _) => (Token::Amp, 1),
            ('|', _) => (Token::Pipe, 1),
            ('~', _) => (Token::Tilde, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => return Err(format!("unexpected character '{c}'")),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn classify_word(word: String) -> std::result::Result<Token, String> {
    if let Some(digits) = word.strip_prefix('b') {
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if digits.len() > 2 {
                return Err(format!("band reference '{word}' out of range"));
            }
            let band = digits
                .parse::<usize>()
                .map_err(|_| format!("invalid band reference '{word}'"))?;
            return Ok(Token::Band(band));
        }
    }
    Ok(Token::Ident(word))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

type ParseResult = std::result::Result<Node, String>;

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> ParseResult {
        let node = self.comparison()?;
        match self.peek() {
            None => Ok(node),
            Some(token) => Err(format!("unexpected {token:?}")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        Node::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn comparison(&mut self) -> ParseResult {
        let lhs = self.or()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.or()?;
        Ok(Self::binary(op, lhs, rhs))
    }

    fn or(&mut self) -> ParseResult {
        let mut node = self.and()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.and()?;
            node = Self::binary(BinaryOp::Or, node, rhs);
        }
        Ok(node)
    }

    fn and(&mut self) -> ParseResult {
        let mut node = self.additive()?;
        while self.eat(&Token::Amp) {
            let rhs = self.additive()?;
            node = Self::binary(BinaryOp::And, node, rhs);
        }
        Ok(node)
    }

    fn additive(&mut self) -> ParseResult {
        let mut node = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            node = Self::binary(op, node, rhs);
        }
    }

    fn multiplicative(&mut self) -> ParseResult {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            node = Self::binary(op, node, rhs);
        }
    }

    fn unary(&mut self) -> ParseResult {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Tilde) => Some(UnaryOp::Not),
            Some(Token::Plus) => None,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(match op {
            Some(op) => Node::Unary {
                op,
                operand: Box::new(operand),
            },
            None => operand,
        })
    }

    // `**` binds tighter than a unary minus on its left and is right-associative.
    fn power(&mut self) -> ParseResult {
        let base = self.atom()?;
        if self.eat(&Token::StarStar) {
            let exponent = self.unary()?;
            return Ok(Self::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> ParseResult {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::Band(b)) => Ok(Node::Band(b)),
            Some(Token::LParen) => {
                let node = self.comparison()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing closing parenthesis".to_string());
                }
                Ok(node)
            }
            Some(Token::Ident(name)) => self.call(&name),
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn call(&mut self, name: &str) -> ParseResult {
        let func = Function::from_name(name).ok_or_else(|| format!("unknown name '{name}'"))?;
        if !self.eat(&Token::LParen) {
            return Err(format!("function '{name}' must be called with arguments"));
        }

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.comparison()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                return Err(format!("expected ',' or ')' in call to '{name}'"));
            }
        }

        if args.len() != func.arity() {
            return Err(format!(
                "'{}' takes {} argument(s), got {}",
                name,
                func.arity(),
                args.len()
            ));
        }
        Ok(Node::Call { func, args })
    }
}
