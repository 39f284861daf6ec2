//! Template Renderer - encoded body + scope to text
//!
//! Bodies are base64 text using a small action language between configurable
//! delimiters (default `[[` `]]`), so `{{ }}` in generated YAML passes through
//! untouched. Rendering is pure: the same body and scope give the same bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_LEFT_DELIM: &str = "[[";
pub const DEFAULT_RIGHT_DELIM: &str = "]]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Delimiters {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Result<Self, String> {
        let delimiters = Self {
            left: left.into(),
            right: right.into(),
        };
        delimiters.check()?;
        Ok(delimiters)
    }

    pub fn check(&self) -> Result<(), String> {
        if self.left.is_empty() || self.right.is_empty() {
            return Err("delimiters must not be empty".to_string());
        }
        if self.left == self.right {
            return Err(format!("left and right delimiters are both {:?}", self.left));
        }
        Ok(())
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            left: DEFAULT_LEFT_DELIM.to_string(),
            right: DEFAULT_RIGHT_DELIM.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Stored body is not valid base64 / UTF-8.
    #[error("cannot decode body: {0}")]
    Decode(String),

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// Evaluation failed: unresolved reference or type mismatch.
    #[error("{0}")]
    Execution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Not,
    Eq,
    Ne,
    And,
    Or,
    Exists,
    Default,
    Upper,
    Lower,
    Quote,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "not" => Func::Not,
            "eq" => Func::Eq,
            "ne" => Func::Ne,
            "and" => Func::And,
            "or" => Func::Or,
            "exists" => Func::Exists,
            "default" => Func::Default,
            "upper" => Func::Upper,
            "lower" => Func::Lower,
            "quote" => Func::Quote,
            _ => return None,
        })
    }

    fn check_arity(self, name: &str, argc: usize) -> Result<(), String> {
        let ok = match self {
            Func::Not | Func::Exists | Func::Upper | Func::Lower | Func::Quote => argc == 1,
            Func::Eq | Func::Ne | Func::Default => argc == 2,
            Func::And | Func::Or => argc >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("wrong number of arguments for {}: {}", name, argc))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(Vec<String>),
    Literal(Value),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

/// A parsed body, ready to render against any scope.
#[derive(Debug, Clone)]
pub struct CompiledBody {
    nodes: Vec<Node>,
}

impl CompiledBody {
    pub fn render(&self, scope: &Value) -> Result<String, RenderError> {
        let mut out = String::new();
        exec(&self.nodes, scope, &mut out).map_err(RenderError::Execution)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Renderer {
    delimiters: Delimiters,
}

impl Renderer {
    pub fn new(delimiters: Delimiters) -> Self {
        Self { delimiters }
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    /// Decode a base64 body and render it.
    pub fn render_encoded(&self, encoded: &str, scope: &Value) -> Result<String, RenderError> {
        let body = decode_body(encoded)?;
        self.render(&body, scope)
    }

    pub fn render(&self, body: &str, scope: &Value) -> Result<String, RenderError> {
        self.compile(body)?.render(scope)
    }

    pub fn compile(&self, body: &str) -> Result<CompiledBody, RenderError> {
        let pieces = lex(body, &self.delimiters)?;
        let mut pieces = pieces.into_iter();
        let (nodes, end) = parse_nodes(&mut pieces)?;
        match end {
            Terminator::Eof => Ok(CompiledBody { nodes }),
            Terminator::Else(offset, _) => Err(syntax(offset, "unexpected else")),
            Terminator::End(offset) => Err(syntax(offset, "unexpected end")),
        }
    }
}

pub fn decode_body(encoded: &str) -> Result<String, RenderError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| RenderError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RenderError::Decode(e.to_string()))
}

fn syntax(offset: usize, message: impl Into<String>) -> RenderError {
    RenderError::Syntax {
        offset,
        message: message.into(),
    }
}

// --- Lexing ---

#[derive(Debug)]
enum Piece {
    Text(String),
    Action { source: String, offset: usize },
}

fn lex(body: &str, delimiters: &Delimiters) -> Result<Vec<Piece>, RenderError> {
    let left = delimiters.left.as_str();
    let right = delimiters.right.as_str();
    let mut pieces = Vec::new();
    let mut cursor = 0;
    let mut trim_next = false;

    while let Some(found) = body[cursor..].find(left) {
        let open = cursor + found;
        let mut text = &body[cursor..open];
        if trim_next {
            text = text.trim_start();
        }
        let mut inner_start = open + left.len();
        if starts_with_trim_marker(&body[inner_start..]) {
            text = text.trim_end();
            inner_start += 1;
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text.to_string()));
        }

        let close = find_close(body, inner_start, right).ok_or_else(|| {
            syntax(open, format!("unclosed action, expected {:?}", right))
        })?;
        let mut inner = &body[inner_start..close];
        trim_next = ends_with_trim_marker(inner);
        if trim_next {
            inner = &inner[..inner.len() - 1];
        }
        pieces.push(Piece::Action {
            source: inner.trim().to_string(),
            offset: open,
        });
        cursor = close + right.len();
    }

    let mut text = &body[cursor..];
    if trim_next {
        text = text.trim_start();
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text.to_string()));
    }
    Ok(pieces)
}

fn starts_with_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().map_or(false, |c| c.is_whitespace())
}

fn ends_with_trim_marker(s: &str) -> bool {
    s.ends_with('-') && s[..s.len() - 1].ends_with(|c: char| c.is_whitespace())
}

/// Position of the closing delimiter, skipping quoted strings.
fn find_close(body: &str, from: usize, right: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body[from..].char_indices() {
        let at = from + i;
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if c == '"' {
            in_string = true;
        } else if body[at..].starts_with(right) {
            return Some(at);
        }
    }
    None
}

// --- Parsing ---

enum Terminator {
    Eof,
    Else(usize, Option<Expr>),
    End(usize),
}

fn parse_nodes(pieces: &mut impl Iterator<Item = Piece>) -> Result<(Vec<Node>, Terminator), RenderError> {
    let mut nodes = Vec::new();
    while let Some(piece) = pieces.next() {
        let (source, offset) = match piece {
            Piece::Text(text) => {
                nodes.push(Node::Text(text));
                continue;
            }
            Piece::Action { source, offset } => (source, offset),
        };
        if source.starts_with("/*") && source.ends_with("*/") && source.len() >= 4 {
            continue;
        }

        let tokens = tokenize(&source).map_err(|m| syntax(offset, m))?;
        match tokens.first() {
            None => return Err(syntax(offset, "empty action")),
            Some(Token::Ident(word)) if word == "end" => {
                if tokens.len() > 1 {
                    return Err(syntax(offset, "unexpected tokens after end"));
                }
                return Ok((nodes, Terminator::End(offset)));
            }
            Some(Token::Ident(word)) if word == "else" => {
                let condition = match tokens.get(1) {
                    None => None,
                    Some(Token::Ident(kw)) if kw == "if" => Some(parse_expr(&tokens[2..], offset)?),
                    Some(_) => return Err(syntax(offset, "expected if after else")),
                };
                return Ok((nodes, Terminator::Else(offset, condition)));
            }
            Some(Token::Ident(word)) if word == "if" => {
                let condition = parse_expr(&tokens[1..], offset)?;
                nodes.push(parse_if(condition, offset, pieces)?);
            }
            Some(_) => nodes.push(Node::Output(parse_expr(&tokens, offset)?)),
        }
    }
    Ok((nodes, Terminator::Eof))
}

fn parse_if(
    condition: Expr,
    offset: usize,
    pieces: &mut impl Iterator<Item = Piece>,
) -> Result<Node, RenderError> {
    let mut branches = Vec::new();
    let mut condition = condition;
    loop {
        let (body, end) = parse_nodes(pieces)?;
        branches.push((condition, body));
        match end {
            Terminator::End(_) => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                })
            }
            Terminator::Else(_, Some(next)) => condition = next,
            Terminator::Else(else_offset, None) => {
                let (otherwise, end) = parse_nodes(pieces)?;
                return match end {
                    Terminator::End(_) => Ok(Node::If { branches, otherwise }),
                    Terminator::Else(o, _) => Err(syntax(o, "else after final else")),
                    Terminator::Eof => Err(syntax(else_offset, "missing end for if")),
                };
            }
            Terminator::Eof => return Err(syntax(offset, "missing end for if")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '.' {
            let mut path: Vec<String> = Vec::new();
            while i < chars.len() && chars[i] == '.' {
                i += 1;
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                if start == i {
                    if !path.is_empty() || (i < chars.len() && chars[i] == '.') {
                        return Err("empty field name".to_string());
                    }
                    break;
                }
                path.push(chars[start..i].iter().collect());
            }
            tokens.push(Token::Field(path));
        } else if c == '"' {
            i += 1;
            let mut s = String::new();
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string".to_string()),
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match chars.get(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('"') => '"',
                            Some('\\') => '\\',
                            other => return Err(format!("invalid escape {:?}", other)),
                        };
                        s.push(escaped);
                        i += 2;
                    }
                    Some(&other) => {
                        s.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse().map_err(|_| format!("invalid number {}", text))?;
            tokens.push(Token::Int(n));
        } else if c.is_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(format!("unexpected character {:?}", c));
        }
    }
    Ok(tokens)
}

fn parse_expr(tokens: &[Token], offset: usize) -> Result<Expr, RenderError> {
    if tokens.is_empty() {
        return Err(syntax(offset, "missing expression"));
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.command().map_err(|m| syntax(offset, m))?;
    if parser.pos != tokens.len() {
        return Err(syntax(offset, format!("unexpected {:?}", tokens[parser.pos])));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn command(&mut self) -> Result<Expr, String> {
        let tokens = self.tokens;
        if let Some(Token::Ident(name)) = tokens.get(self.pos) {
            if name != "true" && name != "false" {
                let func = Func::from_name(name).ok_or_else(|| format!("function {:?} not defined", name))?;
                self.pos += 1;
                let mut args = Vec::new();
                while !matches!(tokens.get(self.pos), None | Some(Token::RParen)) {
                    args.push(self.term()?);
                }
                func.check_arity(name, args.len())?;
                if func == Func::Exists && !matches!(args[0], Expr::Field(_)) {
                    return Err("exists expects a field".to_string());
                }
                return Ok(Expr::Call(func, args));
            }
        }
        self.term()
    }

    fn term(&mut self) -> Result<Expr, String> {
        let tokens = self.tokens;
        let token = tokens.get(self.pos).ok_or("missing operand")?;
        self.pos += 1;
        match token {
            Token::Field(path) => Ok(Expr::Field(path.clone())),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
            Token::Int(n) => Ok(Expr::Literal(Value::from(*n))),
            Token::Ident(word) if word == "true" => Ok(Expr::Literal(Value::Bool(true))),
            Token::Ident(word) if word == "false" => Ok(Expr::Literal(Value::Bool(false))),
            Token::Ident(word) => Err(format!("function {} used as an argument needs parentheses", word)),
            Token::LParen => {
                let inner = self.command()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err("unclosed parenthesis".to_string()),
                }
            }
            Token::RParen => Err("unexpected )".to_string()),
        }
    }
}

// --- Evaluation ---

fn exec(nodes: &[Node], scope: &Value, out: &mut String) -> Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => out.push_str(&display(&eval(expr, scope)?)),
            Node::If { branches, otherwise } => {
                let mut taken = None;
                for (condition, body) in branches {
                    if truthy(&eval(condition, scope)?) {
                        taken = Some(body);
                        break;
                    }
                }
                exec(taken.unwrap_or(otherwise), scope, out)?;
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &Value) -> Result<Value, String> {
    match expr {
        Expr::Field(path) => resolve(scope, path).cloned(),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Call(func, args) => call(*func, args, scope),
    }
}

fn call(func: Func, args: &[Expr], scope: &Value) -> Result<Value, String> {
    match func {
        Func::Not => Ok(Value::Bool(!truthy(&eval(&args[0], scope)?))),
        Func::Eq | Func::Ne => {
            let a = eval(&args[0], scope)?;
            let b = eval(&args[1], scope)?;
            if type_name(&a) != type_name(&b) {
                return Err(format!(
                    "incompatible types for comparison: {} and {}",
                    type_name(&a),
                    type_name(&b)
                ));
            }
            Ok(Value::Bool((a == b) == (func == Func::Eq)))
        }
        Func::And | Func::Or => {
            let mut last = Value::Null;
            for arg in args {
                last = eval(arg, scope)?;
                if truthy(&last) != (func == Func::And) {
                    break;
                }
            }
            Ok(last)
        }
        Func::Exists => match &args[0] {
            Expr::Field(path) => Ok(Value::Bool(resolve(scope, path).is_ok())),
            _ => Err("exists expects a field".to_string()),
        },
        Func::Default => match &args[1] {
            Expr::Field(path) => match resolve(scope, path) {
                Ok(v) => Ok(v.clone()),
                Err(_) => eval(&args[0], scope),
            },
            other => match eval(other, scope)? {
                Value::Null => eval(&args[0], scope),
                v => Ok(v),
            },
        },
        Func::Upper | Func::Lower => match eval(&args[0], scope)? {
            Value::String(s) if func == Func::Upper => Ok(Value::String(s.to_uppercase())),
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(format!("expected string, got {}", type_name(&other))),
        },
        Func::Quote => {
            let text = display(&eval(&args[0], scope)?);
            Ok(Value::String(Value::String(text).to_string()))
        }
    }
}

fn resolve<'v>(scope: &'v Value, path: &[String]) -> Result<&'v Value, String> {
    let mut current = scope;
    for (depth, key) in path.iter().enumerate() {
        current = match current {
            Value::Object(map) => map
                .get(key)
                .ok_or_else(|| format!("unresolved reference .{}", path[..=depth].join(".")))?,
            other => {
                return Err(format!(
                    "cannot read field {} of {} at .{}",
                    key,
                    type_name(other),
                    path[..depth].join(".")
                ))
            }
        };
    }
    Ok(current)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
