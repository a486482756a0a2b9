//! Lexer and recursive-descent parser for transform expressions.
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, comparisons, `+ -`,
//! `* / %`, unary `- !`, `^` (right associative), primary.

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Dot,
}

const OPERATORS: [&str; 16] = [
    "&&", "||", "<=", ">=", "==", "!=", "<", ">", "+", "-", "*", "/", "%", "^", "!", "=",
];

fn tokenize(src: &str) -> AppResult<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse()
                .map_err(|_| AppError::Transform(format!("invalid number '{text}'")))?;
            tokens.push(Token::Number(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '?' => tokens.push(Token::Question),
            ':' => tokens.push(Token::Colon),
            '.' => tokens.push(Token::Dot),
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| AppError::Transform(format!("unexpected character '{c}'")))?;
                if *op == "=" {
                    return Err(AppError::Transform("assignment is not supported".to_string()));
                }
                tokens.push(Token::Op(*op));
                i += op.len();
                continue;
            }
        }
        i += 1;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Ln,
    Log10,
    Exp,
    Pow,
    Clamp,
}

impl Func {
    fn lookup(name: &str) -> Option<(Self, usize)> {
        let found = match name {
            "abs" => (Self::Abs, 1),
            "min" => (Self::Min, 2),
            "max" => (Self::Max, 2),
            "round" => (Self::Round, 1),
            "floor" => (Self::Floor, 1),
            "ceil" => (Self::Ceil, 1),
            "sqrt" => (Self::Sqrt, 1),
            "ln" => (Self::Ln, 1),
            "log10" => (Self::Log10, 1),
            "exp" => (Self::Exp, 1),
            "pow" => (Self::Pow, 2),
            "clamp" => (Self::Clamp, 3),
            _ => return None,
        };
        Some(found)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Value,
    Timestamp,
    State,
    Attribute(String),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(&'static str, Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// Bound on nesting and operator chains; deeper trees are rejected at parse
/// time so that neither parsing nor evaluation can exhaust the stack.
const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn enter(&mut self) -> AppResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(AppError::Transform("expression nested too deeply".to_string()));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> AppResult<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(AppError::Transform(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek() {
            if let Some(found) = ops.iter().find(|o| *o == op).copied() {
                self.pos += 1;
                return Some(found);
            }
        }
        None
    }

    fn ternary(&mut self) -> AppResult<Node> {
        self.enter()?;
        let cond = self.or()?;
        let node = if self.peek() == Some(&Token::Question) {
            self.pos += 1;
            let then = self.ternary()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.ternary()?;
            Node::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(node)
    }

    fn binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> AppResult<Node>,
    ) -> AppResult<Node> {
        let mut lhs = next(self)?;
        let mut chained = 0;
        while let Some(op) = self.eat_op(ops) {
            // every link deepens the left-leaning tree
            self.enter()?;
            chained += 1;
            let rhs = next(self)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn or(&mut self) -> AppResult<Node> {
        self.binary_level(&["||"], Self::and)
    }

    fn and(&mut self) -> AppResult<Node> {
        self.binary_level(&["&&"], Self::comparison)
    }

    fn comparison(&mut self) -> AppResult<Node> {
        self.binary_level(&["<=", ">=", "==", "!=", "<", ">"], Self::additive)
    }

    fn additive(&mut self) -> AppResult<Node> {
        self.binary_level(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> AppResult<Node> {
        self.binary_level(&["*", "/", "%"], Self::unary)
    }

    fn unary(&mut self) -> AppResult<Node> {
        let Some(op) = self.eat_op(&["-", "+", "!"]) else {
            return self.power();
        };
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(match op {
            "-" => Node::Neg(Box::new(operand)),
            "!" => Node::Not(Box::new(operand)),
            _ => operand,
        })
    }

    fn power(&mut self) -> AppResult<Node> {
        let base = self.primary()?;
        if self.eat_op(&["^"]).is_some() {
            let exponent = self.unary()?;
            return Ok(Node::Binary("^", Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> AppResult<Node> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::LParen) => {
                let inner = self.ternary()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.identifier(&name),
            other => Err(AppError::Transform(format!("unexpected token {other:?}"))),
        }
    }

    fn identifier(&mut self, name: &str) -> AppResult<Node> {
        if self.peek() == Some(&Token::LParen) {
            let (func, arity) = Func::lookup(name)
                .ok_or_else(|| AppError::Transform(format!("unknown function '{name}'")))?;
            self.pos += 1;
            let mut args = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    args.push(self.ternary()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen)?;
            if args.len() != arity {
                return Err(AppError::Transform(format!(
                    "'{name}' takes {arity} argument(s), got {}",
                    args.len()
                )));
            }
            return Ok(Node::Call(func, args));
        }

        match name {
            "x" => Ok(Node::Value),
            "t" => Ok(Node::Timestamp),
            "state" => Ok(Node::State),
            "attr" => {
                self.expect(&Token::Dot)?;
                match self.next() {
                    Some(Token::Ident(attr)) => Ok(Node::Attribute(attr)),
                    other => Err(AppError::Transform(format!(
                        "expected attribute name, found {other:?}"
                    ))),
                }
            }
            "PI" => Ok(Node::Number(std::f64::consts::PI)),
            "E" => Ok(Node::Number(std::f64::consts::E)),
            _ => Err(AppError::Transform(format!("unknown identifier '{name}'"))),
        }
    }
}

/// Parse an expression. A leading `return` and trailing `;` are tolerated.
///
/// # Errors
///
/// Returns `AppError::Transform` describing the first syntax problem.
pub fn parse(src: &str) -> AppResult<Node> {
    let mut body = src.trim();
    if let Some(rest) = body.strip_prefix("return") {
        if rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
            body = rest.trim_start();
        }
    }
    let body = body.trim_end().trim_end_matches(';');
    if body.trim().is_empty() {
        return Err(AppError::Transform("empty expression".to_string()));
    }

    let mut parser = Parser {
        tokens: tokenize(body)?,
        pos: 0,
        depth: 0,
    };
    let node = parser.ternary()?;
    if let Some(extra) = parser.peek() {
        return Err(AppError::Transform(format!("unexpected trailing {extra:?}")));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_precedence() {
        let node = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            node,
            Node::Binary(
                "+",
                Box::new(Node::Number(1.0)),
                Box::new(Node::Binary(
                    "*",
                    Box::new(Node::Number(2.0)),
                    Box::new(Node::Number(3.0))
                ))
            )
        );
    }

    #[test]
    fn strips_return_and_semicolon() {
        assert_eq!(parse("return x / 10;").unwrap(), parse("x / 10").unwrap());
    }

    #[test]
    fn rejects_unknown_names_and_assignment() {
        assert!(parse("window.alert(1)").is_err());
        assert!(parse("x = 3").is_err());
        assert!(parse("foo(1)").is_err());
        assert!(parse("min(1)").is_err());
        assert!(parse("(1 + 2").is_err());
    }

    #[test]
    fn rejects_runaway_nesting() {
        let nested = format!("{}x{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = parse(&nested).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "{err}");

        let chain = format!("x{}", " + 1".repeat(100_000));
        assert!(parse(&chain).is_err());
        assert!(parse(&"-".repeat(100_000)).is_err());

        let shallow = format!("{}x{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse(&shallow).unwrap(), Node::Value);
    }
}
