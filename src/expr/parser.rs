//! Expression parser.
//!
//! Pratt-style recursive descent over the token stream. Precedence, binding
//! tightest first: unary `!`/`-`, `^`, `* / %`, `+ -`, `< <= > >=`,
//! `== !=`, `&&`, `||`. `^` is right-associative.
//!
//! The walker is depth-bounded: programs whose AST nesting exceeds the
//! configured limit are rejected with a syntax error rather than risking
//! the evaluator's stack.

use super::functions;
use super::lexer::{tokenize, SpannedTok, Tok};
use super::{ArithOp, Condition, Expr};
use crate::error::{QueryError, QueryResult};
use crate::value::Value;

/// Default nesting bound; see `PipelineConfig::max_expr_depth`.
pub const DEFAULT_MAX_DEPTH: usize = 32;

struct Parser {
    toks: Vec<SpannedTok>,
    pos: usize,
    max_depth: usize,
    input_len: usize,
}

/// Parse with the default depth bound.
pub fn parse(input: &str) -> QueryResult<Expr> {
    parse_with_depth(input, DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit nesting bound.
pub fn parse_with_depth(input: &str, max_depth: usize) -> QueryResult<Expr> {
    functions::ensure_builtins();
    let toks = tokenize(input)?;
    if toks.is_empty() {
        return Err(QueryError::syntax(0, "empty expression"));
    }
    let mut p = Parser {
        toks,
        pos: 0,
        max_depth,
        input_len: input.len(),
    };
    let expr = p.parse_expr(0, 0)?;
    if let Some(extra) = p.peek() {
        return Err(QueryError::syntax(extra.offset, "trailing tokens"));
    }
    Ok(expr)
}

/// Left/right binding powers per infix operator.
fn infix_power(tok: &Tok) -> Option<(u8, u8)> {
    Some(match tok {
        Tok::OrOr => (1, 2),
        Tok::AndAnd => (3, 4),
        Tok::EqEq | Tok::Ne => (5, 6),
        Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge => (7, 8),
        Tok::Plus | Tok::Minus => (9, 10),
        Tok::Star | Tok::Slash | Tok::Percent => (11, 12),
        // right-associative
        Tok::Caret => (14, 13),
        _ => return None,
    })
}

const UNARY_POWER: u8 = 15;

impl Parser {
    fn peek(&self) -> Option<&SpannedTok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<SpannedTok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.input_len, |t| t.offset)
    }

    fn expect(&mut self, want: &Tok, what: &str) -> QueryResult<()> {
        match self.bump() {
            Some(t) if t.tok == *want => Ok(()),
            Some(t) => Err(QueryError::syntax(t.offset, format!("expected {what}"))),
            None => Err(QueryError::syntax(self.input_len, format!("expected {what}"))),
        }
    }

    fn check_depth(&self, depth: usize, offset: usize) -> QueryResult<()> {
        if depth > self.max_depth {
            return Err(QueryError::syntax(
                offset,
                format!("expression nests deeper than {} levels", self.max_depth),
            ));
        }
        Ok(())
    }

    fn parse_expr(&mut self, min_power: u8, depth: usize) -> QueryResult<Expr> {
        self.check_depth(depth, self.offset())?;
        let mut lhs = self.parse_prefix(depth)?;

        while let Some(t) = self.peek() {
            let Some((left_power, right_power)) = infix_power(&t.tok) else {
                break;
            };
            if left_power < min_power {
                break;
            }
            let op_tok = self.bump().expect("peeked token");
            let rhs = self.parse_expr(right_power, depth + 1)?;
            lhs = combine(op_tok.tok, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self, depth: usize) -> QueryResult<Expr> {
        let Some(t) = self.bump() else {
            return Err(QueryError::syntax(self.input_len, "unexpected end of expression"));
        };
        match t.tok {
            Tok::Number(n) => Ok(Expr::Literal(Value::number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::string(s))),
            Tok::Property(name) => Ok(Expr::Property { name, slot: None }),
            Tok::Bang => {
                let inner = self.parse_expr(UNARY_POWER, depth + 1)?;
                Ok(Expr::Not(Box::new(inner)))
            }
            Tok::Minus => {
                let inner = self.parse_expr(UNARY_POWER, depth + 1)?;
                Ok(match inner {
                    Expr::Literal(Value::Number(n)) => Expr::Literal(Value::number(-n)),
                    other => Expr::Op {
                        op: ArithOp::Sub,
                        left: Box::new(Expr::Literal(Value::number(0.0))),
                        right: Box::new(other),
                    },
                })
            }
            Tok::LParen => {
                let inner = self.parse_expr(0, depth + 1)?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(inner)
            }
            Tok::Ident(name) => {
                if name.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if self.peek().map(|t| &t.tok) == Some(&Tok::LParen) {
                    self.bump();
                    let args = self.parse_args(depth + 1)?;
                    return self.make_call(&name, args, t.offset);
                }
                Err(QueryError::syntax(
                    t.offset,
                    format!("unexpected identifier `{name}`"),
                ))
            }
            other => Err(QueryError::syntax(
                t.offset,
                format!("unexpected token {other:?}"),
            )),
        }
    }

    fn parse_args(&mut self, depth: usize) -> QueryResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek().map(|t| &t.tok) == Some(&Tok::RParen) {
            self.bump();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0, depth)?);
            match self.bump() {
                Some(t) if t.tok == Tok::Comma => {}
                Some(t) if t.tok == Tok::RParen => break,
                Some(t) => return Err(QueryError::syntax(t.offset, "expected `,` or `)`")),
                None => return Err(QueryError::syntax(self.input_len, "unterminated argument list")),
            }
        }
        Ok(args)
    }

    /// Resolve a call: special forms first, then the function registry.
    fn make_call(&self, name: &str, mut args: Vec<Expr>, offset: usize) -> QueryResult<Expr> {
        if name.eq_ignore_ascii_case("case") {
            if args.len() != 3 {
                return Err(QueryError::parse_args("case needs three arguments"));
            }
            let otherwise = args.pop().expect("three args");
            let then = args.pop().expect("two args");
            let cond = args.pop().expect("one arg");
            return Ok(Expr::Case {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        if name.eq_ignore_ascii_case("exists") {
            match args.as_slice() {
                [Expr::Property { name, .. }] => {
                    return Ok(Expr::Exists {
                        name: name.clone(),
                        slot: None,
                    })
                }
                _ => return Err(QueryError::parse_args("exists needs one property argument")),
            }
        }
        if name.eq_ignore_ascii_case("hasfield") {
            return Ok(Expr::HasField {
                field: literal_string_arg(&args, "hasfield")?,
            });
        }
        if name.eq_ignore_ascii_case("hasprefix") {
            return Ok(Expr::HasPrefix {
                prefix: literal_string_arg(&args, "hasprefix")?,
            });
        }

        let Some(info) = functions::lookup(name) else {
            return Err(QueryError::NoFunction(name.to_string()));
        };
        if args.len() < info.min_args || args.len() > info.max_args {
            return Err(QueryError::syntax(
                offset,
                format!(
                    "function `{}` expects between {} and {} arguments, got {}",
                    info.name,
                    info.min_args,
                    info.max_args,
                    args.len()
                ),
            ));
        }
        Ok(Expr::Function {
            name: info.name.clone(),
            handler: info.handler,
            args,
        })
    }
}

fn literal_string_arg(args: &[Expr], fname: &str) -> QueryResult<String> {
    match args {
        [Expr::Literal(v)] if v.as_str().is_some() => {
            Ok(v.as_str().expect("checked string").to_string())
        }
        _ => Err(QueryError::parse_args(format!(
            "{fname} needs one string literal argument"
        ))),
    }
}

fn combine(tok: Tok, lhs: Expr, rhs: Expr) -> Expr {
    let (left, right) = (Box::new(lhs), Box::new(rhs));
    match tok {
        Tok::Plus => Expr::Op { op: ArithOp::Add, left, right },
        Tok::Minus => Expr::Op { op: ArithOp::Sub, left, right },
        Tok::Star => Expr::Op { op: ArithOp::Mul, left, right },
        Tok::Slash => Expr::Op { op: ArithOp::Div, left, right },
        Tok::Percent => Expr::Op { op: ArithOp::Mod, left, right },
        Tok::Caret => Expr::Op { op: ArithOp::Pow, left, right },
        Tok::EqEq => Expr::Predicate { cond: Condition::Eq, left, right },
        Tok::Ne => Expr::Predicate { cond: Condition::Ne, left, right },
        Tok::Lt => Expr::Predicate { cond: Condition::Lt, left, right },
        Tok::Le => Expr::Predicate { cond: Condition::Le, left, right },
        Tok::Gt => Expr::Predicate { cond: Condition::Gt, left, right },
        Tok::Ge => Expr::Predicate { cond: Condition::Ge, left, right },
        Tok::AndAnd => Expr::Predicate { cond: Condition::And, left, right },
        Tok::OrOr => Expr::Predicate { cond: Condition::Or, left, right },
        other => unreachable!("not an infix token: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_mul_over_add() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(e.dump(), "(1 + (2 * 3))");
    }

    #[test]
    fn caret_is_right_associative() {
        let e = parse("2 ^ 3 ^ 2").unwrap();
        assert_eq!(e.dump(), "(2 ^ (3 ^ 2))");
    }

    #[test]
    fn comparison_binds_looser_than_arithmetic() {
        let e = parse("@a + 1 < @b * 2 && @c == 3").unwrap();
        assert_eq!(e.dump(), "(((@a + 1) < (@b * 2)) && (@c == 3))");
    }

    #[test]
    fn unary_not_and_neg() {
        assert_eq!(parse("!@x").unwrap().dump(), "!(@x)");
        assert_eq!(parse("-5").unwrap().dump(), "-5");
        assert_eq!(parse("-@x").unwrap().dump(), "(0 - @x)");
    }

    #[test]
    fn case_is_a_special_form() {
        let e = parse("case(@cond, 1, 2)").unwrap();
        assert!(matches!(e, Expr::Case { .. }));
        assert!(parse("case(1, 2)").is_err());
    }

    #[test]
    fn unknown_function_is_rejected_at_parse() {
        assert_eq!(
            parse("frobnicate(1)").unwrap_err(),
            QueryError::NoFunction("frobnicate".to_string())
        );
    }

    #[test]
    fn depth_limit_enforced() {
        let deep = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        let err = parse_with_depth(&deep, 32).unwrap_err();
        assert!(matches!(err, QueryError::Syntax { .. }));
        assert!(parse_with_depth(&deep, 64).is_ok());
    }

    #[test]
    fn argc_bounds_checked_against_registry() {
        assert!(parse("floor(1, 2)").is_err());
        assert!(parse("floor(1)").is_ok());
    }

    #[test]
    fn hasfield_wants_a_literal() {
        assert!(parse("hasfield('title')").is_ok());
        assert!(parse("hasfield(@title)").is_err());
    }
}
