//! Recursive-descent formula evaluator.
//!
//! Grammar:
//!
//! ```text
//! expression -> term   (('+' | '-') term)*
//! term       -> power  (('*' | '/') power)*
//! power      -> unary  ('^' unary)?
//! unary      -> '-' unary | factor
//! factor     -> number | '(' expression ')' | identifier tail
//! tail       -> '(' arglist ')'            function call
//!             | '[' time_ref ']'           time-indexed variable
//!             | (nothing)                  bare variable
//! time_ref   -> 't' (('+' | '-') integer)?
//! ```
//!
//! Built-in functions: `MIN(a,b)`, `MAX(a,b)`, `ABS(x)` and
//! `IF(cond,a,b)` where any non-zero condition selects `a`. Unknown
//! function names are offered to an optional custom-function callback.
//!
//! Variables resolve through an ordered provider chain; the first provider
//! whose `has_value` returns true supplies the value. A time-indexed
//! variable `X[t+k]` resolves `X` under a derived context whose
//! `time_index` is shifted by `k`. Identifiers may carry a provider prefix
//! (`driver:OPEX`, `tax:FLAT_RATE`) which is passed to the chain verbatim.
//!
//! All arithmetic is IEEE-754 `f64`. Division by zero is a domain error,
//! never a silent infinity.

use crate::error::FinModelError;
use crate::providers::ValueProvider;
use crate::types::ValuationContext;
use crate::FinModelResult;

/// Callback consulted for function names the evaluator does not know.
/// Returning `None` means the name is unhandled and evaluation fails.
pub type CustomFunctions<'a> = dyn Fn(&str, &[f64]) -> Option<FinModelResult<f64>> + 'a;

/// A variable reference found in a formula.
///
/// `time_offset` is `None` for a bare identifier, `Some(k)` for `X[t+k]`
/// (so `X[t]` carries `Some(0)`, which callers treat like a bare
/// reference).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaDependency {
    pub code: String,
    pub time_offset: Option<i32>,
}

impl FormulaDependency {
    /// Whether this reference crosses a period boundary.
    /// Intra-period dependency edges must exclude these.
    pub fn is_time_shifted(&self) -> bool {
        matches!(self.time_offset, Some(k) if k != 0)
    }
}

/// Formula parser and evaluator.
///
/// Stateless between calls; each `evaluate` runs a fresh parse over the
/// formula text.
#[derive(Debug, Default)]
pub struct FormulaEvaluator;

impl FormulaEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a formula against the provider chain.
    pub fn evaluate(
        &self,
        formula: &str,
        providers: &[&dyn ValueProvider],
        ctx: &ValuationContext,
    ) -> FinModelResult<f64> {
        self.evaluate_with(formula, providers, ctx, None)
    }

    /// Evaluate with an optional custom-function callback for names the
    /// evaluator does not recognise (e.g. tax-strategy dispatchers).
    pub fn evaluate_with(
        &self,
        formula: &str,
        providers: &[&dyn ValueProvider],
        ctx: &ValuationContext,
        custom_functions: Option<&CustomFunctions<'_>>,
    ) -> FinModelResult<f64> {
        let mut parser = Parser {
            src: formula.as_bytes(),
            pos: 0,
            providers,
            ctx,
            custom_functions,
        };
        let value = parser.parse_expression()?;
        parser.skip_whitespace();
        if parser.pos < parser.src.len() {
            return Err(parser.error(format!(
                "unexpected character '{}'",
                parser.src[parser.pos] as char
            )));
        }
        Ok(value)
    }

    /// Extract the distinct variable references used by a formula.
    ///
    /// Function heads are not variables and are excluded; every identifier
    /// in argument position or standing alone is included, paired with its
    /// time offset when one is written. The result is a superset of the
    /// identifiers the evaluator will query at runtime.
    pub fn extract_dependencies(&self, formula: &str) -> FinModelResult<Vec<FormulaDependency>> {
        let mut scanner = Scanner {
            src: formula.as_bytes(),
            pos: 0,
        };
        let mut deps: Vec<FormulaDependency> = Vec::new();

        while let Some(token) = scanner.next_identifier()? {
            let dep = FormulaDependency {
                code: token.name,
                time_offset: token.time_offset,
            };
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        Ok(deps)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    providers: &'a [&'a dyn ValueProvider],
    ctx: &'a ValuationContext,
    custom_functions: Option<&'a CustomFunctions<'a>>,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> FinModelError {
        FinModelError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.src.get(self.pos).copied()
    }

    /// Peek without skipping whitespace first (for token-adjacency checks)
    fn peek_raw(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn consume(&mut self, expected: u8) -> FinModelResult<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected as char)))
        }
    }

    // expression -> term (('+' | '-') term)*
    fn parse_expression(&mut self) -> FinModelResult<f64> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    // term -> power (('*' | '/') power)*
    fn parse_term(&mut self) -> FinModelResult<f64> {
        let mut value = self.parse_power()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.parse_power()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let divisor_pos = self.pos;
                    let divisor = self.parse_power()?;
                    if divisor == 0.0 {
                        return Err(FinModelError::DivisionByZero {
                            context: format!("formula at position {divisor_pos}"),
                        });
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    // power -> unary ('^' unary)?
    fn parse_power(&mut self) -> FinModelResult<f64> {
        let base = self.parse_unary()?;
        if self.peek() == Some(b'^') {
            self.pos += 1;
            let exponent = self.parse_unary()?;
            Ok(base.powf(exponent))
        } else {
            Ok(base)
        }
    }

    // unary -> '-' unary | factor
    fn parse_unary(&mut self) -> FinModelResult<f64> {
        if self.peek() == Some(b'-') {
            self.pos += 1;
            Ok(-self.parse_unary()?)
        } else {
            self.parse_factor()
        }
    }

    // factor -> number | '(' expression ')' | identifier tail
    fn parse_factor(&mut self) -> FinModelResult<f64> {
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == b'.' => self.read_number(),
            Some(b'(') => {
                self.pos += 1;
                let value = self.parse_expression()?;
                self.consume(b')')?;
                Ok(value)
            }
            Some(c) if is_ident_start(c) => {
                let name = self.read_identifier()?;
                match self.peek() {
                    Some(b'(') => self.parse_function_call(&name),
                    Some(b'[') => {
                        let offset = self.parse_time_reference()?;
                        self.resolve_variable(&name, offset)
                    }
                    _ => self.resolve_variable(&name, 0),
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{}'", c as char))),
            None => Err(self.error("unexpected end of formula")),
        }
    }

    // tail -> '(' arglist ')'
    fn parse_function_call(&mut self, name: &str) -> FinModelResult<f64> {
        self.consume(b'(')?;
        let mut args = Vec::new();
        if self.peek() != Some(b')') {
            loop {
                args.push(self.parse_expression()?);
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    Some(b')') => break,
                    _ => return Err(self.error("expected ',' or ')' in argument list")),
                }
            }
        }
        self.consume(b')')?;
        self.apply_function(name, &args)
    }

    fn apply_function(&mut self, name: &str, args: &[f64]) -> FinModelResult<f64> {
        let arity = |expected: usize| -> FinModelResult<()> {
            if args.len() != expected {
                Err(FinModelError::ArityMismatch {
                    function: name.to_string(),
                    expected,
                    actual: args.len(),
                })
            } else {
                Ok(())
            }
        };

        match name {
            "MIN" => {
                arity(2)?;
                Ok(args[0].min(args[1]))
            }
            "MAX" => {
                arity(2)?;
                Ok(args[0].max(args[1]))
            }
            "ABS" => {
                arity(1)?;
                Ok(args[0].abs())
            }
            "IF" => {
                arity(3)?;
                Ok(if args[0] != 0.0 { args[1] } else { args[2] })
            }
            _ => {
                if let Some(custom) = self.custom_functions {
                    if let Some(result) = custom(name, args) {
                        return result;
                    }
                }
                Err(FinModelError::CustomFunctionNotHandled {
                    name: name.to_string(),
                })
            }
        }
    }

    // time_ref -> 't' (('+' | '-') integer)?
    fn parse_time_reference(&mut self) -> FinModelResult<i32> {
        self.consume(b'[')?;
        if self.peek() != Some(b't') {
            return Err(self.error("expected 't' in time reference"));
        }
        self.pos += 1;

        let offset = match self.peek() {
            Some(sign @ (b'+' | b'-')) => {
                self.pos += 1;
                let magnitude = self.read_integer()?;
                if sign == b'-' {
                    -magnitude
                } else {
                    magnitude
                }
            }
            _ => 0,
        };

        self.consume(b']')?;
        Ok(offset)
    }

    fn resolve_variable(&mut self, code: &str, offset: i32) -> FinModelResult<f64> {
        let shifted;
        let ctx: &ValuationContext = if offset == 0 {
            self.ctx
        } else {
            shifted = self.ctx.with_time_offset(self.ctx.time_index + offset);
            &shifted
        };

        for provider in self.providers {
            if provider.has_value(code) {
                return provider.get_value(code, ctx);
            }
        }
        Err(FinModelError::UnresolvedIdentifier {
            code: code.to_string(),
        })
    }

    fn read_identifier(&mut self) -> FinModelResult<String> {
        let start = self.pos;
        while self.pos < self.src.len() && is_ident_char(self.src[self.pos]) {
            self.pos += 1;
        }
        // Provider-scoped prefix: `driver:OPEX`, `tax:FLAT_RATE`
        if self.peek_raw() == Some(b':')
            && self.src.get(self.pos + 1).copied().is_some_and(is_ident_start)
        {
            self.pos += 1;
            while self.pos < self.src.len() && is_ident_char(self.src[self.pos]) {
                self.pos += 1;
            }
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    fn read_integer(&mut self) -> FinModelResult<i32> {
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected integer"));
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("invalid integer"))
    }

    fn read_number(&mut self) -> FinModelResult<f64> {
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek_raw() == Some(b'.') {
            self.pos += 1;
            while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if text == "." {
            return Err(self.error("invalid number '.'"));
        }
        text.parse()
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

// ---------------------------------------------------------------------------
// Dependency scanner
// ---------------------------------------------------------------------------

struct ScannedIdentifier {
    name: String,
    time_offset: Option<i32>,
}

/// Token-level walk over the same lexical structure as the parser, keeping
/// only identifiers used as variables (skipping function heads).
struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn next_identifier(&mut self) -> FinModelResult<Option<ScannedIdentifier>> {
        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            if is_ident_start(c) {
                let name = self.read_identifier();
                self.skip_whitespace();
                match self.src.get(self.pos) {
                    Some(b'(') => {
                        // Function head, not a variable; arguments are
                        // scanned on subsequent iterations.
                        self.pos += 1;
                        continue;
                    }
                    Some(b'[') => {
                        let offset = self.read_time_reference()?;
                        return Ok(Some(ScannedIdentifier {
                            name,
                            time_offset: Some(offset),
                        }));
                    }
                    _ => {
                        return Ok(Some(ScannedIdentifier {
                            name,
                            time_offset: None,
                        }))
                    }
                }
            } else if c.is_ascii_digit() || c == b'.' {
                self.read_number();
            } else {
                self.pos += 1;
            }
        }
        Ok(None)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.src.len() && is_ident_char(self.src[self.pos]) {
            self.pos += 1;
        }
        if self.src.get(self.pos) == Some(&b':')
            && self.src.get(self.pos + 1).copied().is_some_and(is_ident_start)
        {
            self.pos += 1;
            while self.pos < self.src.len() && is_ident_char(self.src[self.pos]) {
                self.pos += 1;
            }
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn read_number(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.src.get(self.pos) == Some(&b'.') {
            self.pos += 1;
            while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
    }

    fn read_time_reference(&mut self) -> FinModelResult<i32> {
        // At '['
        self.pos += 1;
        self.skip_whitespace();
        if self.src.get(self.pos) != Some(&b't') {
            return Err(FinModelError::Parse {
                position: self.pos,
                message: "expected 't' in time reference".into(),
            });
        }
        self.pos += 1;
        self.skip_whitespace();

        let offset = match self.src.get(self.pos) {
            Some(&sign @ (b'+' | b'-')) => {
                self.pos += 1;
                self.skip_whitespace();
                let start = self.pos;
                while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
                let magnitude: i32 = std::str::from_utf8(&self.src[start..self.pos])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(FinModelError::Parse {
                        position: start,
                        message: "expected integer offset in time reference".into(),
                    })?;
                if sign == b'-' {
                    -magnitude
                } else {
                    magnitude
                }
            }
            _ => 0,
        };

        self.skip_whitespace();
        if self.src.get(self.pos) != Some(&b']') {
            return Err(FinModelError::Parse {
                position: self.pos,
                message: "expected ']' in time reference".into(),
            });
        }
        self.pos += 1;
        Ok(offset)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
