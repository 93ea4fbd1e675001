//! Reader for the CPLEX LP text format.
//!
//! Supported: objective sense and optional label, `subject to` constraints
//! (one relational operator each), `bounds`, `general`/`integer` and `binary`
//! sections, `end`, and `\` comments. Columns default to `[0, +inf)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::env::{plural, CallGuard, Terminal};
use crate::error::EngineError;
use crate::params::MsgLevel;
use crate::problem::{Bound, ColKind, Direction, Problem};
use crate::search::integer_line;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Number(f64),
    Plus,
    Minus,
    Le,
    Ge,
    Eq,
    Colon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Constraints,
    Bounds,
    General,
    Binary,
    End,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || "!\"#$%&()/,.;?@_`'{}|~[]".contains(c)
}

fn lex(text: &str, path: &Path) -> Result<Vec<(Token, usize)>, EngineError> {
    let mut tokens = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = n + 1;
        let content = raw.split('\\').next().unwrap_or_default();
        let chars: Vec<char> = content.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let start = i;
            i += 1;
            let token = match c {
                c if c.is_whitespace() => continue,
                '+' => Token::Plus,
                '-' => Token::Minus,
                ':' => Token::Colon,
                '<' | '>' | '=' => {
                    let mut op = c.to_string();
                    if let Some(&next) = chars.get(i).filter(|n| matches!(**n, '<' | '>' | '=')) {
                        op.push(next);
                        i += 1;
                    }
                    match op.as_str() {
                        "<" | "<=" | "=<" => Token::Le,
                        ">" | ">=" | "=>" => Token::Ge,
                        "=" => Token::Eq,
                        _ => {
                            return Err(parse_error(path, line, format!("invalid operator `{op}`")));
                        }
                    }
                }
                c if c.is_ascii_digit() || c == '.' => {
                    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                        i += 1;
                    }
                    if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                        let mut k = i + 1;
                        if k < chars.len() && matches!(chars[k], '+' | '-') {
                            k += 1;
                        }
                        if k < chars.len() && chars[k].is_ascii_digit() {
                            i = k;
                            while i < chars.len() && chars[i].is_ascii_digit() {
                                i += 1;
                            }
                        }
                    }
                    let text: String = chars[start..i].iter().collect();
                    let value = text.parse::<f64>().map_err(|_| {
                        parse_error(path, line, format!("invalid number `{text}`"))
                    })?;
                    Token::Number(value)
                }
                c if is_name_char(c) => {
                    while i < chars.len() && is_name_char(chars[i]) {
                        i += 1;
                    }
                    Token::Name(chars[start..i].iter().collect())
                }
                c => {
                    return Err(parse_error(path, line, format!("unexpected character `{c}`")));
                }
            };
            tokens.push((token, line));
        }
    }
    Ok(tokens)
}

fn parse_error(path: &Path, line: usize, message: String) -> EngineError {
    EngineError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    }
}

#[derive(Debug)]
struct ColSpec {
    name: String,
    lb: f64,
    ub: f64,
    kind: ColKind,
}

#[derive(Debug)]
struct RowSpec {
    name: String,
    terms: Vec<(usize, f64)>,
    bound: Bound,
}

#[derive(Debug, Default)]
struct Model {
    maximize: bool,
    cols: Vec<ColSpec>,
    index: HashMap<String, usize>,
    objective: Vec<(usize, f64)>,
    obj_constant: f64,
    rows: Vec<RowSpec>,
}

impl Model {
    fn col(&mut self, name: &str) -> usize {
        if let Some(&j) = self.index.get(name) {
            return j;
        }
        let j = self.cols.len();
        self.cols.push(ColSpec {
            name: name.to_string(),
            lb: 0.0,
            ub: f64::INFINITY,
            kind: ColKind::Continuous,
        });
        self.index.insert(name.to_string(), j);
        j
    }

    fn into_problem(self) -> Result<Problem, EngineError> {
        let mut lp = Problem::new();
        lp.set_direction(if self.maximize {
            Direction::Maximize
        } else {
            Direction::Minimize
        });
        lp.set_obj_constant(self.obj_constant)?;

        lp.add_rows(self.rows.len());
        lp.add_cols(self.cols.len());
        for (j, col) in self.cols.iter().enumerate() {
            lp.set_col_name(j, Some(&col.name))?;
            lp.set_col_bounds(j, Bound::from_limits(col.lb, col.ub))?;
            lp.set_col_kind(j, col.kind)?;
        }
        for &(j, coef) in &self.objective {
            let sum = lp.obj_coef(j)? + coef;
            lp.set_obj_coef(j, sum)?;
        }

        let (mut ia, mut ja, mut ar) = (Vec::new(), Vec::new(), Vec::new());
        for (i, row) in self.rows.iter().enumerate() {
            lp.set_row_name(i, Some(&row.name))?;
            lp.set_row_bounds(i, row.bound)?;
            for &(j, v) in &row.terms {
                ia.push(i);
                ja.push(j);
                ar.push(v);
            }
        }
        lp.load_matrix(&ia, &ja, &ar)?;
        Ok(lp)
    }
}

enum Operand {
    Name(String),
    Value(f64),
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    path: &'a Path,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, l)| *l);
        parse_error(self.path, line, message.into())
    }

    /// Section keyword at the cursor, with the number of tokens it spans.
    fn section(&self) -> Option<(Section, usize)> {
        let word = |offset| match self.peek_at(offset) {
            Some(Token::Name(n)) => Some(n.to_ascii_lowercase()),
            _ => None,
        };
        let first = word(0)?;
        if self.peek_at(1) == Some(&Token::Colon) {
            return None;
        }
        let second = word(1);
        match (first.as_str(), second.as_deref()) {
            ("subject", Some("to")) | ("such", Some("that")) => Some((Section::Constraints, 2)),
            ("st" | "s.t." | "st.", _) => Some((Section::Constraints, 1)),
            ("bounds" | "bound", _) => Some((Section::Bounds, 1)),
            ("general" | "generals" | "gen" | "integer" | "integers" | "int", _) => {
                Some((Section::General, 1))
            }
            ("binary" | "binaries" | "bin", _) => Some((Section::Binary, 1)),
            ("end", _) => Some((Section::End, 1)),
            _ => None,
        }
    }

    fn label(&mut self) -> Option<String> {
        match (self.peek(), self.peek_at(1)) {
            (Some(Token::Name(n)), Some(Token::Colon)) => {
                let name = n.clone();
                self.pos += 2;
                Some(name)
            }
            _ => None,
        }
    }

    fn sense(&mut self) -> Result<bool, EngineError> {
        match self.next() {
            Some(Token::Name(n)) => match n.to_ascii_lowercase().as_str() {
                "maximize" | "maximise" | "maximum" | "max" => Ok(true),
                "minimize" | "minimise" | "minimum" | "min" => Ok(false),
                _ => Err(self.error(format!("expected objective sense, found `{n}`"))),
            },
            _ => Err(self.error("expected objective sense")),
        }
    }

    fn expression(&mut self, model: &mut Model) -> Result<(Vec<(usize, f64)>, f64), EngineError> {
        let mut terms = Vec::new();
        let mut constant = 0.0;
        loop {
            if self.section().is_some() {
                break;
            }
            let mut sign = 1.0;
            let mut signed = false;
            while let Some(Token::Plus | Token::Minus) = self.peek() {
                if self.next() == Some(Token::Minus) {
                    sign = -sign;
                }
                signed = true;
            }
            let starts_label = self.peek_at(1) == Some(&Token::Colon);
            match self.peek().cloned() {
                Some(Token::Number(v)) => {
                    self.pos += 1;
                    match self.peek().cloned() {
                        Some(Token::Name(n))
                            if self.section().is_none() && self.peek_at(1) != Some(&Token::Colon) =>
                        {
                            self.pos += 1;
                            terms.push((model.col(&n), sign * v));
                        }
                        _ => constant += sign * v,
                    }
                }
                Some(Token::Name(n)) if !starts_label => {
                    self.pos += 1;
                    terms.push((model.col(&n), sign));
                }
                _ if signed => return Err(self.error("expected a term after sign")),
                _ => break,
            }
        }
        Ok((terms, constant))
    }

    fn signed_value(&mut self) -> Result<f64, EngineError> {
        let mut sign = 1.0;
        while let Some(Token::Plus | Token::Minus) = self.peek() {
            if self.next() == Some(Token::Minus) {
                sign = -sign;
            }
        }
        match self.next() {
            Some(Token::Number(v)) => Ok(sign * v),
            Some(Token::Name(n)) if is_infinity(&n) => Ok(sign * f64::INFINITY),
            _ => Err(self.error("expected a number")),
        }
    }

    fn constraints(&mut self, model: &mut Model) -> Result<(), EngineError> {
        while self.peek().is_some() && self.section().is_none() {
            let name = self
                .label()
                .unwrap_or_else(|| format!("r.{}", model.rows.len() + 1));
            let (terms, constant) = self.expression(model)?;
            if terms.is_empty() {
                return Err(self.error(format!("constraint `{name}` has no variables")));
            }
            let op = self.next();
            let rhs = self.signed_value()? - constant;
            let bound = match op {
                Some(Token::Le) => Bound::Upper(rhs),
                Some(Token::Ge) => Bound::Lower(rhs),
                Some(Token::Eq) => Bound::Fixed(rhs),
                _ => return Err(self.error(format!("constraint `{name}` lacks a relational operator"))),
            };
            model.rows.push(RowSpec { name, terms, bound });
        }
        Ok(())
    }

    fn operand(&mut self) -> Result<Operand, EngineError> {
        match self.peek() {
            Some(Token::Name(n)) if !is_infinity(n) => {
                let name = n.clone();
                self.pos += 1;
                Ok(Operand::Name(name))
            }
            _ => Ok(Operand::Value(self.signed_value()?)),
        }
    }

    fn bounds(&mut self, model: &mut Model) -> Result<(), EngineError> {
        while self.peek().is_some() && self.section().is_none() {
            match self.operand()? {
                Operand::Name(name) => {
                    let j = model.col(&name);
                    match self.next() {
                        Some(Token::Name(w)) if w.eq_ignore_ascii_case("free") => {
                            model.cols[j].lb = f64::NEG_INFINITY;
                            model.cols[j].ub = f64::INFINITY;
                        }
                        Some(Token::Le) => model.cols[j].ub = self.signed_value()?,
                        Some(Token::Ge) => model.cols[j].lb = self.signed_value()?,
                        Some(Token::Eq) => {
                            let v = self.signed_value()?;
                            model.cols[j].lb = v;
                            model.cols[j].ub = v;
                        }
                        _ => return Err(self.error(format!("malformed bound on `{name}`"))),
                    }
                }
                Operand::Value(v) => {
                    let op = self.next();
                    let Some(Token::Name(name)) = self.next() else {
                        return Err(self.error("expected a column name in bound"));
                    };
                    let j = model.col(&name);
                    match op {
                        Some(Token::Le) => model.cols[j].lb = v,
                        Some(Token::Ge) => model.cols[j].ub = v,
                        Some(Token::Eq) => {
                            model.cols[j].lb = v;
                            model.cols[j].ub = v;
                        }
                        _ => return Err(self.error(format!("malformed bound on `{name}`"))),
                    }
                    match self.peek() {
                        Some(Token::Le) => {
                            self.pos += 1;
                            model.cols[j].ub = self.signed_value()?;
                        }
                        Some(Token::Ge) => {
                            self.pos += 1;
                            model.cols[j].lb = self.signed_value()?;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn kinds(&mut self, model: &mut Model, kind: ColKind) -> Result<(), EngineError> {
        while self.peek().is_some() && self.section().is_none() {
            match self.next() {
                Some(Token::Name(n)) => {
                    let j = model.col(&n);
                    model.cols[j].kind = kind;
                }
                _ => return Err(self.error("expected a column name")),
            }
        }
        Ok(())
    }

    fn model(&mut self) -> Result<Model, EngineError> {
        let mut model = Model {
            maximize: self.sense()?,
            ..Model::default()
        };
        self.label();
        let (terms, constant) = self.expression(&mut model)?;
        model.objective = terms;
        model.obj_constant = constant;

        loop {
            let Some((section, width)) = self.section() else {
                if self.peek().is_some() {
                    return Err(self.error("unexpected token"));
                }
                break;
            };
            self.pos += width;
            match section {
                Section::Constraints => self.constraints(&mut model)?,
                Section::Bounds => self.bounds(&mut model)?,
                Section::General => self.kinds(&mut model, ColKind::Integer)?,
                Section::Binary => self.kinds(&mut model, ColKind::Binary)?,
                Section::End => break,
            }
        }
        Ok(model)
    }
}

fn is_infinity(name: &str) -> bool {
    name.eq_ignore_ascii_case("inf") || name.eq_ignore_ascii_case("infinity")
}

/// Replace `problem` with the model read from a CPLEX LP file.
///
/// Returns the number of lines read. On error `problem` is left unchanged.
pub fn read_lp(problem: &mut Problem, path: impl AsRef<Path>) -> Result<usize, EngineError> {
    let _call = CallGuard::enter("read_lp")?;
    let path = path.as_ref();
    let term = Terminal::new(MsgLevel::All);
    term.all(format!("Reading problem data from '{}'...", path.display()));

    let text = std::fs::read_to_string(path).map_err(|source| {
        term.err(format!("Unable to open '{}' - {source}", path.display()));
        EngineError::Io {
            path: PathBuf::from(path),
            source,
        }
    })?;
    let parsed = lex(&text, path).and_then(|tokens| {
        Parser {
            tokens,
            pos: 0,
            path,
        }
        .model()
    });
    let model = match parsed {
        Ok(model) => model,
        Err(err) => {
            term.err(err.to_string());
            return Err(err);
        }
    };
    let lines = text.lines().count();

    let loaded = model.into_problem()?;
    term.all(format!(
        "{}, {}, {}",
        plural(loaded.num_rows(), "row"),
        plural(loaded.num_cols(), "column"),
        plural(loaded.num_nonzeros(), "non-zero")
    ));
    if loaded.num_int() > 0 {
        term.all(integer_line(loaded.num_int(), loaded.num_bin()));
    }
    term.all(format!("{} were read", plural(lines, "line")));
    *problem = loaded;
    Ok(lines)
}
