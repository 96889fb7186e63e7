use std::fmt::Write as _;

use crate::error::{DataError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceholderStyle {
    AtP,
    Dollar,
}

impl PlaceholderStyle {
    pub fn placeholder(self, idx: usize) -> String {
        match self {
            PlaceholderStyle::AtP => format!("@P{}", idx),
            PlaceholderStyle::Dollar => format!("${}", idx),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Text(String),
    Uuid(uuid::Uuid),
    Decimal(rust_decimal::Decimal),
    DateTime(chrono::NaiveDateTime),
    Bytes(Vec<u8>),
    Null,
}

impl SqlParam {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlParam::Null)
    }

    /// Literal SQL rendering, used for diagnostics only.
    pub fn to_literal(&self) -> String {
        match self {
            SqlParam::I32(v) => v.to_string(),
            SqlParam::I64(v) => v.to_string(),
            SqlParam::F64(v) => v.to_string(),
            SqlParam::Bool(v) => u8::from(*v).to_string(),
            SqlParam::Text(v) => format!("'{}'", v.replace('\'', "''")),
            SqlParam::Uuid(v) => format!("'{}'", v),
            SqlParam::Decimal(v) => v.to_string(),
            SqlParam::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S")),
            SqlParam::Bytes(v) => {
                let mut s = String::with_capacity(2 + v.len() * 2);
                s.push_str("0x");
                for b in v {
                    let _ = write!(s, "{:02X}", b);
                }
                s
            }
            SqlParam::Null => "NULL".to_string(),
        }
    }
}

/// Declared value type of a mapped field or an output parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SqlType {
    Int,
    BigInt,
    Float,
    Bool,
    Text,
    Uuid,
    Decimal,
    DateTime,
    Bytes,
}

impl SqlType {
    pub fn sql_server_name(self) -> &'static str {
        match self {
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Bool => "BIT",
            SqlType::Text => "NVARCHAR(MAX)",
            SqlType::Uuid => "UNIQUEIDENTIFIER",
            SqlType::Decimal => "DECIMAL(38, 10)",
            SqlType::DateTime => "DATETIME2",
            SqlType::Bytes => "VARBINARY(MAX)",
        }
    }

    pub fn postgres_name(self) -> &'static str {
        match self {
            SqlType::Int => "integer",
            SqlType::BigInt => "bigint",
            SqlType::Float => "double precision",
            SqlType::Bool => "boolean",
            SqlType::Text => "text",
            SqlType::Uuid => "uuid",
            SqlType::Decimal => "numeric",
            SqlType::DateTime => "timestamp",
            SqlType::Bytes => "bytea",
        }
    }
}

pub trait ToParam {
    fn to_param(self) -> SqlParam;
}

impl ToParam for i32 {
    fn to_param(self) -> SqlParam {
        SqlParam::I32(self)
    }
}
impl ToParam for i64 {
    fn to_param(self) -> SqlParam {
        SqlParam::I64(self)
    }
}
impl ToParam for f64 {
    fn to_param(self) -> SqlParam {
        SqlParam::F64(self)
    }
}
impl ToParam for bool {
    fn to_param(self) -> SqlParam {
        SqlParam::Bool(self)
    }
}
impl ToParam for String {
    fn to_param(self) -> SqlParam {
        SqlParam::Text(self)
    }
}
impl<'a> ToParam for &'a str {
    fn to_param(self) -> SqlParam {
        SqlParam::Text(self.to_string())
    }
}
impl ToParam for uuid::Uuid {
    fn to_param(self) -> SqlParam {
        SqlParam::Uuid(self)
    }
}
impl ToParam for rust_decimal::Decimal {
    fn to_param(self) -> SqlParam {
        SqlParam::Decimal(self)
    }
}
impl ToParam for chrono::NaiveDateTime {
    fn to_param(self) -> SqlParam {
        SqlParam::DateTime(self)
    }
}
impl ToParam for Vec<u8> {
    fn to_param(self) -> SqlParam {
        SqlParam::Bytes(self)
    }
}
impl ToParam for SqlParam {
    fn to_param(self) -> SqlParam {
        self
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(self) -> SqlParam {
        match self {
            Some(v) => v.to_param(),
            None => SqlParam::Null,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamDirection {
    Input,
    Output(SqlType),
    InputOutput(SqlType),
}

impl ParamDirection {
    pub fn is_output(self) -> bool {
        !matches!(self, ParamDirection::Input)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: SqlParam,
    pub direction: ParamDirection,
}

/// Ordered bag of named parameters.
///
/// Names are stored without the leading `@`. Adding a name twice replaces
/// the earlier value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    items: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, value: impl ToParam) -> Self {
        self.push(name, value.to_param());
        self
    }

    pub fn add_output(mut self, name: impl Into<String>, ty: SqlType) -> Self {
        self.insert(name.into(), SqlParam::Null, ParamDirection::Output(ty));
        self
    }

    pub fn add_input_output(
        mut self,
        name: impl Into<String>,
        value: impl ToParam,
        ty: SqlType,
    ) -> Self {
        self.insert(name.into(), value.to_param(), ParamDirection::InputOutput(ty));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlParam) {
        self.insert(name.into(), value, ParamDirection::Input);
    }

    fn insert(&mut self, name: String, value: SqlParam, direction: ParamDirection) {
        let name = name.trim_start_matches('@').to_string();
        let param = Param {
            name,
            value,
            direction,
        };
        match self.items.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.items.push(param),
        }
    }

    /// Exact match first, then case-insensitive.
    pub fn get(&self, name: &str) -> Option<&Param> {
        let name = name.trim_start_matches('@');
        self.items
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.items.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
    }

    pub fn value(&self, name: &str) -> Option<&SqlParam> {
        self.get(name).map(|p| &p.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_outputs(&self) -> bool {
        self.items.iter().any(|p| p.direction.is_output())
    }

    /// Statement text with every known `@name` replaced by its literal value.
    /// Diagnostics only: the result must never be executed.
    pub fn render_inline(&self, sql: &str) -> String {
        rewrite_named(sql, PlaceholderStyle::AtP, |name| {
            self.value(name).map(SqlParam::to_literal)
        })
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<N: Into<String>> FromIterator<(N, SqlParam)> for Params {
    fn from_iter<I: IntoIterator<Item = (N, SqlParam)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.push(name, value);
        }
        params
    }
}

#[macro_export]
macro_rules! params {
    () => {
        $crate::query::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::query::Params::new()$(.add($name, $value))+
    };
}

/// Rewrites `@name` placeholders into the driver's positional style.
///
/// Names are resolved against `params`; a name used twice reuses its slot.
/// Unknown names (local variables, `@@ROWCOUNT`) are left untouched, as are
/// quoted strings, quoted identifiers and comments.
pub fn bind_named(sql: &str, params: &Params, style: PlaceholderStyle) -> (String, Vec<SqlParam>) {
    let mut slots: Vec<String> = Vec::new();
    let mut values: Vec<SqlParam> = Vec::new();
    let text = rewrite_named(sql, style, |name| {
        let param = params.get(name)?;
        let idx = match slots.iter().position(|s| s.eq_ignore_ascii_case(&param.name)) {
            Some(pos) => pos + 1,
            None => {
                slots.push(param.name.clone());
                values.push(param.value.clone());
                slots.len()
            }
        };
        Some(style.placeholder(idx))
    });
    (text, values)
}

/// Index just past a quoted section or comment starting at `i`, if any.
/// `[..]` identifiers are SQL Server only, `$tag$..$tag$` bodies PostgreSQL only.
fn skip_quoted(chars: &[char], i: usize, style: PlaceholderStyle) -> Option<usize> {
    let next = chars.get(i + 1).copied();
    match chars[i] {
        q @ ('\'' | '"') => Some(skip_until_close(chars, i, q)),
        '[' if style == PlaceholderStyle::AtP => Some(skip_until_close(chars, i, ']')),
        '$' if style == PlaceholderStyle::Dollar => skip_dollar_quoted(chars, i),
        '-' if next == Some('-') => {
            let mut j = i + 2;
            while j < chars.len() && chars[j] != '\n' {
                j += 1;
            }
            Some(j)
        }
        '/' if next == Some('*') => {
            let mut j = i + 2;
            while j + 1 < chars.len() && !(chars[j] == '*' && chars[j + 1] == '/') {
                j += 1;
            }
            Some((j + 2).min(chars.len()))
        }
        _ => None,
    }
}

/// A doubled `close` is an escaped one.
fn skip_until_close(chars: &[char], i: usize, close: char) -> usize {
    let mut j = i + 1;
    while j < chars.len() {
        if chars[j] == close {
            if chars.get(j + 1) == Some(&close) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

/// `$$` or `$tag$` opens a body closed by the same tag. `$1` is a
/// positional parameter and `a$b` part of an identifier.
fn skip_dollar_quoted(chars: &[char], i: usize) -> Option<usize> {
    if i > 0 && (is_ident_char(chars[i - 1]) || chars[i - 1] == '$') {
        return None;
    }
    let mut j = i + 1;
    while j < chars.len() && is_ident_char(chars[j]) {
        j += 1;
    }
    if chars.get(j) != Some(&'$') || chars.get(i + 1).map_or(false, |c| c.is_ascii_digit()) {
        return None;
    }
    let tag = &chars[i..=j];
    let end = (j + 1..chars.len())
        .find(|&k| chars[k..].starts_with(tag))
        .map_or(chars.len(), |k| k + tag.len());
    Some(end)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn rewrite_named<F>(sql: &str, style: PlaceholderStyle, mut replace: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(end) = skip_quoted(&chars, i, style) {
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        let c = chars[i];
        if c == '@' && (i == 0 || chars[i - 1] != '@') {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            if end > start {
                let name: String = chars[start..end].iter().collect();
                if let Some(replacement) = replace(&name) {
                    out.push_str(&replacement);
                    i = end;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Splits a batch at top-level `;`, dropping empty statements.
pub fn split_statements(sql: &str, style: PlaceholderStyle) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        if let Some(end) = skip_quoted(&chars, i, style) {
            current.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if chars[i] == ';' {
            if !current.trim().is_empty() {
                statements.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push(chars[i]);
        }
        i += 1;
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

/// A statement with embedded values, built by [`sql_interpolated!`].
///
/// `{}` takes the next argument, `{N}` the N-th; `{{` and `}}` are literal
/// braces. Every argument becomes a bound parameter `@pN` and never appears
/// in the statement text.
///
/// [`sql_interpolated!`]: crate::sql_interpolated
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolatedSql {
    format: String,
    args: Vec<SqlParam>,
}

impl InterpolatedSql {
    pub fn new(format: impl Into<String>, args: Vec<SqlParam>) -> Self {
        Self {
            format: format.into(),
            args,
        }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn build(&self) -> Result<(String, Params)> {
        let mut sql = String::with_capacity(self.format.len());
        let mut used = vec![false; self.args.len()];
        let mut next_implicit = 0usize;
        let mut chars = self.format.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    sql.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    sql.push('}');
                }
                '{' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            _ => {
                                return Err(DataError::Argument(format!(
                                    "malformed placeholder in interpolated query '{}'",
                                    self.format
                                )))
                            }
                        }
                    }
                    let idx = if digits.is_empty() {
                        next_implicit += 1;
                        next_implicit - 1
                    } else {
                        digits.parse::<usize>().map_err(|_| {
                            DataError::Argument(format!("invalid placeholder index '{}'", digits))
                        })?
                    };
                    if idx >= self.args.len() {
                        return Err(DataError::Argument(format!(
                            "placeholder {{{}}} has no matching argument ({} supplied)",
                            idx,
                            self.args.len()
                        )));
                    }
                    used[idx] = true;
                    let _ = write!(sql, "@p{}", idx);
                }
                '}' => {
                    return Err(DataError::Argument(format!(
                        "unmatched '}}' in interpolated query '{}'",
                        self.format
                    )))
                }
                other => sql.push(other),
            }
        }

        if let Some(idx) = used.iter().position(|u| !u) {
            return Err(DataError::Argument(format!(
                "argument {} is never referenced by the interpolated query",
                idx
            )));
        }

        let params = self
            .args
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("p{}", i), v.clone()))
            .collect();
        Ok((sql, params))
    }
}

#[macro_export]
macro_rules! sql_interpolated {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::query::InterpolatedSql::new(
            $fmt,
            vec![$($crate::query::ToParam::to_param($arg)),*],
        )
    };
}
