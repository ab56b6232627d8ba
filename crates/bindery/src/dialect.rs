//! The dialect boundary.
//!
//! A [`Dialect`] turns a [`Statement`] and its [`Params`] into something a
//! [`Connection`] can run, and runs it in one of four modes. The executor
//! reaches the dialect through the acquired connection and never looks at
//! the concrete type behind it.

use async_trait::async_trait;
use bindery_types::{Row, SqlValue};

use crate::connection::{Connection, ExecuteResult};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::statement::{ExecutionOptions, Statement};

/// A statement in the backend's native form.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    /// SQL text with the backend's parameter markers.
    pub sql: String,
    /// Parameter values in marker order.
    pub params: Vec<SqlValue>,
}

impl CompiledStatement {
    /// Create a compiled statement.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Executes statements against a connection.
///
/// Only [`name`](Dialect::name) and [`compile`](Dialect::compile) are
/// required. The four `do_*` methods compile and then call the matching
/// [`Connection`] primitive; backends override them when they have a better
/// path.
#[async_trait]
pub trait Dialect: Send + Sync {
    /// Dialect name, for logging.
    fn name(&self) -> &str;

    /// Compile a statement with its parameters.
    fn compile(&self, statement: &Statement, params: &Params) -> Result<CompiledStatement>;

    /// Apply model binding to fetched rows.
    ///
    /// Rows pass through unchanged unless the options carry a live model and
    /// `return_model` is set.
    fn process_rows(&self, rows: Vec<Row>, options: &ExecutionOptions) -> Result<Vec<Row>> {
        match options.model() {
            Some(model) if options.return_model() => {
                rows.into_iter().map(|row| model.load(row)).collect()
            }
            _ => Ok(rows),
        }
    }

    /// Fetch every row.
    async fn do_all(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<Vec<Row>> {
        let compiled = self.compile(statement, params)?;
        let rows = connection.fetch_all(&compiled).await?;
        self.process_rows(rows, statement.options())
    }

    /// Fetch the first row.
    async fn do_first(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<Option<Row>> {
        let compiled = self.compile(statement, params)?;
        match connection.fetch_first(&compiled).await? {
            Some(row) => Ok(self.process_rows(vec![row], statement.options())?.pop()),
            None => Ok(None),
        }
    }

    /// Fetch the first column of the first row.
    async fn do_scalar(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<Option<SqlValue>> {
        let compiled = self.compile(statement, params)?;
        let row = connection.fetch_first(&compiled).await?;
        Ok(row.and_then(Row::into_first_value))
    }

    /// Execute and report the status.
    async fn do_status(
        &self,
        connection: &mut dyn Connection,
        statement: &Statement,
        params: &Params,
    ) -> Result<ExecuteResult> {
        let compiled = self.compile(statement, params)?;
        connection.execute(&compiled).await
    }
}

/// Parameter marker style of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamStyle {
    /// `$1`, `$2`, ...
    #[default]
    Numeric,
    /// `?` for every parameter.
    Qmark,
    /// `@p1`, `@p2`, ...
    Named,
}

impl ParamStyle {
    /// Marker for the parameter at 1-based `position`.
    #[must_use]
    pub fn marker(&self, position: usize) -> String {
        match self {
            Self::Numeric => format!("${position}"),
            Self::Qmark => "?".to_string(),
            Self::Named => format!("@p{position}"),
        }
    }
}

/// A dialect that rewrites `:name` placeholders into positional markers.
///
/// Positional parameters keep their order; each distinct `:name` gets the
/// next position after them, and repeated uses share a position except in
/// [`ParamStyle::Qmark`], which cannot refer back. `::` casts and quoted
/// text are left alone.
#[derive(Debug, Clone)]
pub struct BaseDialect {
    name: String,
    style: ParamStyle,
}

impl BaseDialect {
    /// Create a dialect with the given name and marker style.
    pub fn new(name: impl Into<String>, style: ParamStyle) -> Self {
        Self {
            name: name.into(),
            style,
        }
    }

    /// Marker style of this dialect.
    pub fn style(&self) -> ParamStyle {
        self.style
    }
}

impl Default for BaseDialect {
    fn default() -> Self {
        Self::new("base", ParamStyle::Numeric)
    }
}

#[async_trait]
impl Dialect for BaseDialect {
    fn name(&self) -> &str {
        &self.name
    }

    fn compile(&self, statement: &Statement, params: &Params) -> Result<CompiledStatement> {
        let mut values: Vec<SqlValue> = params.positional().to_vec();
        let mut assigned: Vec<(String, usize)> = Vec::new();
        let mut sql = String::with_capacity(statement.sql().len());
        let mut chars = statement.sql().chars().peekable();
        let mut quote: Option<char> = None;

        while let Some(c) = chars.next() {
            if let Some(q) = quote {
                sql.push(c);
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    sql.push(c);
                }
                ':' if chars.peek() == Some(&':') => {
                    chars.next();
                    sql.push_str("::");
                }
                ':' if chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                    let mut name = String::new();
                    while let Some(&n) = chars.peek() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let value = params
                        .get(&name)
                        .ok_or_else(|| Error::statement(format!("missing value for parameter :{name}")))?;
                    let existing = assigned.iter().find(|(n, _)| *n == name).map(|(_, p)| *p);
                    let position = match existing {
                        Some(position) if self.style != ParamStyle::Qmark => position,
                        _ => {
                            values.push(value.clone());
                            assigned.push((name, values.len()));
                            values.len()
                        }
                    };
                    sql.push_str(&self.style.marker(position));
                }
                _ => sql.push(c),
            }
        }

        Ok(CompiledStatement::new(sql, values))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn compile(style: ParamStyle, sql: &str, params: Params) -> Result<CompiledStatement> {
        BaseDialect::new("test", style).compile(&Statement::new(sql), &params)
    }

    #[test]
    fn test_named_to_numeric() {
        let compiled = compile(
            ParamStyle::Numeric,
            "SELECT * FROM users WHERE id = :id AND org = :org OR owner = :id",
            Params::new().named("id", 7i32).named("org", "acme"),
        )
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM users WHERE id = $1 AND org = $2 OR owner = $1"
        );
        assert_eq!(compiled.params, vec![SqlValue::Int(7), SqlValue::from("acme")]);
    }

    #[test]
    fn test_named_follow_positional() {
        let compiled = compile(
            ParamStyle::Named,
            "UPDATE t SET a = @p1 WHERE b = :b",
            Params::new().push(1i32).named("b", 2i32),
        )
        .unwrap();
        assert_eq!(compiled.sql, "UPDATE t SET a = @p1 WHERE b = @p2");
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn test_qmark_repeats_value() {
        let compiled = compile(
            ParamStyle::Qmark,
            "SELECT :x, :x",
            Params::new().named("x", 1i32),
        )
        .unwrap();
        assert_eq!(compiled.sql, "SELECT ?, ?");
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn test_casts_and_literals_untouched() {
        let compiled = compile(
            ParamStyle::Numeric,
            "SELECT '10:30'::time, :v::text",
            Params::new().named("v", "a"),
        )
        .unwrap();
        assert_eq!(compiled.sql, "SELECT '10:30'::time, $1::text");
    }

    #[test]
    fn test_missing_named_param() {
        let err = compile(ParamStyle::Numeric, "SELECT :missing", Params::new()).unwrap_err();
        assert!(err.is_statement_error());
    }
}
