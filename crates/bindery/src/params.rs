//! Statement parameters.
//!
//! A [`Params`] value carries positional values and named values side by
//! side. Dialects decide how they are placed into the compiled statement;
//! [`BaseDialect`](crate::dialect::BaseDialect) appends named values after
//! the positional ones in order of first use.

use bindery_types::SqlValue;

/// A named statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParam {
    /// Parameter name (without the `:` prefix).
    pub name: String,
    /// Parameter value.
    pub value: SqlValue,
}

impl NamedParam {
    /// Create a new named parameter.
    pub fn new<S: Into<String>, V: Into<SqlValue>>(name: S, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Parameters passed alongside a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<SqlValue>,
    named: Vec<NamedParam>,
}

impl Params {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value.
    #[must_use]
    pub fn push<V: Into<SqlValue>>(mut self, value: V) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named value, replacing any previous value for the same name.
    #[must_use]
    pub fn named<S: Into<String>, V: Into<SqlValue>>(mut self, name: S, value: V) -> Self {
        let param = NamedParam::new(name, value);
        match self.named.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => existing.value = param.value,
            None => self.named.push(param),
        }
        self
    }

    /// Positional values in order.
    pub fn positional(&self) -> &[SqlValue] {
        &self.positional
    }

    /// Named values in insertion order.
    pub fn named_params(&self) -> &[NamedParam] {
        &self.named
    }

    /// Look up a named value.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.named.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    /// Whether no values are set.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Self::new()
    }
}

impl From<Vec<SqlValue>> for Params {
    fn from(positional: Vec<SqlValue>) -> Self {
        Self {
            positional,
            named: Vec::new(),
        }
    }
}

impl From<Vec<NamedParam>> for Params {
    fn from(named: Vec<NamedParam>) -> Self {
        named
            .into_iter()
            .fold(Self::new(), |params, p| params.named(p.name, p.value))
    }
}

impl<T: Into<SqlValue>, const N: usize> From<[T; N]> for Params {
    fn from(values: [T; N]) -> Self {
        Self::from(values.into_iter().map(Into::into).collect::<Vec<SqlValue>>())
    }
}

/// Build positional [`Params`] from a list of values.
///
/// ```rust,ignore
/// let params = bindery::params![42, "alice"];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::new()$(.push($value))+
    };
}
