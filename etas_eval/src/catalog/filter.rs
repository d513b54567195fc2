// src/catalog/filter.rs
//
// Filter expressions applied to forecast and observed catalogs.
//
// Filters have a canonical text form, `<field> <op> <value>`, e.g.
// `origin_time >= 1589414400000` or `magnitude >= 2.5`. The text form is what
// gets persisted in meta.json, so parsing it back must reproduce the exact
// same filter set.

use std::fmt;
use std::str::FromStr;

use super::Event;

/// Event attribute a filter compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    /// Origin time in epoch milliseconds.
    OriginTime,
    Magnitude,
}

impl FilterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::OriginTime => "origin_time",
            FilterField::Magnitude => "magnitude",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "origin_time" => Some(FilterField::OriginTime),
            "magnitude" => Some(FilterField::Magnitude),
            _ => None,
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Ge => ">=",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Lt => "<",
            Comparison::Eq => "==",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">=" => Some(Comparison::Ge),
            ">" => Some(Comparison::Gt),
            "<=" => Some(Comparison::Le),
            "<" => Some(Comparison::Lt),
            "==" => Some(Comparison::Eq),
            _ => None,
        }
    }

    /// Evaluate `lhs <op> rhs`.
    pub fn holds<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            Comparison::Ge => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Eq => lhs == rhs,
        }
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterValue {
    Millis(i64),
    Float(f64),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Millis(v) => write!(f, "{}", v),
            // Shortest round-trip form; integral values keep a trailing ".0".
            FilterValue::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// A single `<field> <op> <value>` predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub field: FilterField,
    pub op: Comparison,
    pub value: FilterValue,
}

impl Filter {
    pub fn origin_time(op: Comparison, millis: i64) -> Self {
        Self {
            field: FilterField::OriginTime,
            op,
            value: FilterValue::Millis(millis),
        }
    }

    pub fn magnitude(op: Comparison, mw: f64) -> Self {
        Self {
            field: FilterField::Magnitude,
            op,
            value: FilterValue::Float(mw),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match (self.field, self.value) {
            (FilterField::OriginTime, FilterValue::Millis(v)) => {
                self.op.holds(event.origin_time, v)
            }
            (FilterField::OriginTime, FilterValue::Float(v)) => {
                self.op.holds(event.origin_time as f64, v)
            }
            (FilterField::Magnitude, FilterValue::Float(v)) => self.op.holds(event.magnitude, v),
            (FilterField::Magnitude, FilterValue::Millis(v)) => {
                self.op.holds(event.magnitude, v as f64)
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field.as_str(), self.op.symbol(), self.value)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| FilterError::Malformed {
            expr: s.to_string(),
            reason: reason.to_string(),
        };

        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [field, op, value] = tokens.as_slice() else {
            return Err(malformed("expected '<field> <op> <value>'"));
        };

        let field = FilterField::parse(field).ok_or_else(|| malformed("unknown field"))?;
        let op = Comparison::parse(op).ok_or_else(|| malformed("unknown operator"))?;
        let value = match field {
            FilterField::OriginTime => match value.parse::<i64>() {
                Ok(ms) => FilterValue::Millis(ms),
                Err(_) => FilterValue::Float(
                    value
                        .parse::<f64>()
                        .map_err(|_| malformed("value is not a number"))?,
                ),
            },
            FilterField::Magnitude => FilterValue::Float(
                value
                    .parse::<f64>()
                    .map_err(|_| malformed("value is not a number"))?,
            ),
        };

        Ok(Filter { field, op, value })
    }
}

/// Conjunction of filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    /// Canonical evaluation filters: `[start, end)` and `magnitude >= min_mw`.
    pub fn for_window(start_epoch: i64, end_epoch: i64, min_magnitude: f64) -> Self {
        Self::new(vec![
            Filter::origin_time(Comparison::Ge, start_epoch),
            Filter::origin_time(Comparison::Lt, end_epoch),
            Filter::magnitude(Comparison::Ge, min_magnitude),
        ])
    }

    /// Parse a list of filter expressions.
    pub fn parse<S: AsRef<str>>(exprs: &[S]) -> Result<Self, FilterError> {
        let filters = exprs
            .iter()
            .map(|s| s.as_ref().parse::<Filter>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(filters))
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().all(|f| f.matches(event))
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.to_string()).collect()
    }
}

/// Errors raised while parsing filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    Malformed { expr: String, reason: String },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Malformed { expr, reason } => {
                write!(f, "Malformed filter '{}': {}", expr, reason)
            }
        }
    }
}

impl std::error::Error for FilterError {}
