//! # Namespace Selector
//!
//! Evaluates selector clauses of a SecretExport against namespace metadata.
//!
//! A clause addresses one scalar under `metadata.labels` or `metadata.annotations`:
//!
//! ```text
//! metadata.labels.team
//! metadata.annotations.field\.cattle\.io/projectId
//! metadata.annotations['field\.cattle\.io/projectId']
//! metadata.annotations["example.com/tier"]
//! ```
//!
//! In the dotted form `\.` is a literal dot and an unescaped dot is rejected, since
//! labels and annotations are flat maps. Inside brackets the key is taken verbatim
//! apart from `\.` and `\\` escapes.
//!
//! Operators follow label-selector semantics:
//!
//! | Operator     | True when                                            |
//! |--------------|------------------------------------------------------|
//! | In           | field present and value in `values`                  |
//! | NotIn        | field absent, or present and value not in `values`   |
//! | Exists       | field present                                        |
//! | DoesNotExist | field absent                                         |

use crate::crd::SelectorClause;
use crate::store::NamespaceMetadata;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("unknown selector operator '{0}' (expected In, NotIn, Exists or DoesNotExist)")]
    UnknownOperator(String),
    #[error("malformed selector key '{path}': {reason}")]
    MalformedPath { path: String, reason: &'static str },
    #[error("selector key '{0}' uses operator {1} with no values")]
    MissingValues(String, SelectorOperator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl FromStr for SelectorOperator {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "In" => Ok(SelectorOperator::In),
            "NotIn" => Ok(SelectorOperator::NotIn),
            "Exists" => Ok(SelectorOperator::Exists),
            "DoesNotExist" => Ok(SelectorOperator::DoesNotExist),
            other => Err(SelectorError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectorOperator::In => "In",
            SelectorOperator::NotIn => "NotIn",
            SelectorOperator::Exists => "Exists",
            SelectorOperator::DoesNotExist => "DoesNotExist",
        };
        f.write_str(s)
    }
}

/// Which metadata map a field path addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Labels,
    Annotations,
}

/// Parsed field path: one key in one metadata map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub field: MetadataField,
    pub key: String,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, SelectorError> {
        let malformed = |reason| SelectorError::MalformedPath {
            path: path.to_string(),
            reason,
        };

        let rest = path
            .trim()
            .strip_prefix("metadata.")
            .ok_or_else(|| malformed("must start with 'metadata.'"))?;

        let (field, rest) = if let Some(rest) = rest.strip_prefix("labels") {
            (MetadataField::Labels, rest)
        } else if let Some(rest) = rest.strip_prefix("annotations") {
            (MetadataField::Annotations, rest)
        } else {
            return Err(malformed("only metadata.labels and metadata.annotations are addressable"));
        };

        let key = if let Some(dotted) = rest.strip_prefix('.') {
            unescape(dotted, false).map_err(malformed)?
        } else if let Some(bracketed) = rest.strip_prefix('[') {
            let quote = bracketed
                .chars()
                .next()
                .filter(|c| *c == '\'' || *c == '"')
                .ok_or_else(|| malformed("bracketed key must be quoted"))?;
            let inner = bracketed[1..]
                .strip_suffix(']')
                .and_then(|s| s.strip_suffix(quote))
                .ok_or_else(|| malformed("bracketed key must end with a matching quote and ']'"))?;
            unescape(inner, true).map_err(malformed)?
        } else {
            return Err(malformed("expected '.' or '[' after the metadata field"));
        };

        if key.is_empty() {
            return Err(malformed("key is empty"));
        }
        Ok(Self { field, key })
    }

    fn lookup<'a>(&self, metadata: &'a NamespaceMetadata) -> Option<&'a str> {
        let map = match self.field {
            MetadataField::Labels => &metadata.labels,
            MetadataField::Annotations => &metadata.annotations,
        };
        map.get(&self.key).map(String::as_str)
    }
}

/// Resolve `\.` and `\\`; outside brackets an unescaped `.` is an error
fn unescape(raw: &str, bracketed: bool) -> Result<String, &'static str> {
    let mut key = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('.' | '\\')) => key.push(escaped),
                Some(_) => return Err("only '\\.' and '\\\\' escapes are supported"),
                None => return Err("trailing escape character"),
            },
            '.' if !bracketed => return Err("unescaped '.' in key (escape it as '\\.')"),
            other => key.push(other),
        }
    }
    Ok(key)
}

/// A validated clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub path: FieldPath,
    pub operator: SelectorOperator,
    pub values: BTreeSet<String>,
}

impl Requirement {
    pub fn compile(clause: &SelectorClause) -> Result<Self, SelectorError> {
        let path = FieldPath::parse(&clause.key)?;
        let operator: SelectorOperator = clause.operator.parse()?;
        if matches!(operator, SelectorOperator::In | SelectorOperator::NotIn)
            && clause.values.is_empty()
        {
            return Err(SelectorError::MissingValues(clause.key.clone(), operator));
        }
        Ok(Self {
            path,
            operator,
            values: clause.values.iter().cloned().collect(),
        })
    }

    #[must_use]
    pub fn matches(&self, metadata: &NamespaceMetadata) -> bool {
        let value = self.path.lookup(metadata);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Evaluate a single clause against namespace metadata
pub fn evaluate(clause: &SelectorClause, metadata: &NamespaceMetadata) -> Result<bool, SelectorError> {
    Ok(Requirement::compile(clause)?.matches(metadata))
}

/// Conjunction of requirements, compiled once per export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Compile every clause; the first invalid clause fails the whole selector
    pub fn compile(clauses: &[SelectorClause]) -> Result<Self, SelectorError> {
        let requirements = clauses
            .iter()
            .map(Requirement::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Logical AND of all requirements; vacuously true for an empty selector
    #[must_use]
    pub fn matches(&self, metadata: &NamespaceMetadata) -> bool {
        self.requirements.iter().all(|r| r.matches(metadata))
    }
}
