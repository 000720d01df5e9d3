//! Named `%(name)s` placeholders: discovery, the per-request parameter set,
//! and the rewrite to positional `$n` parameters used at bind time.
//!
//! Scanning is lexical only. A placeholder inside a string literal or a
//! comment is reported like any other, which decides the form fields a
//! dashboard offers.

use crate::error::DashError;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Form key carrying the SQL list itself; never treated as a parameter.
pub const RESERVED_PARAMETER: &str = "sql";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%\(([^)]+)\)s").expect("valid placeholder regex"))
}

fn bind_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%%|%\(([^)]+)\)s").expect("valid bind token regex"))
}

/// Names referenced by `sql`, first-seen order, without duplicates.
pub fn extract_named_parameters(sql: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(sql) {
        let name = &caps[1];
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Ordered, multi-valued key/value pairs as submitted by a form or query
/// string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First value submitted for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
}

/// Parameter names of a whole request with their current values.
///
/// Built once, before any statement runs, and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParameterSet {
    entries: Vec<ParameterValue>,
}

impl ParameterSet {
    /// Union the placeholders of every query in request order and look up
    /// each value in `form`, defaulting to an empty string.
    pub fn collect<S: AsRef<str>>(queries: &[S], form: &FormData) -> Self {
        let mut names: Vec<String> = Vec::new();
        for sql in queries {
            for name in extract_named_parameters(sql.as_ref()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let entries = names
            .into_iter()
            .filter(|name| name != RESERVED_PARAMETER)
            .map(|name| {
                let value = form.get(&name).unwrap_or_default().to_string();
                ParameterValue { name, value }
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values for the positional parameters of a rewritten statement.
    pub fn values_for<'a>(&'a self, names: &[String]) -> Result<Vec<&'a str>, DashError> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| DashError::MissingParameter(name.clone()))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| ParameterValue {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }
}

/// SQL text with placeholders replaced by `$1..$n`. `names[i]` feeds `$i+1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalSql {
    pub sql: String,
    pub names: Vec<String>,
}

/// Rewrite `%(name)s` into positional parameters and `%%` into `%`.
/// A name used more than once shares a single position.
pub fn to_positional(sql: &str) -> PositionalSql {
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut last = 0;

    for caps in bind_token_re().captures_iter(sql) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&sql[last..whole.start()]);
        match caps.get(1) {
            None => out.push('%'),
            Some(name) => {
                let name = name.as_str();
                let pos = match names.iter().position(|n| n == name) {
                    Some(i) => i + 1,
                    None => {
                        names.push(name.to_string());
                        names.len()
                    }
                };
                out.push_str(&format!("${pos}"));
            }
        }
        last = whole.end();
    }
    out.push_str(&sql[last..]);

    PositionalSql { sql: out, names }
}
