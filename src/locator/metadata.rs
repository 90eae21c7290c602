//! Parsing of the CI server's build metadata.
//!
//! The server can answer in JSON or in Python-repr form, and older builds are
//! known to emit bare sentinels (`None`, `True`, ...) where a string belongs.
//! Both are handled by rewriting the raw text into strict JSON first: every
//! string literal becomes a double-quoted JSON string and every bare word
//! becomes a string holding that word.

use std::iter::Peekable;
use std::str::Chars;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::artifact::{BuildRecord, BuildStatus, StoredArtifact};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Build metadata is not valid JSON after coercion: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("Build metadata is not an object")]
    NotAnObject,

    #[error("Build metadata has no artifacts list")]
    MissingArtifacts,
}

/// Rewrite `raw` into JSON, quoting bare words and normalizing string quotes.
pub fn coerce_sentinels(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 8);
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => copy_string(c, &mut chars, &mut out),
            // -Infinity, -inf
            '-' if chars.peek().is_some_and(|n| n.is_alphabetic()) => {
                let word = read_word(c, &mut chars);
                out.push('"');
                out.push_str(&word);
                out.push('"');
            }
            c if c.is_ascii_digit() || c == '-' => copy_number(c, &mut chars, &mut out),
            c if c.is_alphabetic() || c == '_' => {
                let word = read_word(c, &mut chars);

                // Python string prefixes: u'...', r"...", b'...'
                let is_prefix = matches!(word.as_str(), "u" | "U" | "r" | "R" | "b" | "B");
                if is_prefix {
                    if let Some(&quote @ ('"' | '\'')) = chars.peek() {
                        chars.next();
                        copy_string(quote, &mut chars, &mut out);
                        continue;
                    }
                }

                out.push('"');
                out.push_str(&word);
                out.push('"');
            }
            _ => out.push(c),
        }
    }

    out
}

fn read_word(first: char, chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::from(first);
    while let Some(&next) = chars.peek() {
        if next.is_alphanumeric() || next == '_' {
            word.push(next);
            chars.next();
        } else {
            break;
        }
    }
    word
}

/// Copy a string literal opened by `quote` as a double-quoted JSON string.
fn copy_string(quote: char, chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push('"');
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some('x') => {
                    let hex: String = chars.by_ref().take(2).collect();
                    out.push_str("\\u00");
                    out.push_str(&hex);
                }
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => break,
            },
            c if c == quote => break,
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn copy_number(first: char, chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push(first);
    let mut prev = first;
    while let Some(&next) = chars.peek() {
        let exponent_sign = (next == '+' || next == '-') && (prev == 'e' || prev == 'E');
        if next.is_ascii_digit() || next == '.' || next == 'e' || next == 'E' || exponent_sign {
            out.push(next);
            prev = next;
            chars.next();
        } else {
            break;
        }
    }
}

/// Read a scalar as text, whatever type it ended up with.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a build metadata document into a [`BuildRecord`].
///
/// Artifacts without a usable `fileName` are skipped with a warning;
/// `relativePath` falls back to the file name.
pub fn parse_build_record(raw: &str) -> Result<BuildRecord, MetadataError> {
    let value: Value = serde_json::from_str(&coerce_sentinels(raw))?;
    let obj = value.as_object().ok_or(MetadataError::NotAnObject)?;

    let number = obj.get("number").and_then(scalar_u64);
    let result = obj.get("result").and_then(scalar_string);
    let status = BuildStatus::from_result(result.as_deref());

    let entries = obj
        .get("artifacts")
        .and_then(Value::as_array)
        .ok_or(MetadataError::MissingArtifacts)?;

    let mut artifacts = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(file_name) = entry.get("fileName").and_then(scalar_string) else {
            warn!("Skipping artifact entry without fileName: {}", entry);
            continue;
        };
        let relative_path = entry
            .get("relativePath")
            .and_then(scalar_string)
            .unwrap_or_else(|| file_name.clone());
        artifacts.push(StoredArtifact {
            file_name,
            relative_path,
        });
    }

    Ok(BuildRecord::new(number, status, artifacts))
}
