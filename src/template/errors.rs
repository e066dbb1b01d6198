//! Template error types with locations and suggestions

use std::fmt;
use thiserror::Error;

/// Where in a template an error occurred
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub template_name: Option<String>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.template_name {
            Some(name) => write!(f, "{}:{}", name, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("undefined variable '{name}' at {location}{}", .suggestion.as_ref().map(|s| format!(", did you mean '{s}'?")).unwrap_or_default())]
    UndefinedVariable {
        name: String,
        location: SourceLocation,
        suggestion: Option<String>,
    },

    #[error("syntax error at {location}: {message}")]
    Syntax {
        message: String,
        location: SourceLocation,
    },

    #[error("filter '{filter}' failed: {message}")]
    Filter { filter: String, message: String },

    #[error("expression error: {message}")]
    Expression { message: String },

    #[error("template error: {0}")]
    Internal(#[from] minijinja::Error),
}

impl TemplateError {
    pub fn undefined_variable(
        name: impl Into<String>,
        line: usize,
        known: &[&str],
    ) -> Self {
        let name = name.into();
        // Suggest against the last path segment: `nodes.fecth` -> `fetch`
        let leaf = name.rsplit('.').next().unwrap_or(&name);
        let suggestion = suggest_correction(leaf, known);
        Self::UndefinedVariable {
            name,
            location: SourceLocation {
                line,
                template_name: None,
            },
            suggestion,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            location: SourceLocation {
                line,
                template_name: None,
            },
        }
    }

    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filter {
            filter: filter.into(),
            message: message.into(),
        }
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }
}

/// Closest candidate by edit distance, if any is close enough
pub fn suggest_correction(typo: &str, candidates: &[&str]) -> Option<String> {
    let max_distance = (typo.len() / 2).max(2);
    candidates
        .iter()
        .filter(|c| **c != typo)
        .map(|c| (levenshtein_distance(typo, c), *c))
        .filter(|(d, _)| *d <= max_distance)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("fetch", "fecth"), 2);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_suggest_correction() {
        let candidates = ["build", "deploy", "fetch"];
        assert_eq!(suggest_correction("fecth", &candidates), Some("fetch".into()));
        assert_eq!(suggest_correction("deplyo", &candidates), Some("deploy".into()));
        assert_eq!(suggest_correction("completely_unrelated", &candidates), None);
        assert_eq!(suggest_correction("anything", &[]), None);
    }

    #[test]
    fn test_undefined_variable_display() {
        let err = TemplateError::undefined_variable("nodes.fecth", 3, &["fetch", "build"]);
        let msg = err.to_string();
        assert!(msg.contains("undefined variable 'nodes.fecth'"));
        assert!(msg.contains("line 3"));
        assert!(msg.contains("did you mean 'fetch'"));
    }

    #[test]
    fn test_location_display() {
        let loc = SourceLocation {
            line: 7,
            template_name: Some("deploy.run".into()),
        };
        assert_eq!(loc.to_string(), "deploy.run:7");
    }
}
