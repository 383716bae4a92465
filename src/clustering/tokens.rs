use serde::{Deserialize, Serialize};

/// Wildcard marker used in templates
pub const WILDCARD: &str = "<*>";

/// Whitespace-and-delimiter tokenization of a message
///
/// `glued[i]` records whether token `i` followed token `i - 1` without
/// whitespace, so a template renders back with the original spacing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSequence {
    tokens: Vec<String>,
    glued: Vec<bool>,
}

impl TokenSequence {
    /// Split `text` on whitespace and around each of `delimiters`
    ///
    /// Delimiters are matched longest-first and become tokens of their own.
    pub fn tokenize(text: &str, delimiters: &[String]) -> Self {
        let mut ordered: Vec<&str> = delimiters
            .iter()
            .map(String::as_str)
            .filter(|d| !d.is_empty())
            .collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut seq = Self::default();
        for chunk in text.split_whitespace() {
            let mut glue = false;
            let mut start = 0;
            let mut i = 0;

            while i < chunk.len() {
                let rest = &chunk[i..];
                if let Some(delim) = ordered.iter().find(|d| rest.starts_with(**d)) {
                    if start < i {
                        seq.push(&chunk[start..i], glue);
                        glue = true;
                    }
                    seq.push(delim, glue);
                    glue = true;
                    i += delim.len();
                    start = i;
                } else {
                    i += rest.chars().next().map_or(1, char::len_utf8);
                }
            }

            if start < chunk.len() {
                seq.push(&chunk[start..], glue);
            }
        }
        seq
    }

    fn push(&mut self, token: &str, glued: bool) {
        self.tokens.push(token.to_string());
        self.glued.push(glued);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Fraction of positions where `self` (a template) has a wildcard or the
    /// same token as `other`. Sequences of different length score 0.
    pub fn similarity(&self, other: &TokenSequence) -> f64 {
        if self.len() != other.len() || self.is_empty() {
            return 0.0;
        }
        let hits = self
            .tokens
            .iter()
            .zip(&other.tokens)
            .filter(|(t, o)| t.as_str() == WILDCARD || t == o)
            .count();
        hits as f64 / self.len() as f64
    }

    /// Replace every position that differs from `other` with a wildcard.
    /// Returns true if the template changed.
    pub fn generalize(&mut self, other: &TokenSequence) -> bool {
        let mut changed = false;
        for (token, incoming) in self.tokens.iter_mut().zip(&other.tokens) {
            if token.as_str() != WILDCARD && token != incoming {
                *token = WILDCARD.to_string();
                changed = true;
            }
        }
        changed
    }

    /// Number of wildcard positions
    pub fn wildcard_count(&self) -> usize {
        self.tokens.iter().filter(|t| t.as_str() == WILDCARD).count()
    }

    /// Render the tokens back into a single line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 && !self.glued[i] {
                out.push(' ');
            }
            out.push_str(token);
        }
        out
    }
}
