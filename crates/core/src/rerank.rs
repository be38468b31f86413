use crate::error::IndexError;
use regex::Regex;
use std::collections::HashSet;

pub trait Reranker {
    /// One score per `(query, passage)` pair, aligned with the input.
    /// Higher is more relevant.
    fn score(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, IndexError>;
}

#[derive(Debug, Clone)]
pub struct LexicalReranker {
    token_re: Regex,
    min_term_chars: usize,
}

impl LexicalReranker {
    pub fn new() -> Result<Self, IndexError> {
        let token_re =
            Regex::new(r"\w+").map_err(|error| IndexError::Rerank(error.to_string()))?;
        Ok(Self {
            token_re,
            min_term_chars: 3,
        })
    }

    fn tokens<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        self.token_re
            .find_iter(text)
            .map(|token| token.as_str().to_lowercase())
    }

    fn score_pair(&self, query: &str, passage: &str) -> f32 {
        let terms = self
            .tokens(query)
            .filter(|term| term.chars().count() >= self.min_term_chars)
            .collect::<HashSet<_>>();
        if terms.is_empty() {
            return 0.0;
        }

        let passage_tokens = self.tokens(passage).collect::<Vec<_>>();
        if passage_tokens.is_empty() {
            return 0.0;
        }

        let present = passage_tokens.iter().collect::<HashSet<_>>();
        let coverage =
            terms.iter().filter(|term| present.contains(term)).count() as f32 / terms.len() as f32;
        let hits = passage_tokens
            .iter()
            .filter(|token| terms.contains(*token))
            .count();
        let density = hits as f32 / passage_tokens.len() as f32;

        coverage + 0.1 * density
    }
}

impl Reranker for LexicalReranker {
    fn score(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, IndexError> {
        Ok(pairs
            .iter()
            .map(|(query, passage)| self.score_pair(query, passage))
            .collect())
    }
}
