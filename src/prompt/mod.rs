//! Interactive prompt provider.
//!
//! The selection engine only sees [`Prompter`]. Two backends exist:
//! [`TerminalPrompter`] for an operator at a console, and
//! [`ScriptedPrompter`], which replays answers from a file.
//!
//! Backends return the raw answer. Validation belongs to the selection
//! step that asked, so an empty or unknown answer is never an error here.

mod scripted;
mod terminal;

pub use scripted::{Answer, ScriptedPrompter};
pub use terminal::TerminalPrompter;

use thiserror::Error;

use crate::secret::Secret;

/// Why a prompt produced no answer.
#[derive(Error, Debug)]
pub enum PromptError {
    /// Operator pressed Ctrl+C (or the script said `^C`)
    #[error("interrupted")]
    Interrupted,

    /// No more input (EOF on the terminal, script exhausted)
    #[error("input closed")]
    Closed,

    #[error("terminal error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PromptResult<T> = std::result::Result<T, PromptError>;

/// Header and one-line description shown above an input.
#[derive(Debug, Clone, Copy)]
pub struct Prompt<'a> {
    pub header: &'a str,
    pub description: &'a str,
}

impl<'a> Prompt<'a> {
    pub fn new(header: &'a str, description: &'a str) -> Self {
        Self { header, description }
    }
}

pub trait Prompter {
    /// Free text. An empty answer returns `default` when one is given.
    fn input(&mut self, prompt: &Prompt<'_>, default: Option<&str>) -> PromptResult<String>;

    /// Masked input.
    fn password(&mut self, prompt: &Prompt<'_>) -> PromptResult<Secret>;

    /// Single choice from `options`; returns the raw answer.
    fn choose(&mut self, prompt: &Prompt<'_>, options: &[String]) -> PromptResult<String>;

    /// Fuzzy filter over a long list; returns the picked option or "".
    fn filter(&mut self, prompt: &Prompt<'_>, options: &[String]) -> PromptResult<String>;

    fn confirm(&mut self, prompt: &Prompt<'_>, default: bool) -> PromptResult<bool>;
}

/// Resolve a `choose` answer: an option name (any case) or its 1-based index.
pub fn match_option(answer: &str, options: &[String]) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    if let Some(found) = options.iter().find(|o| o.eq_ignore_ascii_case(answer)) {
        return Some(found.clone());
    }
    answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| options.get(i))
        .cloned()
}

/// Options matching `query`, best first.
///
/// Exact, prefix and substring matches (case-insensitive) rank ahead of
/// subsequence matches; fewer skipped characters rank higher.
pub fn fuzzy_rank(query: &str, options: &[String]) -> Vec<String> {
    let query = query.trim().to_lowercase();
    let mut scored: Vec<(u32, &String)> = options
        .iter()
        .filter_map(|o| fuzzy_score(&query, &o.to_lowercase()).map(|s| (s, o)))
        .collect();
    scored.sort_by_key(|(score, _)| *score);
    scored.into_iter().map(|(_, o)| o.clone()).collect()
}

fn fuzzy_score(query: &str, candidate: &str) -> Option<u32> {
    if query.is_empty() {
        return Some(3);
    }
    if candidate == query {
        return Some(0);
    }
    if candidate.starts_with(query) {
        return Some(1);
    }
    if candidate.contains(query) {
        return Some(2);
    }

    let mut rest = candidate.chars();
    let mut gaps = 0;
    for qc in query.chars() {
        loop {
            match rest.next() {
                Some(c) if c == qc => break,
                Some(_) => gaps += 1,
                None => return None,
            }
        }
    }
    Some(10 + gaps)
}
