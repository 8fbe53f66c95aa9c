//! Answers replayed from a file, one per line.
//!
//! A line reading `^C` simulates an interrupt at that prompt. Running out of
//! answers is [`PromptError::Closed`], not a cancellation.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use super::{Prompt, PromptError, PromptResult, Prompter, fuzzy_rank};
use crate::secret::Secret;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    Interrupt,
}

impl Answer {
    fn parse(line: &str) -> Self {
        if line.trim() == "^C" {
            Self::Interrupt
        } else {
            Self::Text(line.to_string())
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    shown: usize,
    headers: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            answers: lines.into_iter().map(|l| Answer::parse(l.as_ref())).collect(),
            shown: 0,
            headers: Vec::new(),
        }
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::new(text.lines()))
    }

    /// Number of prompts presented so far.
    pub fn prompts_shown(&self) -> usize {
        self.shown
    }

    /// Headers of every prompt presented, in order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, prompt: &Prompt<'_>) -> PromptResult<String> {
        self.shown += 1;
        self.headers.push(prompt.header.to_string());
        match self.answers.pop_front() {
            Some(Answer::Text(text)) => {
                tracing::debug!("{}: scripted answer consumed", prompt.header);
                Ok(text)
            }
            Some(Answer::Interrupt) => Err(PromptError::Interrupted),
            None => Err(PromptError::Closed),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&mut self, prompt: &Prompt<'_>, default: Option<&str>) -> PromptResult<String> {
        let answer = self.next(prompt)?;
        match default {
            Some(d) if answer.trim().is_empty() => Ok(d.to_string()),
            _ => Ok(answer),
        }
    }

    fn password(&mut self, prompt: &Prompt<'_>) -> PromptResult<Secret> {
        self.next(prompt).map(Secret::from)
    }

    fn choose(&mut self, prompt: &Prompt<'_>, _options: &[String]) -> PromptResult<String> {
        self.next(prompt)
    }

    fn filter(&mut self, prompt: &Prompt<'_>, options: &[String]) -> PromptResult<String> {
        let query = self.next(prompt)?;
        if query.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(fuzzy_rank(&query, options).into_iter().next().unwrap_or_default())
    }

    fn confirm(&mut self, prompt: &Prompt<'_>, default: bool) -> PromptResult<bool> {
        let answer = self.next(prompt)?;
        Ok(match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" => true,
            "n" | "no" | "false" => false,
            "" => default,
            other => {
                tracing::warn!("{}: '{}' is not yes/no, using default", prompt.header, other);
                default
            }
        })
    }
}
