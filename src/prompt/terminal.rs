//! Console prompts read key by key in raw mode.
//!
//! Raw mode turns Ctrl+C into a key event instead of SIGINT, which lets the
//! selection engine ask before cancelling. Ctrl+D on an empty line closes
//! input.

use std::io::{self, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use super::{Prompt, PromptError, PromptResult, Prompter, fuzzy_rank};
use crate::secret::Secret;

/// Most matches listed after a filter query.
const FILTER_LIMIT: usize = 12;

/// Leaves raw mode when dropped, including on early return.
struct RawMode;

impl RawMode {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }

    fn header(&self, prompt: &Prompt<'_>) -> io::Result<()> {
        let mut out = io::stdout();
        writeln!(out)?;
        writeln!(out, "== {} ==", prompt.header)?;
        if !prompt.description.is_empty() {
            for line in prompt.description.lines() {
                writeln!(out, "{line}")?;
            }
        }
        out.flush()
    }

    /// Read one line; `mask` echoes `*` instead of the typed character.
    fn read_line(&self, label: &str, mask: bool) -> PromptResult<String> {
        let mut out = io::stdout();
        write!(out, "{label}")?;
        out.flush()?;

        let _raw = RawMode::enter()?;
        let mut line = String::new();

        loop {
            let Event::Key(KeyEvent {
                code,
                modifiers,
                kind,
                ..
            }) = event::read()?
            else {
                continue;
            };
            if kind == KeyEventKind::Release {
                continue;
            }

            match code {
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    write!(out, "^C\r\n")?;
                    out.flush()?;
                    line.clear();
                    return Err(PromptError::Interrupted);
                }
                KeyCode::Char('d') if modifiers.contains(KeyModifiers::CONTROL) => {
                    if line.is_empty() {
                        write!(out, "\r\n")?;
                        return Err(PromptError::Closed);
                    }
                }
                KeyCode::Enter => {
                    write!(out, "\r\n")?;
                    out.flush()?;
                    return Ok(line);
                }
                KeyCode::Backspace => {
                    if line.pop().is_some() {
                        write!(out, "\x08 \x08")?;
                    }
                }
                KeyCode::Char(c) => {
                    line.push(c);
                    if mask {
                        write!(out, "*")?;
                    } else {
                        write!(out, "{c}")?;
                    }
                }
                _ => {}
            }
            out.flush()?;
        }
    }

    fn list(&self, options: &[String]) -> io::Result<()> {
        let mut out = io::stdout();
        for (i, option) in options.iter().enumerate() {
            writeln!(out, "  {:>2}) {}", i + 1, option)?;
        }
        out.flush()
    }
}

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &Prompt<'_>, default: Option<&str>) -> PromptResult<String> {
        self.header(prompt)?;
        let label = match default {
            Some(d) => format!("[{d}] > "),
            None => "> ".to_string(),
        };
        let answer = self.read_line(&label, false)?;
        match default {
            Some(d) if answer.trim().is_empty() => Ok(d.to_string()),
            _ => Ok(answer),
        }
    }

    fn password(&mut self, prompt: &Prompt<'_>) -> PromptResult<Secret> {
        self.header(prompt)?;
        self.read_line("> ", true).map(Secret::from)
    }

    fn choose(&mut self, prompt: &Prompt<'_>, options: &[String]) -> PromptResult<String> {
        self.header(prompt)?;
        self.list(options)?;
        self.read_line("> ", false)
    }

    fn filter(&mut self, prompt: &Prompt<'_>, options: &[String]) -> PromptResult<String> {
        self.header(prompt)?;
        let query = self.read_line("search> ", false)?;
        if query.trim().is_empty() {
            return Ok(String::new());
        }

        let ranked = fuzzy_rank(&query, options);
        match ranked.as_slice() {
            [] => {
                println!("No match for '{}'", query.trim());
                Ok(String::new())
            }
            [only] => Ok(only.clone()),
            [first, ..] if first.eq_ignore_ascii_case(query.trim()) => Ok(first.clone()),
            _ => {
                let shown = &ranked[..ranked.len().min(FILTER_LIMIT)];
                self.list(shown)?;
                let pick = self.read_line("[1] > ", false)?;
                let pick = pick.trim();
                if pick.is_empty() {
                    return Ok(shown[0].clone());
                }
                Ok(pick
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| shown.get(i))
                    .cloned()
                    .unwrap_or_default())
            }
        }
    }

    fn confirm(&mut self, prompt: &Prompt<'_>, default: bool) -> PromptResult<bool> {
        self.header(prompt)?;
        let label = if default { "[Y/n] > " } else { "[y/N] > " };
        loop {
            let answer = self.read_line(label, false)?;
            match answer.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("Please answer y or n."),
            }
        }
    }
}
