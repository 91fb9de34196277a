//! Interactive gate in front of every mutating call.

use crate::model::Timestamped;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Source of answers to yes/no questions.
pub trait Prompt {
    /// Show `question` and return the raw response line.
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Reads answers from stdin.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{question}").context("write prompt")?;
        stdout.flush().context("flush prompt")?;
        let mut line = String::new();
        // EOF reads as an empty answer, which declines.
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read response from stdin")?;
        Ok(line)
    }
}

/// `y` / `yes` in any case; everything else declines.
pub fn is_affirmative(response: &str) -> bool {
    matches!(response.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print `items` under `heading` and ask `question`.
///
/// Returns `false` without side effects when the answer is not affirmative.
pub fn confirm_mutation<P: Prompt + ?Sized>(
    prompt: &mut P,
    heading: &str,
    items: &[String],
    question: &str,
) -> Result<bool> {
    println!("{heading}");
    for item in items {
        println!("  {item}");
    }
    let response = prompt.ask(question)?;
    let accepted = is_affirmative(&response);
    if !accepted {
        println!("Response={:?}. Skipping and exiting.", response.trim());
    }
    Ok(accepted)
}

/// Remove the most recently updated item from `items` and return it.
///
/// Undated items rank below dated ones. On equal timestamps the first one
/// encountered is kept, which depends on listing order and is therefore not
/// stable across API pages.
pub fn keep_latest<T: Timestamped>(items: &mut Vec<T>) -> Option<T> {
    let mut latest: Option<usize> = None;
    for (idx, item) in items.iter().enumerate() {
        let newer = match latest {
            None => true,
            Some(best) => item.updated_at() > items[best].updated_at(),
        };
        if newer {
            latest = Some(idx);
        }
    }
    latest.map(|idx| items.remove(idx))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Prompt;
    use anyhow::Result;
    use std::collections::VecDeque;

    /// Replays canned answers and records the questions asked.
    #[derive(Default)]
    pub struct ScriptedPrompt {
        answers: VecDeque<String>,
        pub questions: Vec<String>,
    }

    impl ScriptedPrompt {
        pub fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                questions: Vec::new(),
            }
        }
    }

    impl Prompt for ScriptedPrompt {
        fn ask(&mut self, question: &str) -> Result<String> {
            self.questions.push(question.to_string());
            Ok(self.answers.pop_front().unwrap_or_default())
        }
    }
}
