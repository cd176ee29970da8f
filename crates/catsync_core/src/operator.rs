//! Human-in-the-loop interface.
//!
//! # Responsibility
//! - Carry every confirmation prompt, blocking warning and progress message
//!   from the services to whoever drives them.
//! - Let interactive, batch and test runs share one code path.
//!
//! # Invariants
//! - Services never read stdin or print directly; they ask the operator.
//! - A prompt that cannot be answered counts as "no".

use log::{info, warn};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::{Mutex, MutexGuard};

/// Receiver of prompts and messages raised by the services.
pub trait Operator {
    /// Asks a yes/no question; `true` means go ahead.
    fn confirm(&self, prompt: &str) -> bool;
    /// Shows a warning that needs to be seen before the run continues.
    fn acknowledge(&self, message: &str);
    /// Shows a progress or result message.
    fn notify(&self, message: &str);
}

/// Prompts on the terminal and blocks until answered.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

impl Operator for ConsoleOperator {
    fn confirm(&self, prompt: &str) -> bool {
        loop {
            print!("{prompt} [y/n] ");
            let _ = std::io::stdout().flush();
            let Some(answer) = self.read_line() else {
                return false;
            };
            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => println!("Please answer y or n."),
            }
        }
    }

    fn acknowledge(&self, message: &str) {
        println!("WARNING: {message}");
        print!("Press enter to continue. ");
        let _ = std::io::stdout().flush();
        let _ = self.read_line();
    }

    fn notify(&self, message: &str) {
        println!("{message}");
    }
}

/// Answers every prompt with a fixed value, for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct BatchOperator {
    pub assume_yes: bool,
}

impl Operator for BatchOperator {
    fn confirm(&self, prompt: &str) -> bool {
        info!(
            "event=prompt_auto_answered module=operator status=ok answer={} prompt={prompt}",
            self.assume_yes
        );
        println!("{prompt} [auto: {}]", if self.assume_yes { "y" } else { "n" });
        self.assume_yes
    }

    fn acknowledge(&self, message: &str) {
        warn!("event=operator_warning module=operator status=warn message={message}");
        println!("WARNING: {message}");
    }

    fn notify(&self, message: &str) {
        println!("{message}");
    }
}

/// What a `ScriptedOperator` was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorEvent {
    Confirm { prompt: String, answer: bool },
    Acknowledge(String),
    Notify(String),
}

/// Answers prompts from a queue and records everything it sees.
///
/// Once the queue is empty every prompt is answered with `fallback`.
#[derive(Debug)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    events: Mutex<Vec<OperatorEvent>>,
}

impl ScriptedOperator {
    pub fn new(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Operator that agrees to everything.
    pub fn approving() -> Self {
        Self::new([], true)
    }

    pub fn events(&self) -> Vec<OperatorEvent> {
        lock(&self.events).clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OperatorEvent::Confirm { prompt, .. } => Some(prompt),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OperatorEvent::Acknowledge(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OperatorEvent::Notify(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Operator for ScriptedOperator {
    fn confirm(&self, prompt: &str) -> bool {
        let answer = lock(&self.answers).pop_front().unwrap_or(self.fallback);
        lock(&self.events).push(OperatorEvent::Confirm {
            prompt: prompt.to_string(),
            answer,
        });
        answer
    }

    fn acknowledge(&self, message: &str) {
        lock(&self.events).push(OperatorEvent::Acknowledge(message.to_string()));
    }

    fn notify(&self, message: &str) {
        lock(&self.events).push(OperatorEvent::Notify(message.to_string()));
    }
}
