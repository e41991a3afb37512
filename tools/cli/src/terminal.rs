//! Terminal implementation of the user interaction interface.

use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

use settingsync_host::{Interaction, NoticeLevel};

struct Progress {
    bar: ProgressBar,
    done: f64,
}

/// Prompts with dialoguer, progress with indicatif.
pub struct TerminalInteraction {
    assume_yes: bool,
    progress: Mutex<Option<Progress>>,
}

impl TerminalInteraction {
    /// With `assume_yes`, every prompt picks its first action.
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            progress: Mutex::new(None),
        }
    }

    fn bar_state(&self) -> MutexGuard<'_, Option<Progress>> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with any progress bar hidden.
    fn suspended(&self, f: impl FnOnce()) {
        match self.bar_state().as_ref() {
            Some(progress) => progress.bar.suspend(f),
            None => f(),
        }
    }
}

#[async_trait]
impl Interaction for TerminalInteraction {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.suspended(|| match level {
            NoticeLevel::Info => println!("{}", message),
            NoticeLevel::Warning => eprintln!("warning: {}", message),
            NoticeLevel::Error => eprintln!("error: {}", message),
        });
    }

    async fn prompt(&self, message: &str, actions: &[&str]) -> Option<String> {
        if self.assume_yes {
            return actions.first().map(|a| a.to_string());
        }

        let mut choice = None;
        self.suspended(|| {
            let result = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(message)
                .items(actions)
                .default(0)
                .interact_opt();
            match result {
                Ok(selected) => choice = selected.and_then(|i| actions.get(i)).map(|a| a.to_string()),
                Err(e) => warn!("Prompt failed: {}", e),
            }
        });
        choice
    }

    fn progress(&self, increment: f64, message: &str) {
        let mut guard = self.bar_state();
        let progress = guard.get_or_insert_with(|| {
            let bar = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos:>3}% {msg}") {
                bar.set_style(style);
            }
            Progress { bar, done: 0.0 }
        });

        progress.done = (progress.done + increment).min(100.0);
        progress.bar.set_position(progress.done.round() as u64);
        progress.bar.set_message(message.to_string());

        if progress.done >= 99.999 {
            progress.bar.finish_and_clear();
            *guard = None;
        }
    }

    fn show_document(&self, title: &str, body: &str) {
        self.suspended(|| {
            println!("\n== {} ==\n", title);
            println!("{}", body);
        });
    }
}
