//! Terminal side of the event channel
//!
//! The reporter is the only consumer of worker events. It owns the progress
//! bar and prints log lines; nothing else writes status to the terminal
//! while a command runs.

use crate::queue::{Event, ItemStatus, LogLevel};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Reporter {
    rx: UnboundedReceiver<Event>,
    advanced: bool,
    bar: Option<ProgressBar>,
}

impl Reporter {
    pub fn new(rx: UnboundedReceiver<Event>, advanced: bool) -> Self {
        Self {
            rx,
            advanced,
            bar: None,
        }
    }

    /// Drain events until every sender is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.handle(event);
        }
        self.finish_bar();
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Log { level, message } => self.print(level, &message),
            Event::Busy(0) => self.finish_bar(),
            Event::Busy(n) => tracing::trace!("{} task(s) running", n),
            Event::Progress { id, percent, overall } => {
                let bar = self.bar.get_or_insert_with(new_bar);
                bar.set_position((overall * 1000.0).round() as u64);
                bar.set_message(format!("{} ({:.1}%)", id, percent));
            }
            Event::ItemStatus { id, status, detail } => {
                if self.advanced || status == ItemStatus::Cancelled {
                    let detail = detail.map(|d| format!(" - {}", d)).unwrap_or_default();
                    self.line(format!("  {} {}{}", id, status.to_string(), detail));
                }
            }
            Event::EntryUpdated(entry) => {
                if self.advanced {
                    self.line(format!(
                        "  refreshed {} [{}] {}",
                        entry.id,
                        entry.staleness.label(),
                        entry.title()
                    ));
                }
            }
        }
    }

    fn print(&self, level: LogLevel, message: &str) {
        self.line(format!("[{}] {}", level.tag(), message));
    }

    /// Print above the progress bar when one is showing
    fn line(&self, text: String) {
        match &self.bar {
            Some(bar) => bar.println(text),
            None => eprintln!("{}", text),
        }
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::new(1000);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% | {msg}")
    {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
