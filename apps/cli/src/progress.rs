//! Progress bar for CLI uploads

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use ulman_types::{TransferEvent, TransferState};

/// Renders transfer events of a single upload
pub struct UploadProgress {
    bar: ProgressBar,
    /// Session file of the current upload, once saved
    session_file: Option<PathBuf>,
    /// Print human-readable lines besides the bar
    chatty: bool,
}

impl UploadProgress {
    pub fn new(chatty: bool) -> Self {
        let bar = if chatty {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );

        Self {
            bar,
            session_file: None,
            chatty,
        }
    }

    pub fn session_file(&self) -> Option<&PathBuf> {
        self.session_file.as_ref()
    }

    /// Update the bar from an event
    pub fn handle_event(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::SessionCreated {
                session_id,
                destination_name,
                total_size,
                ..
            } => {
                self.bar.set_length(*total_size);
                self.bar.set_message(destination_name.clone());
                self.println(format!(
                    "{} Session opened: {}",
                    style("✓").green().bold(),
                    style(session_id).cyan()
                ));
            }

            TransferEvent::SessionSaved { path, .. } => {
                self.session_file = Some(path.clone());
                self.println(format!("  Session file: {}", path.display()));
            }

            TransferEvent::ResumeProbed { next_offset, .. } => {
                self.bar.set_position(*next_offset);
                self.println(format!(
                    "{} Server holds {} byte(s), continuing from there",
                    style("↻").cyan(),
                    next_offset
                ));
            }

            TransferEvent::Progress { progress, .. } => {
                self.bar.set_length(progress.total_size);
                self.bar.set_position(progress.acknowledged_bytes);
            }

            TransferEvent::StateChanged { state, error, .. } => match state {
                TransferState::Completed => {
                    self.bar.finish_with_message(format!(
                        "{} Upload complete",
                        style("✓").green().bold()
                    ));
                }
                TransferState::Failed => {
                    self.bar.abandon_with_message(format!(
                        "{} Failed: {}",
                        style("✗").red().bold(),
                        error.as_deref().unwrap_or("Unknown error")
                    ));
                }
                TransferState::Cancelled => {
                    self.bar
                        .abandon_with_message(format!("{} Cancelled", style("○").dim()));
                }
                _ => {}
            },
        }
    }

    fn println(&self, line: String) {
        if self.chatty {
            self.bar.println(line);
        }
    }
}
