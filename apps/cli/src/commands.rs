//! CLI command implementations

use crate::output::{format_bytes, print_output, truncate};
use crate::progress::UploadProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use std::future::Future;
use std::path::{Path, PathBuf};
use ulman_core::{StaticToken, UlmanCore, UlmanError};
use ulman_types::{ChunkResult, Settings, TransferOutcome};

// ============================================================================
// Upload Commands
// ============================================================================

pub async fn upload(
    core: &UlmanCore,
    file: PathBuf,
    name: Option<String>,
    token: String,
    format: OutputFormat,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => default_name(&file)?,
    };
    let tokens = StaticToken::new(token);

    drive(core, core.upload_new(&file, &name, &tokens), None, format).await
}

pub async fn resume_from_file(
    core: &UlmanCore,
    session_file: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    drive(
        core,
        core.resume_from_file(&session_file),
        Some(session_file.clone()),
        format,
    )
    .await
}

pub async fn resume_by_id(
    core: &UlmanCore,
    file: PathBuf,
    name: Option<String>,
    session_id: String,
    format: OutputFormat,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => default_name(&file)?,
    };

    drive(core, core.resume(&file, &name, &session_id), None, format).await
}

fn default_name(file: &Path) -> Result<String> {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Cannot derive a destination name from {}", file.display()))
}

/// Run an upload while rendering its events; Ctrl-C cancels between chunks
async fn drive<F>(
    core: &UlmanCore,
    operation: F,
    session_file: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()>
where
    F: Future<Output = Result<TransferOutcome, UlmanError>>,
{
    let mut events = core.subscribe();
    let mut progress = UploadProgress::new(matches!(format, OutputFormat::Human));
    tokio::pin!(operation);

    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            event = events.recv() => {
                if let Ok(event) = event {
                    progress.handle_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{} Stopping after the current chunk...", style("○").dim());
                core.cancel();
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        progress.handle_event(&event);
    }

    match result {
        Ok(outcome) => match format {
            OutputFormat::Json => print_output(&outcome, format),
            OutputFormat::Human => {
                println!("{} {}", style("✓").green().bold(), outcome);
                Ok(())
            }
        },
        Err(e) => {
            let kind = e.kind();
            let session_file = progress.session_file().cloned().or(session_file);
            if let Some(path) = session_file.filter(|_| resumable(&e)) {
                eprintln!(
                    "  Resume with: {}",
                    style(format!("ulman resume {}", path.display())).cyan()
                );
            }
            Err(anyhow::Error::new(e).context(format!("Upload stopped ({})", kind)))
        }
    }
}

/// Whether running the same session again can help
fn resumable(error: &UlmanError) -> bool {
    !matches!(
        error,
        UlmanError::ConfigNotFound(_)
            | UlmanError::ConfigMalformed { .. }
            | UlmanError::SessionInitiation { .. }
            | UlmanError::InvalidChunkSize
            | UlmanError::InvalidOperation(_)
    )
}

// ============================================================================
// Session Commands
// ============================================================================

pub async fn check_status(core: &UlmanCore, session_id: &str, format: OutputFormat) -> Result<()> {
    let result = core.check_status(session_id).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Human => match result {
            ChunkResult::Complete { .. } => {
                println!("{} Upload is complete", style("✓").green().bold());
            }
            ChunkResult::Incomplete {
                acknowledged: Some(range),
            } => {
                println!(
                    "{} Server holds {} ({}), next chunk starts at byte {}",
                    style("↻").cyan(),
                    range,
                    format_bytes(range.byte_count()),
                    range.next_offset()
                );
            }
            ChunkResult::Incomplete { acknowledged: None } => {
                println!("{} Server holds no bytes yet", style("·").dim());
            }
            ChunkResult::Indeterminate { status } => {
                println!(
                    "{} Server answered with status {}",
                    style("✗").red().bold(),
                    status
                );
            }
        },
    }

    Ok(())
}

pub async fn list_sessions(core: &UlmanCore, format: OutputFormat) -> Result<()> {
    let sessions = core.list_sessions().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        OutputFormat::Human => {
            use tabled::{Table, Tabled};

            if sessions.is_empty() {
                println!(
                    "{}",
                    style(format!("No session files in {}", core.session_dir().await.display()))
                        .dim()
                );
                return Ok(());
            }

            #[derive(Tabled)]
            struct SessionRow {
                saved: String,
                name: String,
                session: String,
                file: String,
            }

            let rows: Vec<SessionRow> = sessions
                .iter()
                .map(|s| SessionRow {
                    saved: s
                        .saved_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    name: truncate(&s.destination_name, 30),
                    session: truncate(&s.session_id, 20),
                    file: s.path.display().to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
            println!();
            println!("{} session(s) total", style(sessions.len()).bold());
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    core: &UlmanCore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = core.get_settings().await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                OutputFormat::Human => {
                    println!("ULMan Configuration:");
                    println!();
                    println!("  Endpoint: {}", settings.endpoint);
                    println!("  Chunk size: {}", format_bytes(settings.chunk_size));
                    println!("  Session directory: {}", core.session_dir().await.display());
                    println!("  Connect timeout: {}s", settings.connect_timeout_secs);
                    println!("  Request timeout: {}s", settings.request_timeout_secs);
                    println!(
                        "  Retries: {} (every {}s)",
                        settings.max_retries, settings.retry_delay_seconds
                    );
                    println!("  Max stalled chunks: {}", settings.max_stalled_chunks);
                    println!("  Verbose: {}", settings.verbose);
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = core.get_settings().await;
            println!("{}", get_value(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = core.get_settings().await;
            set_value(&mut settings, &key, &value)?;

            core.update_settings(settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            use dialoguer::Confirm;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                core.update_settings(Settings::default()).await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

fn get_value(settings: &Settings, key: &str) -> Result<String> {
    let value = match key {
        "endpoint" => settings.endpoint.clone(),
        "chunk_size" => settings.chunk_size.to_string(),
        "session_dir" => settings
            .session_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_default(),
        "connect_timeout_secs" => settings.connect_timeout_secs.to_string(),
        "request_timeout_secs" => settings.request_timeout_secs.to_string(),
        "max_retries" => settings.max_retries.to_string(),
        "retry_delay_seconds" => settings.retry_delay_seconds.to_string(),
        "max_stalled_chunks" => settings.max_stalled_chunks.to_string(),
        "verbose" => settings.verbose.to_string(),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    };
    Ok(value)
}

fn set_value(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "endpoint" => settings.endpoint = value.to_string(),
        "chunk_size" => settings.chunk_size = value.parse()?,
        // An empty value goes back to the default directory
        "session_dir" if value.is_empty() => settings.session_dir = None,
        "session_dir" => settings.session_dir = Some(PathBuf::from(value)),
        "connect_timeout_secs" => settings.connect_timeout_secs = value.parse()?,
        "request_timeout_secs" => settings.request_timeout_secs = value.parse()?,
        "max_retries" => settings.max_retries = value.parse()?,
        "retry_delay_seconds" => settings.retry_delay_seconds = value.parse()?,
        "max_stalled_chunks" => settings.max_stalled_chunks = value.parse()?,
        "verbose" => settings.verbose = value.parse()?,
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_keys_round_trip() {
        let mut settings = Settings::default();
        set_value(&mut settings, "chunk_size", "1048576").unwrap();
        set_value(&mut settings, "session_dir", "/tmp/sessions").unwrap();
        set_value(&mut settings, "verbose", "true").unwrap();

        assert_eq!(get_value(&settings, "chunk_size").unwrap(), "1048576");
        assert_eq!(get_value(&settings, "session_dir").unwrap(), "/tmp/sessions");
        assert!(settings.verbose);

        set_value(&mut settings, "session_dir", "").unwrap();
        assert!(settings.session_dir.is_none());
    }

    #[test]
    fn test_config_rejects_bad_input() {
        let mut settings = Settings::default();
        assert!(set_value(&mut settings, "chunk_size", "four").is_err());
        assert!(set_value(&mut settings, "theme", "dark").is_err());
        assert!(get_value(&settings, "theme").is_err());
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name(Path::new("/backups/disk.img")).unwrap(), "disk.img");
        assert!(default_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_resumable_errors() {
        assert!(resumable(&UlmanError::Timeout));
        assert!(resumable(&UlmanError::Cancelled));
        assert!(!resumable(&UlmanError::ConfigNotFound(PathBuf::from("x"))));
    }
}
