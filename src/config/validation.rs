use super::defaults::{
    ISO_639_1_CODES, MAX_CHANNEL_CAPACITY, MAX_DEVICE_NAME_CHARS, MAX_MIC_CHECK_MS,
    MAX_PROJECT_CHARS, MIN_CHANNEL_CAPACITY, MIN_MIC_CHECK_MS,
};
use super::{AppConfig, Strategy};
use anyhow::{bail, Context, Result};
use clap::Parser;
use url::Url;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize endpoint URLs.
    pub fn validate(&mut self) -> Result<()> {
        match self.strategy {
            Strategy::Batch => match self.transcribe_url.take() {
                Some(url) => {
                    self.transcribe_url =
                        Some(checked_endpoint(&url, "--transcribe-url", &["http", "https"])?);
                }
                None => bail!("--strategy batch requires --transcribe-url"),
            },
            Strategy::Stream => match self.stream_url.take() {
                Some(url) => {
                    self.stream_url = Some(checked_endpoint(&url, "--stream-url", &["ws", "wss"])?);
                }
                None => bail!("--strategy stream requires --stream-url"),
            },
        }
        if let Some(url) = self.archive_url.take() {
            self.archive_url = Some(checked_endpoint(&url, "--archive-url", &["http", "https"])?);
        }

        if !(MIN_MIC_CHECK_MS..=MAX_MIC_CHECK_MS).contains(&self.mic_check_ms) {
            bail!(
                "--mic-check-ms must be between {MIN_MIC_CHECK_MS} and {MAX_MIC_CHECK_MS} ms, got {}",
                self.mic_check_ms
            );
        }
        if !(MIN_CHANNEL_CAPACITY..=MAX_CHANNEL_CAPACITY).contains(&self.channel_capacity) {
            bail!(
                "--channel-capacity must be between {MIN_CHANNEL_CAPACITY} and {MAX_CHANNEL_CAPACITY}, got {}",
                self.channel_capacity
            );
        }

        validate_language(&self.language)?;
        validate_project(&self.project)?;

        if let Some(device) = &self.input_device {
            if device.len() > MAX_DEVICE_NAME_CHARS {
                bail!("--input-device must be at most {MAX_DEVICE_NAME_CHARS} characters");
            }
            if device.chars().any(char::is_control) {
                bail!("--input-device must not contain control characters");
            }
        }

        Ok(())
    }
}

/// Parse an endpoint URL and pin its scheme.
fn checked_endpoint(value: &str, flag: &str, schemes: &[&str]) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} must not be empty");
    }
    let parsed =
        Url::parse(trimmed).with_context(|| format!("{flag} '{trimmed}' is not a valid URL"))?;
    if !schemes.contains(&parsed.scheme()) {
        bail!(
            "{flag} must use one of {schemes:?}, got '{}'",
            parsed.scheme()
        );
    }
    if parsed.host_str().is_none() {
        bail!("{flag} must include a host");
    }
    Ok(parsed.into())
}

fn validate_language(language: &str) -> Result<()> {
    if language.trim().is_empty() {
        bail!("--language must not be empty");
    }
    if language.eq_ignore_ascii_case("auto") {
        return Ok(());
    }
    if !language
        .chars()
        .all(|ch| ch.is_ascii_alphabetic() || ch == '-' || ch == '_')
    {
        bail!("--language must contain only letters and '-'/'_' separators, got '{language}'");
    }
    // Locale forms like pt-BR are fine, only the primary code is checked.
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    if !ISO_639_1_CODES.contains(&primary.as_str()) {
        bail!("--language must start with an ISO-639-1 code or be 'auto', got '{language}'");
    }
    Ok(())
}

/// The project id travels in query strings, form fields and upload
/// filenames, so keep it to a plain slug.
fn validate_project(project: &str) -> Result<()> {
    if project.trim().is_empty() {
        bail!("--project must not be empty");
    }
    if project.len() > MAX_PROJECT_CHARS {
        bail!(
            "--project must be at most {MAX_PROJECT_CHARS} characters, got {}",
            project.len()
        );
    }
    if !project
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        bail!("--project may only contain ASCII letters, digits, '-', '_' and '.', got '{project}'");
    }
    Ok(())
}
