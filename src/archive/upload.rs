//! Best-effort multipart upload of finished archive artifacts.

use crate::error::UploadError;
use crate::transport::SessionParams;
use reqwest::blocking::multipart;

/// Post one artifact with its metadata. Failures are returned for logging
/// and never retried.
pub(super) fn send(
    http: &reqwest::blocking::Client,
    endpoint: &str,
    params: &SessionParams,
    blob: Vec<u8>,
    duration_secs: f64,
) -> Result<(), UploadError> {
    let size_bytes = blob.len();
    let filename = format!("{}-{}.ogg", params.project, params.generation);
    let part = multipart::Part::bytes(blob)
        .file_name(filename.clone())
        .mime_str("audio/ogg")
        .map_err(|err| UploadError(format!("invalid artifact part: {err}")))?;
    let form = multipart::Form::new()
        .part("file", part)
        .text("filename", filename)
        .text("mime_type", "audio/ogg")
        .text("size_bytes", size_bytes.to_string())
        .text("duration_sec", format!("{duration_secs:.3}"))
        .text("project", params.project.clone())
        .text("session", params.generation.to_string());
    let response = http
        .post(endpoint)
        .multipart(form)
        .send()
        .map_err(|err| UploadError(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(UploadError(format!(
            "service returned {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }
    Ok(())
}
