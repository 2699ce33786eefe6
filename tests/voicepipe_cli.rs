use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn voicepipe_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_voicepipe").expect("voicepipe test binary not built")
}

#[test]
fn help_mentions_the_engine_and_its_flags() {
    let output = Command::new(voicepipe_bin())
        .arg("--help")
        .output()
        .expect("run voicepipe --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("voicepipe"));
    assert!(combined.contains("--stream-url"));
    assert!(combined.contains("--strategy"));
}

#[test]
fn list_input_devices_prints_a_listing() {
    let output = Command::new(voicepipe_bin())
        .arg("--list-input-devices")
        .env("VOICEPIPE_TEST_DEVICES", "Internal Mic, USB Mic")
        .output()
        .expect("run voicepipe --list-input-devices");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("Available audio input devices:"));
    assert!(combined.contains("  - Internal Mic"));
    assert!(combined.contains("  - USB Mic"));
}

#[test]
fn list_input_devices_reports_none_detected() {
    let output = Command::new(voicepipe_bin())
        .arg("--list-input-devices")
        .env("VOICEPIPE_TEST_DEVICES", " ")
        .output()
        .expect("run voicepipe --list-input-devices");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("No audio input devices detected."));
}

#[test]
fn missing_stream_url_fails_validation() {
    let output = Command::new(voicepipe_bin())
        .env_remove("VOICEPIPE_STREAM_URL")
        .env_remove("VOICEPIPE_TRANSCRIBE_URL")
        .output()
        .expect("run voicepipe without endpoints");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--stream-url"));
}

#[test]
fn rejects_stream_url_with_http_scheme() {
    let output = Command::new(voicepipe_bin())
        .args(["--stream-url", "http://localhost:9000/session"])
        .output()
        .expect("run voicepipe with a bad scheme");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("must use one of"));
}

#[test]
fn mic_check_runs_or_reports_no_input() {
    let output = Command::new(voicepipe_bin())
        .args(["--mic-check", "--mic-check-ms", "500"])
        .output()
        .expect("run voicepipe --mic-check");
    let combined = combined_output(&output);
    assert!(
        combined.contains("Input level range:")
            || combined.contains("unable to open the audio input")
    );
}
