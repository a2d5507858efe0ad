use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn run_cli(args: &[&str], home: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_mashell"))
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env_remove("MASHELL_PROVIDER")
        .env_remove("MASHELL_URL")
        .env_remove("MASHELL_KEY")
        .env_remove("MASHELL_MODEL")
        .env_remove("RUST_LOG")
        .output()
        .expect("cli process should start")
}

fn write_config(home: &Path, contents: &str) {
    let dir = home.join(".mashell");
    std::fs::create_dir_all(&dir).expect("config dir should create");
    std::fs::write(dir.join("config.yaml"), contents).expect("config should write");
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_lists_flags_and_init_command() {
    let home = TempDir::new().expect("tempdir should create");

    let output = run_cli(&["--help"], home.path());

    assert!(output.status.success(), "stderr:\n{}", stderr_of(&output));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    for flag in [
        "--provider",
        "--url",
        "--key",
        "--model",
        "--profile",
        "--config",
        "--yes",
        "--verbose",
        "--no-logo",
        "init",
    ] {
        assert!(stdout.contains(flag), "help should mention {flag}:\n{stdout}");
    }
}

#[test]
fn missing_configuration_exits_with_startup_failure() {
    let home = TempDir::new().expect("tempdir should create");

    let output = run_cli(&["--no-logo", "list files"], home.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("provider is required"), "stderr:\n{stderr}");
    assert!(stderr.contains("mashell init"), "stderr:\n{stderr}");
}

#[test]
fn unknown_profile_exits_with_startup_failure() {
    let home = TempDir::new().expect("tempdir should create");
    write_config(
        home.path(),
        "profiles:\n  local:\n    provider: ollama\n    model: llama3\n",
    );

    let output = run_cli(&["--no-logo", "--profile", "work", "hi"], home.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(
        stderr.contains("profile 'work' not found in config (available: local)"),
        "stderr:\n{stderr}"
    );
}

#[test]
fn explicit_missing_config_file_is_an_error() {
    let home = TempDir::new().expect("tempdir should create");

    let output = run_cli(&["--no-logo", "-c", "nowhere.yaml", "hi"], home.path());

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("config file not found"));
}

#[test]
fn unsupported_provider_is_rejected() {
    let home = TempDir::new().expect("tempdir should create");

    let output = run_cli(
        &["--no-logo", "--provider", "bard", "--model", "x", "hi"],
        home.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("unknown provider 'bard'"));
}

#[test]
fn unreachable_provider_aborts_the_task() {
    let home = TempDir::new().expect("tempdir should create");
    write_config(
        home.path(),
        "profiles:\n  local:\n    provider: ollama\n    url: http://127.0.0.1:1\n    model: llama3\n",
    );

    let output = run_cli(&["--no-logo", "say hi"], home.path());

    assert_eq!(
        output.status.code(),
        Some(2),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        stderr_of(&output)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Task aborted:"), "stdout:\n{stdout}");
}
