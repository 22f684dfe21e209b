//! Test assertion helpers.

use std::process::Output;

use fieldcrypt::{Context, State, StatusKind};

/// Assert a context is in `expected`, showing its status otherwise.
pub fn assert_state(ctx: &Context, expected: State) {
    assert_eq!(
        ctx.state(),
        expected,
        "unexpected state, status: {}",
        ctx.status()
    );
}

/// Assert a context failed with the given status family.
pub fn assert_failed(ctx: &Context, kind: StatusKind) {
    assert_state(ctx, State::Error);
    assert_eq!(ctx.status().kind(), kind, "status: {}", ctx.status());
    assert!(!ctx.status().message().is_empty());
}

/// Assert that a command output was successful.
pub fn assert_success(output: &Output) {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("Command failed:\n{}", stderr);
    }
}

/// Assert that a command output failed.
pub fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "Expected command to fail but it succeeded"
    );
}

/// Get stdout as String.
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Get stderr as String.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Assert stderr contains a string.
pub fn assert_stderr_contains(output: &Output, expected: &str) {
    let err = stderr(output);
    assert!(
        err.contains(expected),
        "stderr missing '{}', got: {}",
        expected,
        err
    );
}
