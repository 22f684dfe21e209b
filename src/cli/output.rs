//! Shared CLI output helpers.
//!
//! Progress goes to stderr so stdout carries only the resulting document.
//!
//! Color scheme (respects NO_COLOR):
//! - Green: success
//! - Red: errors
//! - Cyan: states, hints
//! - Dimmed: secondary info

use std::fmt::Display;

use console::style;

/// Check if color output is disabled via NO_COLOR env var.
fn colors_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

/// Print a success message with checkmark.
///
/// Example: `✓ decrypted`
pub fn success(msg: &str) {
    if colors_enabled() {
        eprintln!("{} {}", style("✓").green(), msg);
    } else {
        eprintln!("✓ {}", msg);
    }
}

/// Print an error message.
///
/// Example: `✗ key not found in key vault`
pub fn error(msg: &str) {
    if colors_enabled() {
        eprintln!("{} {}", style("✗").red(), msg);
    } else {
        eprintln!("✗ {}", msg);
    }
}

/// Print a hint message.
///
/// Example: `→ check the [kms.local] table`
pub fn hint(msg: &str) {
    if colors_enabled() {
        eprintln!("{} {}", style("→").cyan(), style(msg).cyan());
    } else {
        eprintln!("→ {}", msg);
    }
}

/// Print the state a context has reached.
///
/// Example: `● NEED_MONGO_KEYS`
pub fn state(name: &str) {
    if colors_enabled() {
        eprintln!("{} {}", style("●").dim(), style(name).cyan().bold());
    } else {
        eprintln!("● {}", name);
    }
}

/// Print a key-value pair (label dimmed).
///
/// Example: `  endpoint  kms.us-east-1.amazonaws.com:443`
pub fn kv(label: &str, value: impl Display) {
    if colors_enabled() {
        eprintln!("  {}  {}", style(label).dim(), value);
    } else {
        eprintln!("  {}  {}", label, value);
    }
}

/// Print a dimmed secondary message.
pub fn dimmed(msg: &str) {
    if colors_enabled() {
        eprintln!("{}", style(msg).dim());
    } else {
        eprintln!("{}", msg);
    }
}
