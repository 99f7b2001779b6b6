//! Typing-simulation delay for outbound messages.

/// Ceiling for the derived typing delay.
const MAX_TYPING_MS: u64 = 5_000;

/// Per-character typing cost.
const MS_PER_CHAR: u64 = 120;

/// Typing delay proportional to message length, capped, unless a fixed
/// override is configured on the step.
pub fn typing_delay_ms(message: &str, override_ms: Option<u64>) -> u64 {
    override_ms.unwrap_or_else(|| (message.chars().count() as u64 * MS_PER_CHAR).min(MAX_TYPING_MS))
}
