//! Machine configuration.

/// Configuration for creating a machine instance.
#[derive(Debug, Clone)]
pub struct RomWbwConfig {
    /// When false (the default, for interactive hosts), a console read on
    /// an empty input queue suspends the batch. When true the host is
    /// expected to feed input from `on_input_requested` without a UI round
    /// trip, so the suspension is not surfaced as a prompt.
    pub blocking_input: bool,
}

impl Default for RomWbwConfig {
    fn default() -> Self {
        Self {
            blocking_input: false,
        }
    }
}
