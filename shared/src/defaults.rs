//! Default values for configuration parameters.
//!
//! Centralizes the `#[serde(default = "...")]` functions used by
//! `config.rs` when deserializing fields left unspecified in TOML.

/// Default poller identity when a config omits it.
pub fn default_poller_name() -> String {
    "poller".to_string()
}

/// Collectors export their data matrices unless told otherwise.
pub fn default_export_data() -> bool {
    true
}
