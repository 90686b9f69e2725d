// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so whichever recorder the embedding process
//! installs can collect these metrics. Without a recorder every call is a
//! no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

pub const INSTALLS: &str = "plughost_plugin_installs_total";
pub const UNINSTALLS: &str = "plughost_plugin_uninstalls_total";
pub const RELOADS: &str = "plughost_plugin_reloads_total";
pub const INVOCATIONS: &str = "plughost_plugin_invocations_total";
pub const INVOCATION_ERRORS: &str = "plughost_plugin_invocation_errors_total";
pub const ACTIVE_PLUGINS: &str = "plughost_active_plugins";
pub const INVOCATION_LATENCY: &str = "plughost_invocation_latency_seconds";

/// Label for calls to exports the plugin's manifest does not declare.
pub const UNDECLARED_EXPORT: &str = "undeclared";

/// The `export` label value. Only manifest-declared names become labels, so
/// caller input cannot grow the label set.
pub fn export_label(declared: Option<&str>) -> String {
    declared.unwrap_or(UNDECLARED_EXPORT).to_string()
}

/// Register all plughost metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(INSTALLS, "Plugins installed");
    describe_counter!(UNINSTALLS, "Plugins uninstalled");
    describe_counter!(RELOADS, "Successful plugin reloads");
    describe_counter!(INVOCATIONS, "Plugin export invocations");
    describe_counter!(
        INVOCATION_ERRORS,
        "Plugin export invocations that returned an error"
    );
    describe_gauge!(ACTIVE_PLUGINS, "Plugins currently in the active state");
    describe_histogram!(INVOCATION_LATENCY, "Plugin invocation latency in seconds");
}

pub fn record_install() {
    metrics::counter!(INSTALLS).increment(1);
}

pub fn record_uninstall() {
    metrics::counter!(UNINSTALLS).increment(1);
}

pub fn record_reload() {
    metrics::counter!(RELOADS).increment(1);
}

/// Record one invocation. `export` is `None` for undeclared exports. Failed
/// calls are labelled with the error code.
pub fn record_invocation(export: Option<&str>, error_code: Option<&'static str>, seconds: f64) {
    let export = export_label(export);
    metrics::counter!(INVOCATIONS, "export" => export.clone()).increment(1);
    if let Some(code) = error_code {
        metrics::counter!(INVOCATION_ERRORS, "export" => export, "code" => code).increment(1);
    }
    metrics::histogram!(INVOCATION_LATENCY).record(seconds);
}

pub fn set_active_plugins(count: u64) {
    metrics::gauge!(ACTIVE_PLUGINS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_exports_share_one_label() {
        assert_eq!(export_label(Some("ping")), "ping");
        assert_eq!(export_label(None), UNDECLARED_EXPORT);
    }
}
