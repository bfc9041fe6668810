//! Environment overrides for [`AcquisitionConfig`] and the Chromium launcher.
//!
//! Unset, empty or unparsable values keep the defaults.

use std::path::PathBuf;
use std::time::Duration;
use tubescribe_core::AcquisitionConfig;

use crate::chromium::ChromiumOptions;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_truthy(key: &str, default: bool) -> bool {
    match env(key).map(|s| s.to_ascii_lowercase()) {
        Some(s) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env(key)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn timeout_from_env_ms(key: &str, default: Duration) -> Duration {
    match env(key).and_then(|s| s.parse::<u64>().ok()) {
        Some(ms) => Duration::from_millis(ms.clamp(50, 600_000)),
        None => default,
    }
}

pub fn config_from_env() -> AcquisitionConfig {
    let d = AcquisitionConfig::default();
    AcquisitionConfig {
        navigation_timeout: timeout_from_env_ms(
            "TUBESCRIBE_NAVIGATION_TIMEOUT_MS",
            d.navigation_timeout,
        ),
        element_wait_timeout: timeout_from_env_ms(
            "TUBESCRIBE_ELEMENT_WAIT_TIMEOUT_MS",
            d.element_wait_timeout,
        ),
        metadata_timeout: timeout_from_env_ms("TUBESCRIBE_METADATA_TIMEOUT_MS", d.metadata_timeout),
        capture_timeout: timeout_from_env_ms("TUBESCRIBE_CAPTURE_TIMEOUT_MS", d.capture_timeout),
        transcript_click_attempts: env_usize(
            "TUBESCRIBE_TRANSCRIPT_CLICK_ATTEMPTS",
            d.transcript_click_attempts,
        )
        .clamp(1, 10),
        extra_block_patterns: env("TUBESCRIBE_EXTRA_BLOCK_PATTERNS")
            .map(|s| {
                s.split(',')
                    .map(|x| x.trim().to_string())
                    .filter(|x| !x.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        ..d
    }
}

pub fn chromium_options_from_env() -> ChromiumOptions {
    let d = ChromiumOptions::default();
    ChromiumOptions {
        headless: env_truthy("TUBESCRIBE_HEADLESS", d.headless),
        no_sandbox: env_truthy("TUBESCRIBE_NO_SANDBOX", d.no_sandbox),
        chrome_executable: env("TUBESCRIBE_CHROME").map(PathBuf::from),
        user_agent: env("TUBESCRIBE_USER_AGENT"),
        network_idle_window: timeout_from_env_ms("TUBESCRIBE_NETWORK_IDLE_MS", d.network_idle_window),
        ..d
    }
}
