use std::time::Duration;

use serde::Serializer;

const CONFIG_JSON: &str = "UPTREE_CONFIG_JSON";

/// Inline JSON configuration from the environment, if set and non-empty.
pub fn get_config_from_env() -> Option<String> {
    std::env::var(CONFIG_JSON)
        .ok()
        .filter(|config| !config.trim().is_empty())
}

const SOURCE_HOST: &str = "UPTREE_SOURCE_HOST";

/// Value of the `host` tag attached to exported metrics.
pub fn get_source_host() -> String {
    std::env::var(SOURCE_HOST)
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| String::from("unknown"))
}

/// Serialize a duration as fractional milliseconds.
pub fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1e3)
}

/// Parse durations such as `250ms`, `5s`, `2m`, `1h` or bare seconds (`1.5`).
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(split);

    let value: f64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration '{input}'"))?;

    let seconds = match unit {
        "" | "s" => value,
        "ms" => value / 1e3,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => anyhow::bail!("unknown duration unit '{other}' in '{input}'"),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow::anyhow!("invalid duration '{input}': {e}"))
}
