//! # Duration Parsing
//!
//! Parses the duration strings used on Terraform specs (`"30s"`, `"1m30s"`,
//! `"1.5h"`, `"500ms"`).

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static SEGMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?P<number>\d+(?:\.\d+)?)(?P<unit>ms|s|m|h)").ok());

/// Parse a duration string made of one or more `<number><unit>` segments
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let regex = SEGMENT
        .as_ref()
        .ok_or_else(|| anyhow!("Failed to compile duration regex"))?;

    let mut total = 0f64;
    let mut consumed = 0usize;
    for captures in regex.captures_iter(trimmed) {
        let whole = captures
            .get(0)
            .ok_or_else(|| anyhow!("Invalid duration format '{trimmed}'"))?;
        if whole.start() != consumed {
            return Err(anyhow!(
                "Invalid duration format '{trimmed}'. Expected segments like '1m30s' or '500ms'"
            ));
        }
        consumed = whole.end();

        let number: f64 = captures["number"]
            .parse()
            .map_err(|e| anyhow!("Invalid duration number in '{trimmed}': {e}"))?;
        let unit_secs = match &captures["unit"] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => return Err(anyhow!("Unsupported duration unit '{unit}' in '{trimmed}'")),
        };
        total += number * unit_secs;
    }

    if consumed != trimmed.len() {
        return Err(anyhow!(
            "Invalid duration format '{trimmed}'. Expected segments like '1m30s' or '500ms'"
        ));
    }

    Ok(Duration::from_secs_f64(total))
}
