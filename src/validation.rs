//! Centralized validation functions.
//!
//! This module provides unified validation for:
//! - Decision values (IP addresses and CIDR ranges)
//! - Time intervals (`500ms`, `5s`, `1m`, `4h`, `1d`)
//! - Endpoint URLs

use anyhow::{bail, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;

/// Validate an IP address or CIDR string and return the parsed IpNet.
///
/// If the input is a plain IP address (without /prefix), it will be converted
/// to a /32 (IPv4) or /128 (IPv6) network.
///
/// # Examples
/// ```
/// use cs_unifi_bouncer::validation::validate_ip_or_cidr;
/// assert!(validate_ip_or_cidr("192.168.1.1").is_ok());
/// assert!(validate_ip_or_cidr("192.168.0.0/24").is_ok());
/// assert!(validate_ip_or_cidr("invalid").is_err());
/// ```
pub fn validate_ip_or_cidr(ip_str: &str) -> Result<IpNet> {
    if ip_str.contains('/') {
        ip_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR: {}", ip_str))
    } else {
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid IP address: {}", ip_str))?;
        Ok(IpNet::from(ip))
    }
}

/// Parse an interval such as `500ms`, `5s`, `1m`, `4h` or `1d`.
///
/// Requires ASCII-only input to prevent Unicode-related edge cases.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use cs_unifi_bouncer::validation::parse_interval;
/// assert_eq!(parse_interval("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
/// assert!(parse_interval("5x").is_err());
/// ```
pub fn parse_interval(interval: &str) -> Result<Duration> {
    if interval.is_empty() {
        bail!("Interval cannot be empty");
    }

    if !interval.is_ascii() {
        bail!(
            "Invalid interval '{}'. Only ASCII characters allowed",
            interval
        );
    }

    let split = interval
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(interval.len());
    let (num_part, suffix) = interval.split_at(split);

    let value: u64 = num_part.parse().map_err(|_| {
        anyhow::anyhow!(
            "Invalid interval '{}'. Use format like '500ms', '5s', '1m', '4h'",
            interval
        )
    })?;

    let seconds_per_unit = match suffix {
        "ms" => None,
        "s" => Some(1),
        "m" => Some(60),
        "h" => Some(3600),
        "d" => Some(86400),
        _ => bail!(
            "Invalid interval '{}'. Suffix must be ms, s, m, h, or d",
            interval
        ),
    };

    let duration = match seconds_per_unit {
        None => Duration::from_millis(value),
        Some(unit) => {
            let seconds = value
                .checked_mul(unit)
                .ok_or_else(|| anyhow::anyhow!("Interval '{}' is too large", interval))?;
            Duration::from_secs(seconds)
        }
    };

    if duration.is_zero() {
        bail!("Interval '{}' must be greater than zero", interval);
    }

    Ok(duration)
}

/// Validate that an endpoint URL uses http or https.
pub fn validate_endpoint(name: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        bail!("{} must be set", name);
    }
    if !url.starts_with("https://") && !url.starts_with("http://") {
        bail!("{} must be an http(s) URL: {}", name, url);
    }
    Ok(())
}
