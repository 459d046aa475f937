//! Check-config command implementation.

use anyhow::Result;

use crate::config::Config;

/// Print the validated configuration with secrets redacted.
pub fn run(config: &Config) -> Result<()> {
    let settings = config.engine_settings();
    let timings = config.timings()?;

    println!("Configuration OK");
    println!();
    print!("{}", config.redacted_yaml()?);
    println!();
    println!(
        "Groups hold at most {} addresses; IPv6 {}",
        settings.max_group_size,
        if settings.use_ipv6 { "enabled" } else { "disabled" }
    );
    println!(
        "Zone policies (if zone mode is active): {} -> {}",
        settings.zone_src.join(", "),
        settings.zone_dst.join(", ")
    );
    println!(
        "Poll every {:?}, debounce {:?}, startup delay {:?}, retry {:?}",
        timings.update_interval, timings.debounce, timings.startup_delay, timings.retry_interval
    );
    Ok(())
}
