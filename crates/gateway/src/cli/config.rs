use anyhow::Context;
use ny_domain::config::{Config, ConfigSeverity};

/// Print every validation issue followed by a summary line.
///
/// Returns `false` when at least one error was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    for issue in &issues {
        println!("{issue}");
    }

    let errors = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    println!(
        "\n{errors} error(s), {} warning(s) in {config_path}",
        issues.len() - errors,
    );

    errors == 0
}

/// The resolved config (with all defaults filled in) as TOML.
pub fn render(config: &Config) -> anyhow::Result<String> {
    toml::to_string_pretty(config).context("serializing config")
}

pub fn show(config: &Config) -> anyhow::Result<()> {
    print!("{}", render(config)?);
    Ok(())
}
