//! Configuration loading for `synthrun`.
//!
//! Configuration is a single TOML file. `api_key` and `app_key` support
//! `${VAR}` / `${VAR:-default}` environment expansion so secrets don't have
//! to live in the file itself.

pub mod schema;

pub use schema::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Loads `synthrun` configuration from a TOML file, expanding environment
/// references in `api.api_key` / `api.app_key`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// references an unset required environment variable.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    load_config_str(&content)
}

/// Loads `synthrun` configuration from a TOML string. Useful for testing.
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("failed to parse config")?;

    config.api.api_key = expand_env_value(&config.api.api_key)
        .map_err(|e| anyhow::anyhow!("failed to expand api.api_key: {e}"))?;
    config.api.app_key = expand_env_value(&config.api.app_key)
        .map_err(|e| anyhow::anyhow!("failed to expand api.app_key: {e}"))?;

    Ok(config)
}

/// Expands environment variable references in a string value.
///
/// Syntax:
/// - `${VAR}` - required, fails if VAR is not set
/// - `${VAR:-default}` - optional, uses "default" if VAR not set
/// - `$$` - escaped dollar sign (becomes single `$`)
fn expand_env_value(value: &str) -> Result<String, String> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();

                    let mut var_content = String::new();
                    let mut found_close = false;

                    for c in chars.by_ref() {
                        if c == '}' {
                            found_close = true;
                            break;
                        }
                        var_content.push(c);
                    }

                    if !found_close {
                        return Err(format!("unclosed variable reference: ${{{var_content}"));
                    }

                    let (var_name, default_value) = if let Some(idx) = var_content.find(":-") {
                        let (name, rest) = var_content.split_at(idx);
                        (name, Some(&rest[2..]))
                    } else {
                        (var_content.as_str(), None)
                    };

                    if var_name.is_empty() {
                        return Err("empty variable name in ${}".to_string());
                    }

                    match std::env::var(var_name) {
                        Ok(val) => result.push_str(&val),
                        Err(_) => {
                            if let Some(default) = default_value {
                                result.push_str(default);
                            } else {
                                return Err(format!(
                                    "required environment variable not set: {var_name}"
                                ));
                            }
                        }
                    }
                }
                _ => result.push('$'),
            }
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_required_variable() {
        std::env::set_var("SYNTHRUN_TEST_VAR_A", "secret");
        assert_eq!(expand_env_value("${SYNTHRUN_TEST_VAR_A}").unwrap(), "secret");
        std::env::remove_var("SYNTHRUN_TEST_VAR_A");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        assert_eq!(
            expand_env_value("${SYNTHRUN_TEST_VAR_MISSING:-fallback}").unwrap(),
            "fallback"
        );
    }

    #[test]
    fn errors_on_unset_required_variable() {
        assert!(expand_env_value("${SYNTHRUN_TEST_VAR_MISSING_2}").is_err());
    }

    #[test]
    fn unescapes_doubled_dollar_signs() {
        assert_eq!(expand_env_value("$$100").unwrap(), "$100");
    }

    #[test]
    fn load_config_str_expands_api_credentials() {
        std::env::set_var("SYNTHRUN_TEST_API_KEY", "k123");
        let toml = r#"
            [api]
            api_key = "${SYNTHRUN_TEST_API_KEY}"
            app_key = "${SYNTHRUN_TEST_APP_KEY:-fallback-app}"

            suites = ["tests/**/*.synthrun.json"]
        "#;
        let config = load_config_str(toml).unwrap();
        assert_eq!(config.api.api_key, "k123");
        assert_eq!(config.api.app_key, "fallback-app");
        std::env::remove_var("SYNTHRUN_TEST_API_KEY");
    }
}
