//! Loading the config file and applying `section.key=value` overrides on top of it.

use std::{fs, path::Path};

use toml::{value::Table, Value};

use crate::{errors::ConfigError, Config};

/// Reads `path`, applies `overrides` in order and deserializes the result.
pub fn load_config(path: &Path, overrides: &[String]) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(path)?;
    let mut config_toml: Value = toml::from_str(&config_str)?;

    let table = config_toml
        .as_table_mut()
        .ok_or(ConfigError::TraverseNonTableAt {
            key: "<root>".to_string(),
            path: "".to_string(),
        })?;

    for o in overrides {
        let (path, val) = parse_override(o)?;
        apply_override(&path, val, table)?;
    }

    let config = config_toml.try_into::<Config>()?;
    validate_config(config)
}

fn validate_config(config: Config) -> Result<Config, ConfigError> {
    if config.pegin.claim_confirmations == 0 {
        return Err(ConfigError::InvalidValue {
            key: "pegin.claim_confirmations",
            reason: "must be at least 1".into(),
        });
    }
    if config.pegin.poll_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: "pegin.poll_interval_secs",
            reason: "must be at least 1".into(),
        });
    }
    Ok(config)
}

/// Splits `a.b.c=value` into its key path and a TOML value.
///
/// The value is read as a TOML literal when it is one (`true`, `12`, `"quoted"`) and as a
/// bare string otherwise.
pub fn parse_override(s: &str) -> Result<(Vec<String>, Value), ConfigError> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(s.to_owned()))?;
    let path: Vec<String> = key.trim().split('.').map(str::to_owned).collect();
    if path.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::InvalidOverride(s.to_owned()));
    }

    let raw = raw.trim();
    let value = toml::from_str::<Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| Value::String(raw.to_owned()));
    Ok((path, value))
}

/// Sets `path` to `val` inside `table`, creating intermediate tables as needed.
pub fn apply_override(path: &[String], val: Value, table: &mut Table) -> Result<(), ConfigError> {
    let Some((last, parents)) = path.split_last() else {
        return Err(ConfigError::InvalidOverride(String::new()));
    };

    let mut cur = table;
    for (i, key) in parents.iter().enumerate() {
        let entry = cur
            .entry(key.clone())
            .or_insert_with(|| Value::Table(Table::new()));
        cur = entry
            .as_table_mut()
            .ok_or_else(|| ConfigError::TraverseNonTableAt {
                key: key.clone(),
                path: path[..=i].join("."),
            })?;
    }
    cur.insert(last.clone(), val);
    Ok(())
}
