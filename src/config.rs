use crate::application::dispatcher::EligibilityGate;
use crate::domain::money::{Money, SharePolicy};
use crate::error::{PipelineError, Result};
use ::config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Settings file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "billrunner";
pub const ENV_PREFIX: &str = "BILLRUNNER";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub split: SplitSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SplitSettings {
    /// Percentage of the service fee credited to the rider.
    #[serde(default = "default_rider_share")]
    pub rider_share_percent: Decimal,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            rider_share_percent: default_rider_share(),
        }
    }
}

fn default_rider_share() -> Decimal {
    Decimal::from(70)
}

/// Both keys must be set for the rating gate to apply.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct DispatchSettings {
    #[serde(default)]
    pub high_value_threshold: Option<Decimal>,
    #[serde(default)]
    pub min_rating_for_high_value: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Loads settings from `path` (or an optional `billrunner.toml`), then
    /// `BILLRUNNER__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let config = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.share_policy()?;
        self.eligibility_gate()?;
        Ok(())
    }

    pub fn share_policy(&self) -> Result<SharePolicy> {
        SharePolicy::new(self.split.rider_share_percent)
            .map_err(|err| PipelineError::ConfigError(format!("split.rider_share_percent: {err}")))
    }

    pub fn eligibility_gate(&self) -> Result<Option<EligibilityGate>> {
        let dispatch = &self.dispatch;
        match (dispatch.high_value_threshold, dispatch.min_rating_for_high_value) {
            (None, None) => Ok(None),
            (Some(threshold), Some(min_rating)) => {
                if min_rating < Decimal::ONE || min_rating > Decimal::from(5) {
                    return Err(PipelineError::ConfigError(format!(
                        "dispatch.min_rating_for_high_value {min_rating} is outside 1..=5"
                    )));
                }
                let high_value_threshold = Money::new(threshold).map_err(|err| {
                    PipelineError::ConfigError(format!("dispatch.high_value_threshold: {err}"))
                })?;
                Ok(Some(EligibilityGate {
                    high_value_threshold,
                    min_rating,
                }))
            }
            _ => Err(PipelineError::ConfigError(
                "dispatch.high_value_threshold and dispatch.min_rating_for_high_value must be set together"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn load_toml(contents: &str) -> Result<Settings> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Settings::load(Some(file.path()))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.share_policy().unwrap(), SharePolicy::default());
        assert_eq!(settings.eligibility_gate().unwrap(), None);
        assert_eq!(settings.log.level, "info");
        assert!(!settings.log.json);
    }

    #[test]
    fn test_load_from_file() {
        let settings = load_toml(
            r#"
            [split]
            rider_share_percent = 80

            [dispatch]
            high_value_threshold = 5000
            min_rating_for_high_value = 4.5

            [log]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.split.rider_share_percent, dec!(80));
        let gate = settings.eligibility_gate().unwrap().unwrap();
        assert_eq!(gate.high_value_threshold, Money::new(dec!(5000)).unwrap());
        assert_eq!(gate.min_rating, dec!(4.5));
        assert_eq!(settings.log.level, "debug");
        assert!(settings.log.json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = load_toml("[split]\nrider_share_percent = 120\n").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));

        let err = load_toml("[dispatch]\nhigh_value_threshold = 100\n").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));

        let err = load_toml("[dispatch]\nhigh_value_threshold = 100\nmin_rating_for_high_value = 6\n")
            .unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }
}
