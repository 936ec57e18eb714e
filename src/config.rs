use std::str::FromStr;

use crate::Error;

/// When a rejection with no rejection handler gets reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledRejections {
    /// Check the handler queue at the moment the rejection settles. A
    /// handler attached one microtask later is too late.
    #[default]
    AtSettlement,
    /// Check once the microtask queue has drained, and only report if no
    /// rejection handler was attached in the meantime.
    AfterDrain,
    /// Never report.
    Ignore,
}

impl FromStr for UnhandledRejections {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at-settlement" => Ok(Self::AtSettlement),
            "after-drain" => Ok(Self::AfterDrain),
            "ignore" => Ok(Self::Ignore),
            other => Err(Error::InvalidPolicy(other.to_owned())),
        }
    }
}

/// Settings of the thread-local event loop.
///
/// # Examples
///
/// ```
/// use deferred_value::{runtime, Config, UnhandledRejections};
///
/// runtime::configure(Config::default().with_unhandled_rejections(UnhandledRejections::AfterDrain));
/// assert_eq!(runtime::config().unhandled_rejections, UnhandledRejections::AfterDrain);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub unhandled_rejections: UnhandledRejections,
}

impl Config {
    pub const ENV_VAR: &'static str = "DEFERRED_UNHANDLED_REJECTIONS";

    pub fn with_unhandled_rejections(mut self, policy: UnhandledRejections) -> Self {
        self.unhandled_rejections = policy;
        self
    }

    /// Reads [`Config::ENV_VAR`]. Unset or invalid values give the default.
    pub fn from_env() -> Self {
        let Ok(value) = std::env::var(Self::ENV_VAR) else {
            return Self::default();
        };
        match value.parse() {
            Ok(policy) => Self::default().with_unhandled_rejections(policy),
            Err(err) => {
                log::warn!("{}: {err}, using the default", Self::ENV_VAR);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_names() {
        assert_eq!(
            "at-settlement".parse::<UnhandledRejections>().unwrap(),
            UnhandledRejections::AtSettlement
        );
        assert_eq!(
            " After-Drain ".parse::<UnhandledRejections>().unwrap(),
            UnhandledRejections::AfterDrain
        );
        assert_eq!(
            "ignore".parse::<UnhandledRejections>().unwrap(),
            UnhandledRejections::Ignore
        );
    }

    #[test]
    fn rejects_unknown_policy() {
        match "sometimes".parse::<UnhandledRejections>() {
            Err(Error::InvalidPolicy(name)) => assert_eq!(name, "sometimes"),
            other => panic!("expected InvalidPolicy, got {other:?}"),
        }
    }

    // One test owns the variable so parallel tests never see it half set.
    #[test]
    fn from_env_applies_valid_values_and_ignores_invalid_ones() {
        std::env::set_var(Config::ENV_VAR, "after-drain");
        assert_eq!(
            Config::from_env().unhandled_rejections,
            UnhandledRejections::AfterDrain
        );

        std::env::set_var(Config::ENV_VAR, "whenever");
        assert_eq!(Config::from_env(), Config::default());

        std::env::remove_var(Config::ENV_VAR);
        assert_eq!(Config::from_env(), Config::default());
    }

    #[test]
    fn default_reports_at_settlement() {
        assert_eq!(
            Config::default().unhandled_rejections,
            UnhandledRejections::AtSettlement
        );
    }
}
