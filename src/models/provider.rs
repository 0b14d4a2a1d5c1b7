// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider and data-category identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Third-party health-data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Fitbit,
    #[serde(rename = "healthplanet")]
    HealthPlanet,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Fitbit => "fitbit",
            Provider::HealthPlanet => "healthplanet",
        }
    }

    /// Human-readable name for log lines and messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Fitbit => "Fitbit",
            Provider::HealthPlanet => "HealthPlanet",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fitbit" => Ok(Provider::Fitbit),
            "healthplanet" => Ok(Provider::HealthPlanet),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// One independently fetched slice of a day's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Steps, calories, distance, active minutes.
    Activity,
    /// Resting heart rate.
    HeartRate,
    /// Hours asleep.
    Sleep,
    /// Fitbit body weight log (weight, body fat).
    Body,
    /// HealthPlanet innerscan measurements.
    BodyComposition,
}

impl DataCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Activity => "activity",
            DataCategory::HeartRate => "heart_rate",
            DataCategory::Sleep => "sleep",
            DataCategory::Body => "body",
            DataCategory::BodyComposition => "body_composition",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            DataCategory::Activity,
            DataCategory::HeartRate,
            DataCategory::Sleep,
            DataCategory::Body,
            DataCategory::BodyComposition,
        ]
        .into_iter()
        .find(|c| c.as_str() == value)
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
