// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily health record model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::Provider;

/// Normalized measurements for one day.
///
/// Every field is optional: `None` means "not reported", while zero is a
/// real measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub steps: Option<i64>,
    pub calories_burned: Option<i64>,
    pub distance_km: Option<f64>,
    pub active_minutes: Option<i64>,
    pub sleep_hours: Option<f64>,
    pub resting_heart_rate: Option<i64>,
    pub weight_kg: Option<f64>,
    pub body_fat_percent: Option<f64>,
    pub muscle_mass_kg: Option<f64>,
    pub bone_mass_kg: Option<f64>,
    pub visceral_fat_level: Option<f64>,
    pub basal_metabolic_rate: Option<i64>,
    pub body_age: Option<i64>,
}

impl DailyMetrics {
    /// Overlay every field `other` reports onto `self`.
    pub fn merge(&mut self, other: DailyMetrics) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            steps,
            calories_burned,
            distance_km,
            active_minutes,
            sleep_hours,
            resting_heart_rate,
            weight_kg,
            body_fat_percent,
            muscle_mass_kg,
            bone_mass_kg,
            visceral_fat_level,
            basal_metabolic_rate,
            body_age
        );
    }

    /// Number of populated fields.
    pub fn field_count(&self) -> usize {
        [
            self.steps.is_some(),
            self.calories_burned.is_some(),
            self.distance_km.is_some(),
            self.active_minutes.is_some(),
            self.sleep_hours.is_some(),
            self.resting_heart_rate.is_some(),
            self.weight_kg.is_some(),
            self.body_fat_percent.is_some(),
            self.muscle_mass_kg.is_some(),
            self.bone_mass_kg.is_some(),
            self.visceral_fat_level.is_some(),
            self.basal_metabolic_rate.is_some(),
            self.body_age.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }
}

/// Stored record, one per (user, provider, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyHealthRecord {
    pub user_id: String,
    pub provider: Provider,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub metrics: DailyMetrics,
    pub synced_at: DateTime<Utc>,
}
