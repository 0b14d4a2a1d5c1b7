// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily health records, unique per (user, provider, date).

use super::{decode_date, decode_enum, decode_timestamp, format_date, Db};
use crate::error::AppError;
use crate::models::{DailyHealthRecord, DailyMetrics, Provider};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const RECORD_COLUMNS: &str = r"
    user_id, provider, date, steps, calories_burned, distance_km, active_minutes,
    sleep_hours, resting_heart_rate, weight_kg, body_fat_percent, muscle_mass_kg,
    bone_mass_kg, visceral_fat_level, basal_metabolic_rate, body_age, synced_at
";

impl Db {
    /// Insert or overwrite the record for (user, provider, date).
    ///
    /// Every column is replaced, so a field the new sync did not report is
    /// stored as null.
    pub async fn upsert_daily_record(&self, record: &DailyHealthRecord) -> Result<(), AppError> {
        self.ensure_user(&record.user_id).await?;

        let m = &record.metrics;
        sqlx::query(
            r"
            INSERT INTO daily_health_records (
                user_id, provider, date, steps, calories_burned, distance_km, active_minutes,
                sleep_hours, resting_heart_rate, weight_kg, body_fat_percent, muscle_mass_kg,
                bone_mass_kg, visceral_fat_level, basal_metabolic_rate, body_age, synced_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (user_id, provider, date)
            DO UPDATE SET
                steps = excluded.steps,
                calories_burned = excluded.calories_burned,
                distance_km = excluded.distance_km,
                active_minutes = excluded.active_minutes,
                sleep_hours = excluded.sleep_hours,
                resting_heart_rate = excluded.resting_heart_rate,
                weight_kg = excluded.weight_kg,
                body_fat_percent = excluded.body_fat_percent,
                muscle_mass_kg = excluded.muscle_mass_kg,
                bone_mass_kg = excluded.bone_mass_kg,
                visceral_fat_level = excluded.visceral_fat_level,
                basal_metabolic_rate = excluded.basal_metabolic_rate,
                body_age = excluded.body_age,
                synced_at = excluded.synced_at
            ",
        )
        .bind(&record.user_id)
        .bind(record.provider.as_str())
        .bind(format_date(record.date))
        .bind(m.steps)
        .bind(m.calories_burned)
        .bind(m.distance_km)
        .bind(m.active_minutes)
        .bind(m.sleep_hours)
        .bind(m.resting_heart_rate)
        .bind(m.weight_kg)
        .bind(m.body_fat_percent)
        .bind(m.muscle_mass_kg)
        .bind(m.bone_mass_kg)
        .bind(m.visceral_fat_level)
        .bind(m.basal_metabolic_rate)
        .bind(m.body_age)
        .bind(format_utc_rfc3339(record.synced_at))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_daily_record(
        &self,
        user_id: &str,
        provider: Provider,
        date: NaiveDate,
    ) -> Result<Option<DailyHealthRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM daily_health_records WHERE user_id = $1 AND provider = $2 AND date = $3",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .bind(format_date(date))
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Records in `[start, end]`, oldest first.
    pub async fn list_daily_records(
        &self,
        user_id: &str,
        provider: Provider,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyHealthRecord>, AppError> {
        let sql = format!(
            r"
            SELECT {} FROM daily_health_records
            WHERE user_id = $1 AND provider = $2 AND date >= $3 AND date <= $4
            ORDER BY date ASC
            ",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .bind(format_date(start))
            .bind(format_date(end))
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn count_daily_records(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM daily_health_records WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Most recent `synced_at` across the user's records for a provider.
    pub async fn last_synced_at(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT MAX(synced_at) FROM daily_health_records WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_one(self.pool())
        .await?;

        raw.map(|r| decode_timestamp("synced_at", &r)).transpose()
    }
}

fn row_to_record(row: &SqliteRow) -> Result<DailyHealthRecord, AppError> {
    let provider: String = row.try_get("provider")?;
    let date: String = row.try_get("date")?;
    let synced_at: String = row.try_get("synced_at")?;

    Ok(DailyHealthRecord {
        user_id: row.try_get("user_id")?,
        provider: decode_enum("provider", &provider, |s| s.parse().ok())?,
        date: decode_date("date", &date)?,
        metrics: DailyMetrics {
            steps: row.try_get("steps")?,
            calories_burned: row.try_get("calories_burned")?,
            distance_km: row.try_get("distance_km")?,
            active_minutes: row.try_get("active_minutes")?,
            sleep_hours: row.try_get("sleep_hours")?,
            resting_heart_rate: row.try_get("resting_heart_rate")?,
            weight_kg: row.try_get("weight_kg")?,
            body_fat_percent: row.try_get("body_fat_percent")?,
            muscle_mass_kg: row.try_get("muscle_mass_kg")?,
            bone_mass_kg: row.try_get("bone_mass_kg")?,
            visceral_fat_level: row.try_get("visceral_fat_level")?,
            basal_metabolic_rate: row.try_get("basal_metabolic_rate")?,
            body_age: row.try_get("body_age")?,
        },
        synced_at: decode_timestamp("synced_at", &synced_at)?,
    })
}
