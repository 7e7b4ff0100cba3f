use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        decode::{parse_decimal, parse_source_uuid},
        error::{DbError, DbResult},
        repos::{DateRange, Publication, RollupRepo},
    },
    models::{DimensionValues, Generation, RollupRow, dimension_key},
};

pub struct SqliteRollupRepo {
    pool: SqlitePool,
}

impl SqliteRollupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_from_sqlite(row: &sqlx::sqlite::SqliteRow) -> DbResult<RollupRow> {
        let usage_amount: String = row.get("usage_amount");
        let unblended_cost: String = row.get("unblended_cost");
        let markup_cost: String = row.get("markup_cost");
        let source_uuid: String = row.get("source_uuid");

        Ok(RollupRow {
            id: row.get("row_number"),
            usage_start: row.try_get("usage_start")?,
            usage_end: row.try_get("usage_end")?,
            dimensions: DimensionValues {
                account_id: row.get("account_id"),
                region: row.get("region"),
                service: row.get("service"),
                instance_type: row.get("instance_type"),
            },
            usage_amount: parse_decimal("usage_amount", &usage_amount)?,
            unit: row.get("unit"),
            unblended_cost: parse_decimal("unblended_cost", &unblended_cost)?,
            markup_cost: parse_decimal("markup_cost", &markup_cost)?,
            currency: row.get("currency"),
            source_uuid: parse_source_uuid(&source_uuid)?,
        })
    }

    fn generation_from_sqlite(row: &sqlx::sqlite::SqliteRow) -> DbResult<Generation> {
        Ok(Generation {
            rollup: row.get("rollup"),
            tenant: row.get("tenant"),
            generation: row.get("generation"),
            window_start: row.try_get("window_start")?,
            row_count: row.get("row_count"),
            first_built_at: row.try_get("first_built_at")?,
            last_built_at: row.try_get("last_built_at")?,
        })
    }
}

#[async_trait]
impl RollupRepo for SqliteRollupRepo {
    async fn replace_window(&self, publication: Publication) -> DbResult<Generation> {
        let Publication {
            rollup,
            tenant,
            dimensions,
            window_start,
            rows,
        } = publication;
        let now = Utc::now();
        let row_count = rows.len() as i64;

        let mut tx = self.pool.begin().await?;

        let record = sqlx::query(
            r#"
            INSERT INTO rollup_generations (
                rollup, tenant, generation, window_start, row_count, first_built_at, last_built_at
            )
            VALUES (?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT(rollup, tenant) DO UPDATE SET
                generation = rollup_generations.generation + 1,
                window_start = excluded.window_start,
                row_count = excluded.row_count,
                last_built_at = excluded.last_built_at
            RETURNING rollup, tenant, generation, window_start, row_count, first_built_at, last_built_at
            "#,
        )
        .bind(&rollup)
        .bind(&tenant)
        .bind(window_start)
        .bind(row_count)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let generation = Self::generation_from_sqlite(&record)?;

        sqlx::query("DELETE FROM rollup_rows WHERE rollup = ? AND tenant = ? AND usage_start >= ?")
            .bind(&rollup)
            .bind(&tenant)
            .bind(window_start)
            .execute(&mut *tx)
            .await?;

        // SQLite has a limit of 999 parameters per query (SQLITE_LIMIT_VARIABLE_NUMBER).
        // Each rollup row uses 17 parameters.
        const MAX_ROWS_PER_BATCH: usize = 50;

        for chunk in rows.chunks(MAX_ROWS_PER_BATCH) {
            let placeholders: Vec<&str> = chunk
                .iter()
                .map(|_| "(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
                .collect();

            let query = format!(
                r#"
                INSERT INTO rollup_rows (
                    rollup, tenant, generation, row_number, usage_start, usage_end,
                    dimension_key, account_id, region, service, instance_type,
                    usage_amount, unit, unblended_cost, markup_cost, currency, source_uuid
                )
                VALUES {}
                "#,
                placeholders.join(", ")
            );

            let mut query_builder = sqlx::query(&query);
            for row in chunk {
                query_builder = query_builder
                    .bind(&rollup)
                    .bind(&tenant)
                    .bind(generation.generation)
                    .bind(row.id)
                    .bind(row.usage_start)
                    .bind(row.usage_end)
                    .bind(dimension_key(&dimensions, &row.dimensions))
                    .bind(row.dimensions.account_id.as_deref())
                    .bind(row.dimensions.region.as_deref())
                    .bind(row.dimensions.service.as_deref())
                    .bind(row.dimensions.instance_type.as_deref())
                    .bind(row.usage_amount.to_string())
                    .bind(&row.unit)
                    .bind(row.unblended_cost.to_string())
                    .bind(row.markup_cost.to_string())
                    .bind(&row.currency)
                    .bind(row.source_uuid.to_string());
            }

            query_builder
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                        DbError::Conflict(format!(
                            "Duplicate (period, dimension key) in rollup '{}' for tenant '{}'",
                            rollup, tenant
                        ))
                    }
                    _ => DbError::from(e),
                })?;
        }

        tx.commit().await?;
        Ok(generation)
    }

    async fn list_rows(
        &self,
        rollup: &str,
        tenant: &str,
        range: DateRange,
    ) -> DbResult<Vec<RollupRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                row_number, usage_start, usage_end, account_id, region, service,
                instance_type, usage_amount, unit, unblended_cost, markup_cost,
                currency, source_uuid
            FROM rollup_rows
            WHERE rollup = ? AND tenant = ? AND usage_start >= ? AND usage_start <= ?
            ORDER BY usage_start, row_number
            "#,
        )
        .bind(rollup)
        .bind(tenant)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_from_sqlite).collect()
    }

    async fn get_generation(&self, rollup: &str, tenant: &str) -> DbResult<Option<Generation>> {
        let row = sqlx::query(
            r#"
            SELECT rollup, tenant, generation, window_start, row_count, first_built_at, last_built_at
            FROM rollup_generations
            WHERE rollup = ? AND tenant = ?
            "#,
        )
        .bind(rollup)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::generation_from_sqlite).transpose()
    }
}
