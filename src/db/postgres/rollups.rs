use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{DateRange, Publication, RollupRepo},
    },
    models::{DimensionValues, Generation, RollupRow, dimension_key},
};

/// Each rollup row uses 17 parameters; PostgreSQL allows 65535 per statement.
const MAX_ROWS_PER_BATCH: usize = 1000;

pub struct PostgresRollupRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRollupRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_from_pg(row: &sqlx::postgres::PgRow) -> RollupRow {
        RollupRow {
            id: row.get("row_number"),
            usage_start: row.get("usage_start"),
            usage_end: row.get("usage_end"),
            dimensions: DimensionValues {
                account_id: row.get("account_id"),
                region: row.get("region"),
                service: row.get("service"),
                instance_type: row.get("instance_type"),
            },
            usage_amount: row.get("usage_amount"),
            unit: row.get("unit"),
            unblended_cost: row.get("unblended_cost"),
            markup_cost: row.get("markup_cost"),
            currency: row.get("currency"),
            source_uuid: row.get("source_uuid"),
        }
    }

    fn generation_from_pg(row: &sqlx::postgres::PgRow) -> Generation {
        Generation {
            rollup: row.get("rollup"),
            tenant: row.get("tenant"),
            generation: row.get("generation"),
            window_start: row.get("window_start"),
            row_count: row.get("row_count"),
            first_built_at: row.get("first_built_at"),
            last_built_at: row.get("last_built_at"),
        }
    }
}

#[async_trait]
impl RollupRepo for PostgresRollupRepo {
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

        let mut tx = self.write_pool.begin().await?;

        let record = sqlx::query(
            r#"
            INSERT INTO rollup_generations (
                rollup, tenant, generation, window_start, row_count, first_built_at, last_built_at
            )
            VALUES ($1, $2, 1, $3, $4, $5, $5)
            ON CONFLICT (rollup, tenant) DO UPDATE SET
                generation = rollup_generations.generation + 1,
                window_start = EXCLUDED.window_start,
                row_count = EXCLUDED.row_count,
                last_built_at = EXCLUDED.last_built_at
            RETURNING rollup, tenant, generation, window_start, row_count, first_built_at, last_built_at
            "#,
        )
        .bind(&rollup)
        .bind(&tenant)
        .bind(window_start)
        .bind(row_count)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let generation = Self::generation_from_pg(&record);

        sqlx::query(
            "DELETE FROM rollup_rows WHERE rollup = $1 AND tenant = $2 AND usage_start >= $3",
        )
        .bind(&rollup)
        .bind(&tenant)
        .bind(window_start)
        .execute(&mut *tx)
        .await?;

        for chunk in rows.chunks(MAX_ROWS_PER_BATCH) {
            let placeholders: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let b = i * 17;
                    let params: Vec<String> = (1..=17).map(|n| format!("${}", b + n)).collect();
                    format!("({})", params.join(", "))
                })
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
                    .bind(row.usage_amount)
                    .bind(&row.unit)
                    .bind(row.unblended_cost)
                    .bind(row.markup_cost)
                    .bind(&row.currency)
                    .bind(row.source_uuid);
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
            WHERE rollup = $1 AND tenant = $2 AND usage_start >= $3 AND usage_start <= $4
            ORDER BY usage_start, row_number
            "#,
        )
        .bind(rollup)
        .bind(tenant)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows.iter().map(Self::row_from_pg).collect())
    }

    async fn get_generation(&self, rollup: &str, tenant: &str) -> DbResult<Option<Generation>> {
        let row = sqlx::query(
            r#"
            SELECT rollup, tenant, generation, window_start, row_count, first_built_at, last_built_at
            FROM rollup_generations
            WHERE rollup = $1 AND tenant = $2
            "#,
        )
        .bind(rollup)
        .bind(tenant)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(row.as_ref().map(Self::generation_from_pg))
    }
}
