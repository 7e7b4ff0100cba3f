use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        decode::{parse_decimal, parse_source_uuid, parse_usage_amount},
        error::{DbError, DbResult},
        repos::FactRepo,
    },
    models::{FactRow, FactScan},
};

const SCAN_SQL: &str = r#"
    SELECT
        tenant, usage_date, line_item_type, account_id, region, service,
        instance_type, usage_amount, unit, unblended_cost, markup_cost,
        currency, source_uuid
    FROM cost_line_items
    WHERE tenant = ?
        AND line_item_type = ?
        AND usage_date >= ?
"#;

pub struct SqliteFactRepo {
    pool: SqlitePool,
}

impl SqliteFactRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn fact_from_row(row: &sqlx::sqlite::SqliteRow) -> DbResult<FactRow> {
        let usage_amount: String = row.get("usage_amount");
        let unblended_cost: String = row.get("unblended_cost");
        let markup_cost: String = row.get("markup_cost");
        let source_uuid: String = row.get("source_uuid");

        Ok(FactRow {
            tenant: row.get("tenant"),
            usage_date: row.try_get("usage_date")?,
            line_item_type: row.get("line_item_type"),
            account_id: row.get("account_id"),
            region: row.get("region"),
            service: row.get("service"),
            instance_type: row.get("instance_type"),
            usage_amount: parse_usage_amount(&usage_amount)?,
            unit: row.get("unit"),
            unblended_cost: parse_decimal("unblended_cost", &unblended_cost)?,
            markup_cost: parse_decimal("markup_cost", &markup_cost)?,
            currency: row.get("currency"),
            source_uuid: parse_source_uuid(&source_uuid)?,
        })
    }
}

#[async_trait]
impl FactRepo for SqliteFactRepo {
    fn scan<'a>(&'a self, scan: &'a FactScan) -> BoxStream<'a, DbResult<FactRow>> {
        sqlx::query(SCAN_SQL)
            .bind(&scan.tenant)
            .bind(&scan.line_item_type)
            .bind(scan.window_start)
            .fetch(&self.pool)
            .map(|row| row.map_err(DbError::from).and_then(|r| Self::fact_from_row(&r)))
            .boxed()
    }

    async fn list_tenants(&self) -> DbResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT tenant FROM cost_line_items ORDER BY tenant")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("tenant")).collect())
    }

    async fn insert_batch(&self, facts: Vec<FactRow>) -> DbResult<usize> {
        if facts.is_empty() {
            return Ok(0);
        }

        // SQLite has a limit of 999 parameters per query (SQLITE_LIMIT_VARIABLE_NUMBER).
        // Each fact uses 13 parameters.
        const MAX_FACTS_PER_BATCH: usize = 70;

        let mut total_inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in facts.chunks(MAX_FACTS_PER_BATCH) {
            let placeholders: Vec<&str> = chunk
                .iter()
                .map(|_| "(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
                .collect();

            let query = format!(
                r#"
                INSERT INTO cost_line_items (
                    tenant, usage_date, line_item_type, account_id, region, service,
                    instance_type, usage_amount, unit, unblended_cost, markup_cost,
                    currency, source_uuid
                )
                VALUES {}
                "#,
                placeholders.join(", ")
            );

            let mut query_builder = sqlx::query(&query);
            for fact in chunk {
                query_builder = query_builder
                    .bind(&fact.tenant)
                    .bind(fact.usage_date)
                    .bind(&fact.line_item_type)
                    .bind(&fact.account_id)
                    .bind(&fact.region)
                    .bind(&fact.service)
                    .bind(&fact.instance_type)
                    .bind(fact.usage_amount.to_string())
                    .bind(&fact.unit)
                    .bind(fact.unblended_cost.to_string())
                    .bind(fact.markup_cost.to_string())
                    .bind(&fact.currency)
                    .bind(fact.source_uuid.to_string());
            }

            let result = query_builder.execute(&mut *tx).await?;
            total_inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(total_inserted)
    }
}
