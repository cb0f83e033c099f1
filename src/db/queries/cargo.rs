//! Cargo record queries

use std::collections::HashSet;

use anyhow::Result;
use sqlx::{PgPool, QueryBuilder, Row};

use crate::types::NewCargo;

/// Return the subset of `cargo_nos` that already exist in the cargos table.
///
/// Used by the row transformer to report duplicates as row-level validation
/// failures instead of letting them die at the unique index.
pub async fn existing_cargo_numbers(
    pool: &PgPool,
    cargo_nos: &[String],
) -> Result<HashSet<String>> {
    if cargo_nos.is_empty() {
        return Ok(HashSet::new());
    }

    let rows = sqlx::query("SELECT cargo_no FROM cargos WHERE cargo_no = ANY($1)")
        .bind(cargo_nos)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.get::<String, _>("cargo_no")).collect())
}

/// Insert one chunk of validated drafts as a single grouped statement.
///
/// The unique index on cargo_no stays the final arbiter: a concurrent import
/// racing on the same number makes the row a silent conflict here, and the
/// returned set lets the engine report it as a row failure. Returns the
/// cargo numbers actually inserted.
pub async fn insert_chunk(
    pool: &PgPool,
    batch_id: i64,
    drafts: &[NewCargo],
) -> Result<HashSet<String>> {
    if drafts.is_empty() {
        return Ok(HashSet::new());
    }

    let mut builder = QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO cargos (cargo_no, cargo_type, cargo_size, weight, remarks, \
         wharfage, penalty_days, storage, electricity, destuffing, lifting, import_batch_id) ",
    );
    builder.push_values(drafts, |mut b, draft| {
        b.push_bind(&draft.cargo_no)
            .push_bind(&draft.cargo_type)
            .push_bind(draft.cargo_size)
            .push_bind(draft.weight)
            .push_bind(&draft.remarks)
            .push_bind(draft.wharfage)
            .push_bind(draft.penalty_days)
            .push_bind(draft.storage)
            .push_bind(draft.electricity)
            .push_bind(draft.destuffing)
            .push_bind(draft.lifting)
            .push_bind(batch_id);
    });
    builder.push(" ON CONFLICT (cargo_no) DO NOTHING RETURNING cargo_no");

    let rows = builder.build().fetch_all(pool).await?;

    Ok(rows.into_iter().map(|r| r.get::<String, _>("cargo_no")).collect())
}
