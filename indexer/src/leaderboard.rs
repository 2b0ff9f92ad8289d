//! Holder-total and leaderboard aggregation (SPEC_FULL §3 addition), grounded in the `UNION
//! ALL` + window-function leaderboard query pattern from the system this was distilled from.
//! A consumer of indexed data, not part of the hard core.

use crate::byte_array::Address20;
use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub position: i64,
    pub holder: Address20,
    pub locked_amount: BigDecimal,
    pub unlocked_amount: BigDecimal,
    pub withdrawn_amount: BigDecimal,
}

/// `lockedAmount = Σ lock.amount − Σ unlock.amount`, `unlockedAmount = Σ unlock.amount`,
/// `withdrawnAmount = Σ withdrawn.amount`, preserved exactly per the design notes.
const TOTALS_CTE: &str = r#"
totals as (
    select
        holder,
        coalesce(sum(locked), 0)    as locked,
        coalesce(sum(unlocked), 0)  as unlocked,
        coalesce(sum(withdrawn), 0) as withdrawn
    from (
        select holder, amount as locked, 0::numeric as unlocked, 0::numeric as withdrawn
        from lock_event
        union all
        select holder, 0::numeric, amount, 0::numeric
        from unlock_event
        union all
        select holder, 0::numeric, 0::numeric, amount
        from withdrawn_event
    ) per_event
    group by holder
)
"#;

/// Global leaderboard: position assigned by `ROW_NUMBER() OVER (...)` over descending
/// `lockedAmount`, ties broken by the engine's stable order (here, `holder` ascending).
pub async fn leaderboard(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<LeaderboardRow>> {
    let sql = format!(
        "with {TOTALS_CTE} \
         select \
           row_number() over (order by (locked - unlocked) desc, holder asc) as position, \
           holder, (locked - unlocked) as locked_amount, unlocked as unlocked_amount, withdrawn as withdrawn_amount \
         from totals \
         order by locked_amount desc, holder asc \
         limit $1 offset $2"
    );

    let rows: Vec<(i64, Address20, BigDecimal, BigDecimal, BigDecimal)> = sqlx::query_as(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("query leaderboard")?;

    Ok(rows
        .into_iter()
        .map(
            |(position, holder, locked, unlocked, withdrawn)| LeaderboardRow {
                position,
                holder,
                locked_amount: locked,
                unlocked_amount: unlocked,
                withdrawn_amount: withdrawn,
            },
        )
        .collect())
}

/// Same totals, filtered to a single holder (no ranking, since the caller already knows who).
pub async fn holder_totals(pool: &PgPool, holder: Address20) -> Result<Option<LeaderboardRow>> {
    let sql = format!(
        "with {TOTALS_CTE} \
         select (locked - unlocked) as locked_amount, unlocked as unlocked_amount, withdrawn as withdrawn_amount \
         from totals where holder = $1"
    );

    let row: Option<(BigDecimal, BigDecimal, BigDecimal)> = sqlx::query_as(&sql)
        .bind(holder)
        .fetch_optional(pool)
        .await
        .context("query holder totals")?;

    Ok(row.map(|(locked, unlocked, withdrawn)| LeaderboardRow {
        position: 0,
        holder,
        locked_amount: locked,
        unlocked_amount: unlocked,
        withdrawn_amount: withdrawn,
    }))
}
