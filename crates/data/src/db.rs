use chrono::{DateTime, Utc};
use sqlx::PgPool;
use syncbot_core::{Order, Trade};

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Time of the newest stored trade for (exchange, symbol).
pub async fn last_trade_time(
    pool: &PgPool,
    exchange: &str,
    symbol: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT MAX(traded_at) FROM trades WHERE exchange = $1 AND symbol = $2",
    )
    .bind(exchange)
    .bind(symbol)
    .fetch_one(pool)
    .await
}

/// Creation time of the newest stored order for (exchange, symbol).
pub async fn last_order_time(
    pool: &PgPool,
    exchange: &str,
    symbol: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT MAX(created_at) FROM orders WHERE exchange = $1 AND symbol = $2",
    )
    .bind(exchange)
    .bind(symbol)
    .fetch_one(pool)
    .await
}

/// Insert trades, skipping ones already stored. Returns the number of new rows.
pub async fn insert_trades(pool: &PgPool, trades: &[Trade]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut count = 0u64;
    for trade in trades {
        let result = sqlx::query(
            "INSERT INTO trades (exchange, trade_id, symbol, side, price, quantity,
                                 fee, fee_currency, is_maker, order_id, traded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (exchange, trade_id) DO NOTHING",
        )
        .bind(&trade.exchange)
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.fee)
        .bind(&trade.fee_currency)
        .bind(trade.is_maker)
        .bind(&trade.order_id)
        .bind(trade.traded_at)
        .execute(&mut *tx)
        .await?;
        count += result.rows_affected();
    }
    tx.commit().await?;
    Ok(count)
}

/// Insert orders, refreshing status and fill progress of ones already stored.
pub async fn upsert_orders(pool: &PgPool, orders: &[Order]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut count = 0u64;
    for order in orders {
        let result = sqlx::query(
            "INSERT INTO orders (exchange, order_id, client_order_id, symbol, side, order_type,
                                 price, quantity, executed_quantity, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (exchange, order_id) DO UPDATE
             SET executed_quantity = EXCLUDED.executed_quantity,
                 status = EXCLUDED.status,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&order.exchange)
        .bind(&order.order_id)
        .bind(&order.client_order_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.executed_quantity)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;
        count += result.rows_affected();
    }
    tx.commit().await?;
    Ok(count)
}
