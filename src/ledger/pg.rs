//! PostgreSQL-wire account store (CockroachDB)
//!
//! Store errors are returned unmodified inside [`LedgerError::Database`], so
//! serialization failures (SQLSTATE 40001) reach the retry classifier intact.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::LedgerError;
use super::money::Money;
use super::store::{AccountStore, LedgerTx};
use super::types::{
    Account, AccountSummary, AccountType, TransactionItem, TransactionRecord,
};

// ============================================================
// SCHEMA
// ============================================================

const CREATE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS account (
        id             UUID         NOT NULL DEFAULT gen_random_uuid(),
        region         VARCHAR(32)  NOT NULL,
        balance        DECIMAL(19,2) NOT NULL,
        currency       VARCHAR(3)   NOT NULL,
        name           VARCHAR(128) NOT NULL,
        description    VARCHAR(256),
        account_type   VARCHAR(16)  NOT NULL,
        closed         BOOLEAN      NOT NULL DEFAULT false,
        allow_negative BOOLEAN      NOT NULL DEFAULT false,
        inserted_at    TIMESTAMPTZ  NOT NULL DEFAULT clock_timestamp(),
        updated_at     TIMESTAMPTZ,
        PRIMARY KEY (id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS account_region_idx ON account (region)",
    r#"
    CREATE TABLE IF NOT EXISTS transaction (
        id               UUID        NOT NULL,
        region           VARCHAR(32) NOT NULL,
        booking_date     DATE        NOT NULL,
        transfer_date    DATE        NOT NULL,
        transaction_type VARCHAR(16) NOT NULL,
        PRIMARY KEY (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transaction_item (
        transaction_id  UUID          NOT NULL REFERENCES transaction (id),
        account_id      UUID          NOT NULL REFERENCES account (id),
        region          VARCHAR(32)   NOT NULL,
        amount          DECIMAL(19,2) NOT NULL,
        currency        VARCHAR(3)    NOT NULL,
        note            VARCHAR(128),
        running_balance DECIMAL(19,2) NOT NULL,
        PRIMARY KEY (transaction_id, account_id)
    )
    "#,
];

const DROP_SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS transaction_item",
    "DROP TABLE IF EXISTS transaction",
    "DROP TABLE IF EXISTS account",
];

/// Create the ledger tables if missing
pub async fn create_schema(pool: &PgPool) -> Result<(), LedgerError> {
    for ddl in CREATE_SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }
    info!("Ledger schema created");
    Ok(())
}

/// Drop the ledger tables and all their data
pub async fn drop_schema(pool: &PgPool) -> Result<(), LedgerError> {
    for ddl in DROP_SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }
    info!("Ledger schema dropped");
    Ok(())
}

// ============================================================
// STORE
// ============================================================

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, LedgerError> {
    let account_type: String = row.try_get("account_type")?;
    Ok(Account {
        id: row.try_get("id")?,
        region: row.try_get("region")?,
        balance: Money::new(row.try_get("balance")?, row.try_get::<String, _>("currency")?),
        name: row.try_get("name")?,
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        account_type: account_type.parse::<AccountType>()?,
        allow_negative: row.try_get("allow_negative")?,
        closed: row.try_get("closed")?,
        inserted_at: row.try_get("inserted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn money_from_row(row: &PgRow) -> Result<Money, LedgerError> {
    Ok(Money::new(
        row.try_get::<Decimal, _>("balance")?,
        row.try_get::<String, _>("currency")?,
    ))
}

#[async_trait]
impl AccountStore for PgAccountStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn create_accounts(
        &self,
        region: &str,
        initial_balance: &Money,
        count: u64,
        batch_size: usize,
    ) -> Result<u64, LedgerError> {
        let batch_size = batch_size.max(1) as u64;
        let mut created = 0u64;

        while created < count {
            let batch = batch_size.min(count - created);
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO account (id, region, balance, currency, name, description, account_type, closed, allow_negative) ",
            );
            builder.push_values(0..batch, |mut b, i| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(region)
                    .push_bind(initial_balance.amount)
                    .push_bind(initial_balance.currency.as_str())
                    .push_bind(format!("user:{}", created + i + 1))
                    .push_bind("workload account")
                    .push_bind(AccountType::Asset.code())
                    .push_bind(false)
                    .push_bind(false);
            });
            builder.build().execute(&self.pool).await?;

            created += batch;
            debug!(region = %region, created, total = count, "Account batch inserted");
        }
        Ok(created)
    }

    async fn find_accounts_by_region(
        &self,
        region: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Account>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM account WHERE region = $1 OFFSET $2 LIMIT $3")
            .bind(region)
            .bind(offset as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn get_balance(&self, id: Uuid) -> Result<Money, LedgerError> {
        let row = sqlx::query("SELECT balance, currency FROM account WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NoSuchAccount(id))?;
        money_from_row(&row)
    }

    async fn get_balance_snapshot(&self, id: Uuid) -> Result<Money, LedgerError> {
        let row = sqlx::query(
            "SELECT balance, currency FROM account AS OF SYSTEM TIME follower_read_timestamp() WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NoSuchAccount(id))?;
        money_from_row(&row)
    }

    async fn get_currencies(&self) -> Result<Vec<String>, LedgerError> {
        let currencies =
            sqlx::query_scalar("SELECT DISTINCT currency FROM account ORDER BY currency")
                .fetch_all(&self.pool)
                .await?;
        Ok(currencies)
    }

    async fn get_total_balance(&self, currency: &str) -> Result<Money, LedgerError> {
        let total: Option<Decimal> =
            sqlx::query_scalar("SELECT sum(balance) FROM account WHERE currency = $1")
                .bind(currency)
                .fetch_one(&self.pool)
                .await?;
        Ok(Money::new(total.unwrap_or_default(), currency))
    }

    async fn account_summary(&self, region: &str) -> Result<AccountSummary, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT count(a.id)   AS tot_accounts,
                   sum(a.balance) AS tot_balance,
                   min(a.balance) AS min_balance,
                   max(a.balance) AS max_balance,
                   avg(a.balance) AS avg_balance
            FROM account a
            WHERE a.region = $1
            "#,
        )
        .bind(region)
        .fetch_one(&self.pool)
        .await?;

        let dec = |col: &str| -> Result<Decimal, LedgerError> {
            Ok(row.try_get::<Option<Decimal>, _>(col)?.unwrap_or_default())
        };
        Ok(AccountSummary {
            region: region.to_string(),
            number_of_accounts: row.try_get("tot_accounts")?,
            total_balance: dec("tot_balance")?,
            min_balance: dec("min_balance")?,
            max_balance: dec("max_balance")?,
            avg_balance: dec("avg_balance")?,
        })
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, LedgerError> {
        let Some(header) = sqlx::query(
            "SELECT id, region, booking_date, transfer_date, transaction_type FROM transaction WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT account_id, region, amount, currency, note, running_balance
            FROM transaction_item
            WHERE transaction_id = $1
            ORDER BY account_id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let currency: String = row.try_get("currency")?;
            items.push(TransactionItem {
                account_id: row.try_get("account_id")?,
                region: row.try_get("region")?,
                amount: Money::new(row.try_get("amount")?, currency.clone()),
                running_balance_before: Money::new(row.try_get("running_balance")?, currency),
                note: row.try_get::<Option<String>, _>("note")?.unwrap_or_default(),
            });
        }

        Ok(Some(TransactionRecord {
            id: header.try_get("id")?,
            region: header.try_get("region")?,
            transaction_type: header.try_get("transaction_type")?,
            booking_date: header.try_get("booking_date")?,
            transfer_date: header.try_get("transfer_date")?,
            items,
        }))
    }

    async fn regions(&self) -> Result<Vec<String>, LedgerError> {
        // Multi-region clusters report their regions; otherwise fall back to
        // the regions accounts were created in.
        match sqlx::query_scalar::<_, String>("SELECT region FROM [SHOW REGIONS]")
            .fetch_all(&self.pool)
            .await
        {
            Ok(regions) if !regions.is_empty() => return Ok(regions),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "SHOW REGIONS unavailable"),
        }

        let regions = sqlx::query_scalar("SELECT DISTINCT region FROM account ORDER BY region")
            .fetch_all(&self.pool)
            .await?;
        Ok(regions)
    }

    async fn gateway_region(&self) -> Result<Option<String>, LedgerError> {
        match sqlx::query_scalar::<_, String>("SELECT gateway_region()")
            .fetch_one(&self.pool)
            .await
        {
            Ok(region) => Ok(Some(region)),
            Err(e) => {
                debug!(error = %e, "gateway_region() unavailable");
                Ok(None)
            }
        }
    }
}

// ============================================================
// TRANSACTION
// ============================================================

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_for_update(&mut self, ids: &[Uuid]) -> Result<Vec<Account>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM account WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(ids.to_vec())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn apply_balance_updates(&mut self, accounts: &[Account]) -> Result<(), LedgerError> {
        for account in accounts {
            let result = sqlx::query(
                r#"
                UPDATE account
                SET balance = $1, updated_at = clock_timestamp()
                WHERE id = $2
                  AND closed = false
                  AND currency = $3
                  AND (allow_negative OR $1 >= 0)
                "#,
            )
            .bind(account.balance.amount)
            .bind(account.id)
            .bind(account.balance.currency.as_str())
            .execute(&mut *self.tx)
            .await?;

            if result.rows_affected() != 1 {
                return Err(LedgerError::IncorrectResultSize {
                    expected: 1,
                    actual: result.rows_affected(),
                });
            }
        }
        Ok(())
    }

    async fn append_transaction(&mut self, record: &TransactionRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO transaction (id, region, booking_date, transfer_date, transaction_type)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.region.as_str())
        .bind(record.booking_date)
        .bind(record.transfer_date)
        .bind(record.transaction_type.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::on_insert(e, record.id))?;

        if record.items.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO transaction_item (transaction_id, account_id, region, amount, currency, note, running_balance) ",
        );
        builder.push_values(&record.items, |mut b, item| {
            b.push_bind(record.id)
                .push_bind(item.account_id)
                .push_bind(item.region.as_str())
                .push_bind(item.amount.amount)
                .push_bind(item.amount.currency.as_str())
                .push_bind(item.note.as_str())
                .push_bind(item.running_balance_before.amount);
        });
        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
