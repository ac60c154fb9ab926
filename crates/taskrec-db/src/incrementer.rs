use crate::{Dialect, Error, Result};
use sqlx::AnyPool;

/// Bound on optimistic counter-table updates before giving up.
const MAX_COUNTER_ATTEMPTS: u32 = 5;

/// How the next execution id is produced for a given dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementerStrategy {
    /// Delegate to a native database sequence object.
    NativeSequence,
    /// Insert into an auto-increment relation and read the generated value
    /// back on the same connection.
    Identity,
    /// Emulated sequence over a single-row counter table, claimed with a
    /// conditional update so concurrent callers never share a value.
    CounterTable,
}

/// Produces strictly increasing unique ids for new execution records.
///
/// The strategy is chosen once, when the factory resolves the incrementer,
/// and never re-probed per call.
#[derive(Debug, Clone)]
pub struct ExecutionIncrementer {
    dialect: Dialect,
    relation: String,
    strategy: IncrementerStrategy,
}

impl ExecutionIncrementer {
    /// Choose the strategy for a dialect against a live store.
    ///
    /// Sequence-capable dialects probe the catalog for a sequence named
    /// `relation`; if none is provisioned they fall back to a counter table
    /// of the same name, created and seeded here. MySQL-family and SQLite
    /// servers use their auto-increment primitive, everything else the
    /// counter table.
    pub async fn resolve(
        pool: &AnyPool,
        dialect: Dialect,
        relation: impl Into<String>,
    ) -> Result<Self> {
        let relation = relation.into();

        let strategy = if dialect.supports_sequences() {
            if sequence_exists(pool, dialect, &relation).await? {
                IncrementerStrategy::NativeSequence
            } else {
                ensure_counter_table(pool, dialect, &relation).await?;
                IncrementerStrategy::CounterTable
            }
        } else {
            match dialect {
                Dialect::Sqlite | Dialect::MySql | Dialect::MariaDb => {
                    ensure_identity_relation(pool, dialect, &relation).await?;
                    IncrementerStrategy::Identity
                }
                _ => {
                    ensure_counter_table(pool, dialect, &relation).await?;
                    IncrementerStrategy::CounterTable
                }
            }
        };

        tracing::debug!(
            "Generating execution ids from {} with {:?} strategy",
            relation,
            strategy
        );

        Ok(Self {
            dialect,
            relation,
            strategy,
        })
    }

    /// Construct with a fixed strategy, skipping the catalog probe.
    pub fn with_strategy(
        dialect: Dialect,
        relation: impl Into<String>,
        strategy: IncrementerStrategy,
    ) -> Self {
        Self {
            dialect,
            relation: relation.into(),
            strategy,
        }
    }

    pub fn strategy(&self) -> IncrementerStrategy {
        self.strategy
    }

    /// Claim the next unique id. One id is consumed per call, whether or
    /// not the caller keeps it.
    pub async fn next_id(&self, pool: &AnyPool) -> Result<i64> {
        match self.strategy {
            IncrementerStrategy::NativeSequence => self.next_from_sequence(pool).await,
            IncrementerStrategy::Identity => self.next_from_identity(pool).await,
            IncrementerStrategy::CounterTable => self.next_from_counter(pool).await,
        }
    }

    async fn next_from_sequence(&self, pool: &AnyPool) -> Result<i64> {
        let statement = sequence_statement(self.dialect, &self.relation).ok_or_else(|| {
            Error::Configuration(format!("{} has no native sequences", self.dialect))
        })?;

        let id: i64 = sqlx::query_scalar(&statement).fetch_one(pool).await?;
        Ok(id)
    }

    async fn next_from_identity(&self, pool: &AnyPool) -> Result<i64> {
        // Both identity paths read the generated value back, which only
        // works on the connection that wrote it.
        let mut conn = pool.acquire().await?;

        match self.dialect {
            Dialect::Sqlite => {
                let insert = format!("INSERT INTO {} DEFAULT VALUES", self.relation);
                sqlx::query(&insert).execute(&mut *conn).await?;

                let id: i64 = sqlx::query_scalar("SELECT last_insert_rowid()")
                    .fetch_one(&mut *conn)
                    .await?;

                let cleanup = format!("DELETE FROM {} WHERE ID < ?", self.relation);
                sqlx::query(&cleanup).bind(id).execute(&mut *conn).await?;

                Ok(id)
            }
            Dialect::MySql | Dialect::MariaDb => {
                let update = format!(
                    "UPDATE {} SET ID = LAST_INSERT_ID(ID + 1)",
                    self.relation
                );
                sqlx::query(&update).execute(&mut *conn).await?;

                let id: i64 = sqlx::query_scalar("SELECT LAST_INSERT_ID()")
                    .fetch_one(&mut *conn)
                    .await?;

                Ok(id)
            }
            _ => Err(Error::Configuration(format!(
                "{} has no identity id generation",
                self.dialect
            ))),
        }
    }

    async fn next_from_counter(&self, pool: &AnyPool) -> Result<i64> {
        let select = format!("SELECT ID FROM {}", self.relation);
        let update = format!(
            "UPDATE {} SET ID = {} WHERE ID = {}",
            self.relation,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );

        for _ in 0..MAX_COUNTER_ATTEMPTS {
            let current: i64 = sqlx::query_scalar(&select).fetch_one(pool).await?;
            let next = current + 1;

            let claimed = sqlx::query(&update)
                .bind(next)
                .bind(current)
                .execute(pool)
                .await?
                .rows_affected();

            // Exactly one caller wins each value; losers re-read and retry.
            if claimed == 1 {
                return Ok(next);
            }
        }

        Err(Error::Concurrency(MAX_COUNTER_ATTEMPTS))
    }
}

fn sequence_statement(dialect: Dialect, relation: &str) -> Option<String> {
    match dialect {
        Dialect::Postgres => Some(format!("SELECT nextval('{}')", relation)),
        Dialect::Oracle => Some(format!("SELECT {}.NEXTVAL FROM DUAL", relation)),
        Dialect::Db2 => Some(format!("VALUES NEXT VALUE FOR {}", relation)),
        Dialect::H2 | Dialect::SqlServer => Some(format!("SELECT NEXT VALUE FOR {}", relation)),
        _ => None,
    }
}

async fn sequence_exists(pool: &AnyPool, dialect: Dialect, relation: &str) -> Result<bool> {
    let ph = dialect.placeholder(1);
    let probe = match dialect {
        Dialect::Postgres => format!(
            "SELECT COUNT(*) FROM information_schema.sequences \
             WHERE LOWER(sequence_name) = LOWER({})",
            ph
        ),
        Dialect::H2 => format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.SEQUENCES \
             WHERE UPPER(SEQUENCE_NAME) = UPPER({})",
            ph
        ),
        Dialect::SqlServer => format!("SELECT COUNT(*) FROM sys.sequences WHERE name = {}", ph),
        Dialect::Oracle => format!(
            "SELECT COUNT(*) FROM all_sequences WHERE sequence_name = UPPER({})",
            ph
        ),
        Dialect::Db2 => format!(
            "SELECT COUNT(*) FROM syscat.sequences WHERE seqname = UPPER({})",
            ph
        ),
        _ => return Ok(false),
    };

    let count: i64 = sqlx::query_scalar(&probe)
        .bind(relation)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

async fn ensure_counter_table(pool: &AnyPool, dialect: Dialect, relation: &str) -> Result<()> {
    let create = format!("CREATE TABLE IF NOT EXISTS {} (ID BIGINT NOT NULL)", relation);
    sqlx::query(&create).execute(pool).await?;

    let seed = match dialect {
        Dialect::MySql | Dialect::MariaDb => format!(
            "INSERT INTO {} (ID) SELECT 0 FROM DUAL WHERE NOT EXISTS (SELECT ID FROM {})",
            relation, relation
        ),
        _ => format!(
            "INSERT INTO {} (ID) SELECT 0 WHERE NOT EXISTS (SELECT ID FROM {})",
            relation, relation
        ),
    };
    sqlx::query(&seed).execute(pool).await?;

    Ok(())
}

async fn ensure_identity_relation(pool: &AnyPool, dialect: Dialect, relation: &str) -> Result<()> {
    match dialect {
        Dialect::Sqlite => {
            let create = format!(
                "CREATE TABLE IF NOT EXISTS {} (ID INTEGER PRIMARY KEY AUTOINCREMENT)",
                relation
            );
            sqlx::query(&create).execute(pool).await?;
            Ok(())
        }
        Dialect::MySql | Dialect::MariaDb => ensure_counter_table(pool, dialect, relation).await,
        _ => Err(Error::Configuration(format!(
            "{} has no identity id generation",
            dialect
        ))),
    }
}
