use crate::{Dialect, Result};
use sqlx::AnyPool;

/// DDL for the execution tables, one script per dialect, in execution
/// order. Timestamps are fixed-width RFC 3339 UTC text so that column
/// order matches chronological order everywhere.
pub fn creation_statements(dialect: Dialect, table_prefix: &str) -> Vec<String> {
    let execution = format!("{}EXECUTION", table_prefix);
    let args = format!("{}EXECUTION_ARGS", table_prefix);
    let seq = format!("{}SEQ", table_prefix);

    let mut statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             EXECUTION_ID BIGINT NOT NULL PRIMARY KEY, \
             TASK_NAME VARCHAR(100) NOT NULL, \
             START_TIME VARCHAR(35) NOT NULL, \
             END_TIME VARCHAR(35), \
             EXIT_CODE BIGINT, \
             EXIT_MESSAGE VARCHAR(2500), \
             ERROR_MESSAGE VARCHAR(2500), \
             EXTERNAL_EXECUTION_ID VARCHAR(255), \
             PARENT_EXECUTION_ID BIGINT)",
            execution
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             EXECUTION_ID BIGINT NOT NULL, \
             ARG_ORDER BIGINT NOT NULL, \
             ARG_VALUE VARCHAR(2500) NOT NULL, \
             FOREIGN KEY (EXECUTION_ID) REFERENCES {} (EXECUTION_ID))",
            args, execution
        ),
    ];

    // MySQL has no CREATE INDEX IF NOT EXISTS; everything else does.
    let index_guard = match dialect {
        Dialect::MySql => "",
        _ => "IF NOT EXISTS ",
    };
    statements.push(format!(
        "CREATE INDEX {}IDX_{}EXECUTION_TASK_NAME ON {} (TASK_NAME)",
        index_guard, table_prefix, execution
    ));
    statements.push(format!(
        "CREATE INDEX {}IDX_{}EXECUTION_START_TIME ON {} (START_TIME)",
        index_guard, table_prefix, execution
    ));

    match dialect {
        Dialect::Postgres | Dialect::H2 => {
            statements.push(format!("CREATE SEQUENCE IF NOT EXISTS {}", seq));
        }
        Dialect::SqlServer | Dialect::Oracle | Dialect::Db2 => {
            statements.push(format!("CREATE SEQUENCE {}", seq));
        }
        Dialect::Sqlite => {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {} (ID INTEGER PRIMARY KEY AUTOINCREMENT)",
                seq
            ));
        }
        Dialect::MySql | Dialect::MariaDb => {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {} (ID BIGINT NOT NULL)",
                seq
            ));
            statements.push(format!(
                "INSERT INTO {} (ID) SELECT 0 FROM DUAL \
                 WHERE NOT EXISTS (SELECT ID FROM {})",
                seq, seq
            ));
        }
        Dialect::Generic => {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {} (ID BIGINT NOT NULL)",
                seq
            ));
            statements.push(format!(
                "INSERT INTO {} (ID) SELECT 0 WHERE NOT EXISTS (SELECT ID FROM {})",
                seq, seq
            ));
        }
    }

    statements
}

/// Create the execution tables and the id-generation relation if they do
/// not exist yet.
pub async fn initialize(pool: &AnyPool, dialect: Dialect, table_prefix: &str) -> Result<()> {
    for statement in creation_statements(dialect, table_prefix) {
        sqlx::query(&statement).execute(pool).await?;
    }

    tracing::debug!("Initialized {} schema for prefix {}", dialect, table_prefix);

    Ok(())
}
