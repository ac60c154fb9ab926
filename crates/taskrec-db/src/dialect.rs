use crate::{Error, Result};
use sqlx::AnyConnection;
use std::fmt;

/// Closed set of supported database products. Anything the store cannot
/// identify degrades to `Generic`, which uses standard LIMIT/OFFSET paging
/// and the emulated counter-table incrementer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    MariaDb,
    Sqlite,
    SqlServer,
    Oracle,
    Db2,
    H2,
    Generic,
}

impl Dialect {
    /// Map reported product-name metadata onto a dialect tag.
    ///
    /// Matching is case-insensitive. DB2 needs a prefix match because its
    /// metadata carries a platform suffix ("DB2/NT", "DB2/LINUXX8664"), and
    /// SQL Server reports as "Microsoft SQL Server".
    pub fn from_product_name(product_name: &str) -> Self {
        let name = product_name.trim().to_lowercase();

        if name.starts_with("db2") {
            return Dialect::Db2;
        }

        match name.as_str() {
            "postgresql" => Dialect::Postgres,
            "mysql" => Dialect::MySql,
            "mariadb" => Dialect::MariaDb,
            "sqlite" => Dialect::Sqlite,
            "microsoft sql server" | "sql server" => Dialect::SqlServer,
            "oracle" => Dialect::Oracle,
            "h2" => Dialect::H2,
            _ => Dialect::Generic,
        }
    }

    /// Positional bind placeholder for this dialect, 1-based.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", position),
            _ => "?".to_string(),
        }
    }

    /// Whether the product has native sequence objects the incrementer can
    /// delegate to.
    pub fn supports_sequences(&self) -> bool {
        matches!(
            self,
            Dialect::Postgres | Dialect::SqlServer | Dialect::Oracle | Dialect::Db2 | Dialect::H2
        )
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::MySql => "MySQL",
            Dialect::MariaDb => "MariaDB",
            Dialect::Sqlite => "SQLite",
            Dialect::SqlServer => "SQL Server",
            Dialect::Oracle => "Oracle",
            Dialect::Db2 => "DB2",
            Dialect::H2 => "H2",
            Dialect::Generic => "Generic",
        };
        write!(f, "{}", name)
    }
}

/// Identify the database product behind a live connection.
///
/// The driver's reported backend name covers most products; MySQL-protocol
/// servers additionally get a version probe because MariaDB is only visible
/// in the version string. A failing probe is a fatal detection error, an
/// unrecognized product is not.
pub async fn resolve_dialect(conn: &mut AnyConnection) -> Result<Dialect> {
    let backend = conn.backend_name().to_string();
    let dialect = Dialect::from_product_name(&backend);

    if dialect == Dialect::MySql {
        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&mut *conn)
            .await
            .map_err(Error::DialectDetection)?;

        if version.to_lowercase().contains("mariadb") {
            return Ok(Dialect::MariaDb);
        }
    }

    Ok(dialect)
}
