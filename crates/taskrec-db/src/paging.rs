use crate::{Dialect, Error, Result};
use taskrec_core::{Order, PageRequest, SortKey};

/// Builder for dialect-correct page queries.
///
/// All validation happens in [`build`](Self::build); the resulting
/// [`PagingQuery`] can render any page without failing. The tie-breaker
/// column (normally the primary key) is appended as a final sort key when
/// the configured keys alone do not uniquely order rows, so concatenating
/// consecutive pages reproduces the full ordered result exactly once per
/// row on every dialect.
#[derive(Debug, Clone)]
pub struct PagingQueryBuilder {
    dialect: Dialect,
    select: Option<String>,
    from: Option<String>,
    where_clause: Option<String>,
    sort_keys: Vec<SortKey>,
    tie_breaker: Option<String>,
}

impl PagingQueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            select: None,
            from: None,
            where_clause: None,
            sort_keys: Vec::new(),
            tie_breaker: None,
        }
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn filter(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = Some(where_clause.into());
        self
    }

    pub fn sort_key(mut self, column: impl Into<String>, order: Order) -> Self {
        self.sort_keys.push(SortKey {
            column: column.into(),
            order,
        });
        self
    }

    pub fn sort_keys(mut self, keys: &[SortKey]) -> Self {
        self.sort_keys.extend_from_slice(keys);
        self
    }

    /// Unique column appended as the last sort key unless already present.
    pub fn tie_breaker(mut self, column: impl Into<String>) -> Self {
        self.tie_breaker = Some(column.into());
        self
    }

    pub fn build(self) -> Result<PagingQuery> {
        let select = self
            .select
            .ok_or_else(|| Error::QueryBuild("select clause is not set".to_string()))?;
        let from = self
            .from
            .ok_or_else(|| Error::QueryBuild("from clause is not set".to_string()))?;

        if self.sort_keys.is_empty() {
            return Err(Error::QueryBuild("sort keys must not be empty".to_string()));
        }

        let mut sort_keys = self.sort_keys;
        if let Some(tie_breaker) = self.tie_breaker {
            let present = sort_keys
                .iter()
                .any(|key| key.column.eq_ignore_ascii_case(&tie_breaker));
            if !present {
                sort_keys.push(SortKey::asc(tie_breaker));
            }
        }

        Ok(PagingQuery {
            dialect: self.dialect,
            select,
            from,
            where_clause: self.where_clause,
            sort_keys,
        })
    }
}

/// A validated, immutable page-query template.
#[derive(Debug, Clone)]
pub struct PagingQuery {
    dialect: Dialect,
    select: String,
    from: String,
    where_clause: Option<String>,
    sort_keys: Vec<SortKey>,
}

impl PagingQuery {
    /// Render the query for one page. The result set is exactly the rows at
    /// offset `page.number * page.size`, bounded by `page.size`, in the
    /// configured total order.
    pub fn page_query(&self, page: &PageRequest) -> String {
        let offset = page.offset();
        let limit = u64::from(page.size);
        let end = offset + limit;
        let order_by = self.order_by_clause();
        let where_clause = match &self.where_clause {
            Some(clause) => format!(" WHERE {}", clause),
            None => String::new(),
        };

        match self.dialect {
            Dialect::Postgres
            | Dialect::MySql
            | Dialect::MariaDb
            | Dialect::Sqlite
            | Dialect::H2
            | Dialect::Generic => format!(
                "SELECT {} FROM {}{} ORDER BY {} LIMIT {} OFFSET {}",
                self.select, self.from, where_clause, order_by, limit, offset
            ),
            Dialect::Db2 => format!(
                "SELECT {} FROM {}{} ORDER BY {} OFFSET {} ROWS FETCH FIRST {} ROWS ONLY",
                self.select, self.from, where_clause, order_by, offset, limit
            ),
            Dialect::SqlServer => format!(
                "SELECT {} FROM (SELECT {}, ROW_NUMBER() OVER (ORDER BY {}) AS PAGE_ROW \
                 FROM {}{}) PAGED WHERE PAGE_ROW > {} AND PAGE_ROW <= {} ORDER BY PAGE_ROW",
                self.select, self.select, order_by, self.from, where_clause, offset, end
            ),
            Dialect::Oracle => format!(
                "SELECT {} FROM (SELECT PAGED.*, ROWNUM AS PAGE_ROW FROM \
                 (SELECT {} FROM {}{} ORDER BY {}) PAGED WHERE ROWNUM <= {}) WHERE PAGE_ROW > {}",
                self.select, self.select, self.from, where_clause, order_by, end, offset
            ),
        }
    }

    fn order_by_clause(&self) -> String {
        self.sort_keys
            .iter()
            .map(|key| {
                let direction = match key.order {
                    Order::Ascending => "ASC",
                    Order::Descending => "DESC",
                };
                format!("{} {}", key.column, direction)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
