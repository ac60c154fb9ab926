use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Ascending,
    Descending,
}

/// One sort column with its direction. Sort keys are applied in the order
/// they were configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub order: Order,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: Order::Ascending,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: Order::Descending,
        }
    }
}

/// A zero-based page request. Page size must be positive; repositories
/// reject a zero size before touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub number: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn of(number: u32, size: u32) -> Self {
        Self { number, size }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number) * u64::from(self.size)
    }
}

/// One bounded slice of an ordered result set, plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u32,
    pub size: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: i64) -> Self {
        Self {
            items,
            number: request.number,
            size: request.size,
            total,
        }
    }

    pub fn total_pages(&self) -> i64 {
        if self.size == 0 {
            0
        } else {
            (self.total + i64::from(self.size) - 1) / i64::from(self.size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
