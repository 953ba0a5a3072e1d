use std::fmt;

use rusqlite::Row;
use serde::Serialize;

/// A store list entry, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCandidate {
    pub name: String,
    pub category: Option<String>,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuCandidate {
    pub name: String,
    /// Raw price text as rendered, e.g. `"8,000원"` or `"변동"`.
    pub price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewCandidate {
    pub content: String,
    pub visit_count: i64,
    /// `YYYY-MM-DD`, or the original text when it could not be normalized.
    pub date: String,
    pub writer: String,
}

/// Texts read from one store list item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreItemSnapshot {
    pub name: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuItemSnapshot {
    pub name: Option<String>,
    pub price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSnapshot {
    pub content: Option<String>,
    pub visit: Option<String>,
    pub date: Option<String>,
    pub writer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuPrice {
    Amount(u64),
    Variable,
}

impl MenuPrice {
    pub fn amount(&self) -> Option<u64> {
        match self {
            MenuPrice::Amount(value) => Some(*value),
            MenuPrice::Variable => None,
        }
    }
}

impl fmt::Display for MenuPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MenuPrice::Amount(value) => write!(f, "{value}"),
            MenuPrice::Variable => f.write_str("변동"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRecord {
    pub idx: i64,
    pub name: String,
    pub category: Option<String>,
    pub location: String,
    pub address: Option<String>,
    pub image: Option<String>,
}

impl StoreRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            idx: row.get("s_idx")?,
            name: row.get("s_name")?,
            category: row.get("s_categ")?,
            location: row.get("s_location")?,
            address: row.get("s_address")?,
            image: row.get("s_img")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreDetails {
    pub address: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuLine {
    pub name: String,
    pub price: MenuPrice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuSummary {
    pub store: String,
    pub location: String,
    pub items: Vec<MenuLine>,
    /// Average over the leading items with a numeric price, floored to 1,000.
    pub average_price: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocationCounts {
    pub location: String,
    pub stores: i64,
    pub enriched: i64,
    pub menus: i64,
    pub reviews: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub stores: i64,
    pub menus: i64,
    pub reviews: i64,
    pub emotions: i64,
    pub per_location: Vec<LocationCounts>,
}
