//! Pure text normalization for scraped records. Every function here is total:
//! malformed input produces a fallback value, never an error.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{
    MenuCandidate, MenuItemSnapshot, MenuPrice, ReviewCandidate, ReviewSnapshot, StoreCandidate,
    StoreItemSnapshot,
};

/// Prices at or above this are treated as placeholders.
pub const PRICE_CEILING: u64 = 200_000;
/// Menu items considered when averaging a store's price.
pub const AVERAGE_WINDOW: usize = 3;

const WEEKDAYS: [&str; 7] = [
    "월요일", "화요일", "수요일", "목요일", "금요일", "토요일", "일요일",
];

/// Collapses runs of whitespace (newlines included) into one space and trims.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(normalize_whitespace).filter(|value| !value.is_empty())
}

/// First run of digits, or 1.
pub fn parse_visit_count(text: &str) -> i64 {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("valid regex"));
    digits
        .find(text)
        .and_then(|run| run.as_str().parse::<i64>().ok())
        .unwrap_or(1)
}

/// `"2025년 3월 7일 금요일"` becomes `"2025-03-07"`. Input that does not split
/// into three numeric parts is returned unchanged.
pub fn parse_review_date(text: &str) -> String {
    let mut working = text.to_string();
    for weekday in WEEKDAYS {
        working = working.replace(weekday, "");
    }
    let working: String = working
        .replace('년', "-")
        .replace('월', "-")
        .replace('일', "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let parts: Vec<&str> = working.split('-').collect();
    if parts.len() != 3 {
        return text.to_string();
    }
    let numeric = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    if !parts.iter().all(|part| numeric(part)) {
        return text.to_string();
    }
    format!("{}-{:0>2}-{:0>2}", parts[0], parts[1], parts[2])
}

/// Strips `원` and thousands separators. Non-numeric remainders and values at
/// or above [`PRICE_CEILING`] are `Variable`.
pub fn parse_menu_price(text: &str) -> MenuPrice {
    let digits: String = text
        .chars()
        .filter(|c| *c != '원' && *c != ',' && !c.is_whitespace())
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return MenuPrice::Variable;
    }
    match digits.parse::<u64>() {
        Ok(value) if value < PRICE_CEILING => MenuPrice::Amount(value),
        _ => MenuPrice::Variable,
    }
}

/// Mean of the numeric prices, floored to the nearest 1,000.
pub fn average_price<'a, I>(prices: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a MenuPrice>,
{
    let amounts: Vec<u64> = prices.into_iter().filter_map(MenuPrice::amount).collect();
    if amounts.is_empty() {
        return None;
    }
    let mean = amounts.iter().sum::<u64>() / amounts.len() as u64;
    Some(mean / 1000 * 1000)
}

pub fn extract_store_candidate(
    snapshot: &StoreItemSnapshot,
    location: &str,
) -> Option<StoreCandidate> {
    let name = non_empty(snapshot.name.as_deref())?;
    Some(StoreCandidate {
        name,
        category: non_empty(snapshot.category.as_deref()),
        location: location.to_string(),
    })
}

pub fn extract_menu_candidate(snapshot: &MenuItemSnapshot) -> Option<MenuCandidate> {
    let name = non_empty(snapshot.name.as_deref())?;
    Some(MenuCandidate {
        name,
        price: non_empty(snapshot.price.as_deref()),
    })
}

/// Reviews without text are dropped. Missing visit/date/writer fields fall
/// back to `1`, empty text and empty text respectively.
pub fn extract_review_candidate(snapshot: &ReviewSnapshot) -> Option<ReviewCandidate> {
    let content = non_empty(snapshot.content.as_deref())?;
    let visit_count = snapshot
        .visit
        .as_deref()
        .map(parse_visit_count)
        .unwrap_or(1);
    let date = snapshot
        .date
        .as_deref()
        .map(|raw| parse_review_date(raw.trim()))
        .unwrap_or_default();
    let writer = non_empty(snapshot.writer.as_deref()).unwrap_or_default();
    Some(ReviewCandidate {
        content,
        visit_count,
        date,
        writer,
    })
}
