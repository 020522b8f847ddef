//! Common types used across the service

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Largest page a list operation will return
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Round a monetary amount to two decimals (half away from zero)
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Ratio of two counts rounded to four decimals; zero when `denominator` is zero
pub fn ratio(numerator: i64, denominator: i64) -> Decimal {
    if denominator == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(numerator) / Decimal::from(denominator))
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// GPS coordinates attached to a tracking event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoCoordinates {
    pub latitude: Decimal,
    pub longitude: Decimal,
}

impl GeoCoordinates {
    pub fn new(latitude: Decimal, longitude: Decimal) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build coordinates from optional parts; both or neither must be present
    pub fn from_parts(
        latitude: Option<Decimal>,
        longitude: Option<Decimal>,
    ) -> Result<Option<Self>, DomainError> {
        match (latitude, longitude) {
            (None, None) => Ok(None),
            (Some(lat), Some(lng)) => {
                let coords = Self::new(lat, lng);
                coords.validate()?;
                Ok(Some(coords))
            }
            _ => Err(DomainError::invalid(
                "latitude",
                "Latitude and longitude must be provided together",
            )),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.latitude < Decimal::from(-90) || self.latitude > Decimal::from(90) {
            return Err(DomainError::invalid("latitude", "Latitude must be between -90 and 90"));
        }
        if self.longitude < Decimal::from(-180) || self.longitude > Decimal::from(180) {
            return Err(DomainError::invalid(
                "longitude",
                "Longitude must be between -180 and 180",
            ));
        }
        Ok(())
    }
}

/// Raw pagination parameters as received from a caller
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageRequest {
    /// Clamp to a valid page (>= 1) and limit (1..=MAX_PAGE_SIZE)
    pub fn normalize(&self) -> Pagination {
        self.normalize_with_default(DEFAULT_PAGE_SIZE)
    }

    pub fn normalize_with_default(&self, default_limit: u32) -> Pagination {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .limit
            .unwrap_or(default_limit)
            .clamp(1, MAX_PAGE_SIZE);
        Pagination { page, per_page }
    }
}

/// Normalized pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, pagination: Pagination, total_items: u64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(pagination, total_items),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: Pagination, total_items: u64) -> Self {
        let per_page = u64::from(pagination.per_page.max(1));
        let total_pages = total_items.div_ceil(per_page);
        Self {
            page: pagination.page,
            per_page: pagination.per_page,
            total_items,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
        }
    }
}

/// Inclusive date range for queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range from optional bounds, rejecting inverted ranges
    pub fn from_bounds(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Self>, DomainError> {
        let range = match (start, end) {
            (None, None) => return Ok(None),
            (Some(start), Some(end)) => Self { start, end },
            (Some(start), None) => Self {
                start,
                end: NaiveDate::MAX,
            },
            (None, Some(end)) => Self {
                start: NaiveDate::MIN,
                end,
            },
        };
        if range.start > range.end {
            return Err(DomainError::invalid(
                "start_date",
                "Start date must not be after end date",
            ));
        }
        Ok(Some(range))
    }
}

/// Sort direction for list queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(Decimal::from_str("1.005").unwrap()), Decimal::from_str("1.01").unwrap());
        assert_eq!(round_money(Decimal::from_str("-1.005").unwrap()), Decimal::from_str("-1.01").unwrap());
        assert_eq!(round_money(Decimal::from_str("1.004").unwrap()), Decimal::from_str("1.00").unwrap());
    }

    #[test]
    fn test_ratio_zero_denominator() {
        assert_eq!(ratio(5, 0), Decimal::ZERO);
        assert_eq!(ratio(1, 3), Decimal::from_str("0.3333").unwrap());
    }

    #[test]
    fn test_page_request_clamps_limit() {
        let pagination = PageRequest { page: Some(0), limit: Some(500) }.normalize();
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.per_page, MAX_PAGE_SIZE);
        assert_eq!(pagination.offset(), 0);

        let pagination = PageRequest { page: Some(3), limit: Some(10) }.normalize();
        assert_eq!(pagination.offset(), 20);
    }

    #[test]
    fn test_pagination_meta_total_pages() {
        let meta = PaginationMeta::new(Pagination { page: 1, per_page: 20 }, 41);
        assert_eq!(meta.total_pages, 3);
        let meta = PaginationMeta::new(Pagination { page: 1, per_page: 20 }, 0);
        assert_eq!(meta.total_pages, 0);
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert!(DateRange::from_bounds(Some(start), Some(end)).is_err());
        assert!(DateRange::from_bounds(None, None).unwrap().is_none());

        let open = DateRange::from_bounds(Some(end), None).unwrap().unwrap();
        assert_eq!(open.start, end);
        assert_eq!(open.end, NaiveDate::MAX);
    }

    #[test]
    fn test_coordinates_require_both_parts() {
        assert!(GeoCoordinates::from_parts(Some(Decimal::from(10)), None).is_err());
        assert!(GeoCoordinates::from_parts(Some(Decimal::from(95)), Some(Decimal::ZERO)).is_err());
        assert!(GeoCoordinates::from_parts(Some(Decimal::from(13)), Some(Decimal::from(100)))
            .unwrap()
            .is_some());
    }
}
