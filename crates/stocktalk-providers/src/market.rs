//! Market data provider interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocktalk_core::Result;

/// Lookback window for a time series request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesRange {
    Week,
    #[default]
    Month,
    Quarter,
    HalfYear,
    Year,
}

impl SeriesRange {
    /// Conventional range token understood by market data APIs
    pub fn as_str(self) -> &'static str {
        match self {
            SeriesRange::Week => "5d",
            SeriesRange::Month => "1mo",
            SeriesRange::Quarter => "3mo",
            SeriesRange::HalfYear => "6mo",
            SeriesRange::Year => "1y",
        }
    }
}

impl std::fmt::Display for SeriesRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub at: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Price history for one subject, oldest candle first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub subject: String,
    pub range: SeriesRange,
    pub candles: Vec<Candle>,
}

impl TimeSeries {
    /// Close of the most recent candle
    pub fn latest_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    /// Percentage change from the first to the last close
    pub fn change_percent(&self) -> Option<f64> {
        let first = self.candles.first()?.close;
        let last = self.candles.last()?.close;
        if first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }

    /// Highest high across the window
    pub fn high(&self) -> Option<f64> {
        self.candles.iter().map(|c| c.high).reduce(f64::max)
    }

    /// Lowest low across the window
    pub fn low(&self) -> Option<f64> {
        self.candles.iter().map(|c| c.low).reduce(f64::min)
    }
}

/// Source of price history for stock subjects
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the price series for a subject over the given range
    async fn fetch_series(&self, subject: &str, range: SeriesRange) -> Result<TimeSeries>;

    /// Provider name, for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(closes: &[f64]) -> TimeSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                at: Utc::now() - chrono::Duration::days((closes.len() - i) as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000,
            })
            .collect();
        TimeSeries {
            subject: "2330".to_string(),
            range: SeriesRange::Month,
            candles,
        }
    }

    #[test]
    fn test_series_summaries() {
        let s = series(&[100.0, 104.0, 110.0]);

        assert_eq!(s.latest_close(), Some(110.0));
        assert_eq!(s.change_percent(), Some(10.0));
        assert_eq!(s.high(), Some(111.0));
        assert_eq!(s.low(), Some(99.0));
    }

    #[test]
    fn test_empty_series_has_no_summaries() {
        let s = series(&[]);

        assert_eq!(s.latest_close(), None);
        assert_eq!(s.change_percent(), None);
        assert_eq!(s.high(), None);
        assert_eq!(s.low(), None);
    }

    #[test]
    fn test_range_tokens() {
        assert_eq!(SeriesRange::Month.as_str(), "1mo");
        assert_eq!(SeriesRange::Year.to_string(), "1y");
        assert_eq!(SeriesRange::default(), SeriesRange::Month);
    }
}
