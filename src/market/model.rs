use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// One row of the tick table
#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    pub symbol: String,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub trade_id: String,
}

impl TickRecord {
    pub fn side(&self) -> TradeSide {
        TradeSide::from_maker_flag(self.is_buyer_maker)
    }
}

// Trailing-hour aggregate row
#[derive(Debug, Clone, PartialEq)]
pub struct HourlySummary {
    pub trade_count: u64,
    pub symbol_count: u64,
    pub last_record: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// A buyer-maker trade was initiated by the seller.
    pub fn from_maker_flag(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }
}

// Query string of /api/market-data, kept as text so bad input becomes a JSON error
#[derive(Debug, Default, Deserialize)]
pub struct MarketDataQuery {
    pub symbol: Option<String>,
    pub hours: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Validate)]
pub struct MarketDataParams {
    #[validate(length(min = 1, max = 32))]
    pub symbol: String,
    #[validate(range(min = 1))]
    pub hours: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TradeEntry {
    pub trade_id: String,
    pub time: String,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LatestTrade {
    pub time: String,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct MarketDataResponse {
    pub times: Vec<String>,
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
    pub trades: Vec<TradeEntry>,
    pub latest_trades: Vec<LatestTrade>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    pub trades_last_hour: u64,
    pub symbols_last_hour: u64,
    pub last_record_time: String,
    pub minutes_since_last_record: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
