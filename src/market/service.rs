use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::error::AppError;
use crate::market::model::{
    HourlySummary, LatestTrade, MarketDataParams, MarketDataQuery, MarketDataResponse,
    SystemStatusResponse, TickRecord, TradeEntry,
};
use crate::market::repository::TickRepository;
use crate::utils::time::{format_clock, format_timestamp, minutes_between};

pub const LATEST_TRADES_LIMIT: usize = 10;

/// Reported when there is no record in the trailing hour.
pub const NO_DATA_MINUTES: f64 = 999.0;

#[derive(Clone)]
pub struct MarketService {
    repository: Arc<dyn TickRepository>,
    default_symbol: String,
    max_hours: i64,
}

impl MarketService {
    pub fn new(repository: Arc<dyn TickRepository>, default_symbol: String, max_hours: i64) -> Self {
        Self {
            repository,
            default_symbol,
            max_hours,
        }
    }

    pub async fn list_symbols(&self) -> Result<Vec<String>, AppError> {
        self.repository.list_symbols().await
    }

    pub async fn market_data(&self, query: MarketDataQuery) -> Result<MarketDataResponse, AppError> {
        let params = self.resolve_params(query)?;
        let ticks = self
            .repository
            .fetch_ticks(&params.symbol, params.hours)
            .await?;

        Ok(shape_market_data(&ticks))
    }

    pub async fn system_status(&self) -> Result<SystemStatusResponse, AppError> {
        let summary = self.repository.hourly_summary().await?;
        Ok(shape_system_status(summary, Utc::now()))
    }

    pub fn resolve_params(&self, query: MarketDataQuery) -> Result<MarketDataParams, AppError> {
        let symbol = query
            .symbol
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| self.default_symbol.clone());

        let hours = match query.hours.as_deref().map(str::trim) {
            None | Some("") => 1,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| AppError::ValidationError(format!("hours must be an integer, got '{}'", raw)))?,
        };

        let params = MarketDataParams { symbol, hours };
        params.validate()?;

        if params.hours > self.max_hours {
            return Err(AppError::ValidationError(format!(
                "hours must not exceed {}",
                self.max_hours
            )));
        }

        Ok(params)
    }
}

/// Chart series over every tick plus the most recent trades, newest first.
pub fn shape_market_data(ticks: &[TickRecord]) -> MarketDataResponse {
    let mut response = MarketDataResponse {
        times: Vec::with_capacity(ticks.len()),
        prices: Vec::with_capacity(ticks.len()),
        volumes: Vec::with_capacity(ticks.len()),
        trades: Vec::with_capacity(ticks.len()),
        latest_trades: Vec::new(),
    };

    for tick in ticks {
        let time = format_timestamp(&tick.time);
        response.times.push(time.clone());
        response.prices.push(tick.price);
        response.volumes.push(tick.quantity);
        response.trades.push(TradeEntry {
            trade_id: tick.trade_id.clone(),
            time,
            price: tick.price,
            quantity: tick.quantity,
            side: tick.side(),
        });
    }

    let tail_start = ticks.len().saturating_sub(LATEST_TRADES_LIMIT);
    response.latest_trades = ticks[tail_start..]
        .iter()
        .rev()
        .map(|tick| LatestTrade {
            time: format_clock(&tick.time),
            price: tick.price,
            quantity: tick.quantity,
            side: tick.side(),
        })
        .collect();

    response
}

pub fn shape_system_status(summary: Option<HourlySummary>, now: DateTime<Utc>) -> SystemStatusResponse {
    match summary {
        Some(HourlySummary {
            trade_count,
            symbol_count,
            last_record: Some(last_record),
        }) => SystemStatusResponse {
            trades_last_hour: trade_count,
            symbols_last_hour: symbol_count,
            last_record_time: format_timestamp(&last_record),
            minutes_since_last_record: minutes_between(&last_record, &now),
            status: None,
        },
        _ => SystemStatusResponse {
            trades_last_hour: 0,
            symbols_last_hour: 0,
            last_record_time: format_timestamp(&now),
            minutes_since_last_record: NO_DATA_MINUTES,
            status: Some("No data received in the last hour".to_string()),
        },
    }
}
