use axum::{
  extract::{Query, State},
  Json,
};

use crate::{
  error::AppError,
  market::{
      model::{MarketDataQuery, MarketDataResponse, SystemStatusResponse},
      service::MarketService,
  },
};

// Distinct symbols
pub async fn get_symbols(
  State(service): State<MarketService>,
) -> Result<Json<Vec<String>>, AppError> {
  let symbols = service.list_symbols().await?;
  Ok(Json(symbols))
}

// Chart series and latest trades for one symbol
pub async fn get_market_data(
  State(service): State<MarketService>,
  Query(query): Query<MarketDataQuery>,
) -> Result<Json<MarketDataResponse>, AppError> {
  let response = service.market_data(query).await?;
  Ok(Json(response))
}

// Ingestion health over the trailing hour
pub async fn get_system_status(
  State(service): State<MarketService>,
) -> Result<Json<SystemStatusResponse>, AppError> {
  let response = service.system_status().await?;
  Ok(Json(response))
}
