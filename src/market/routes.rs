use axum::{routing::get, Router};

use crate::market::{handler, service::MarketService};

pub fn market_routes(service: MarketService) -> Router {
  Router::new()
      .route("/symbols", get(handler::get_symbols))
      .route("/market-data", get(handler::get_market_data))
      .route("/system-status", get(handler::get_system_status))
      .with_state(service)
}
