use std::any::Any;

use axum::{
  http::StatusCode,
  response::{Html, IntoResponse, Response},
  routing::get,
  Json, Router,
};
use chrono::Utc;
use http::Uri;
use serde::Serialize;
use serde_json::json;
use tower_http::{
  catch_panic::CatchPanicLayer,
  compression::CompressionLayer,
  cors::{Any as AnyOrigin, CorsLayer},
  trace::TraceLayer,
};

use crate::market::{routes::market_routes, service::MarketService};

const DASHBOARD_PAGE: &str = include_str!("../../templates/index.html");

pub fn create_router(market_service: MarketService) -> Router {
  // Setup CORS
  let cors = CorsLayer::new()
      .allow_origin(AnyOrigin)
      .allow_methods(AnyOrigin)
      .allow_headers(AnyOrigin);

  // Build the router
  Router::new()
      .route("/", get(dashboard))
      .route("/health", get(health_check))
      .nest("/api", market_routes(market_service))
      .fallback(not_found)
      .layer(CatchPanicLayer::custom(handle_panic))
      .layer(TraceLayer::new_for_http())
      .layer(CompressionLayer::new())
      .layer(cors)
}

async fn dashboard() -> Html<&'static str> {
  Html(DASHBOARD_PAGE)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  pub status: &'static str,
  pub timestamp: String,
}

async fn health_check() -> Json<HealthResponse> {
  Json(HealthResponse {
      status: "ok",
      timestamp: Utc::now().to_rfc3339(),
  })
}

async fn not_found(uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
  (
      StatusCode::NOT_FOUND,
      Json(json!({
          "error": "Page not found",
          "path": uri.path(),
      })),
  )
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
  let detail = if let Some(s) = err.downcast_ref::<String>() {
      s.clone()
  } else if let Some(s) = err.downcast_ref::<&str>() {
      s.to_string()
  } else {
      "unknown panic".to_string()
  };
  tracing::error!(panic = %detail, "handler panicked");

  (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(json!({
          "error": "Internal server error",
          "message": detail,
      })),
  )
      .into_response()
}
