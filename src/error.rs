use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("Authentication error: {0}")]
  AuthError(String),

  #[error("Validation error: {0}")]
  ValidationError(String),

  #[error("Database error: {0}")]
  DatabaseError(String),

  #[error("Malformed result: {0}")]
  DecodeError(String),

  #[error("Config error: {0}")]
  ConfigError(String),

  #[error("Not found: {0}")]
  NotFoundError(String),

  #[error("Internal server error: {0}")]
  InternalError(String),
}

impl From<reqwest::Error> for AppError {
  fn from(err: reqwest::Error) -> Self {
      Self::DatabaseError(err.to_string())
  }
}

impl From<validator::ValidationErrors> for AppError {
  fn from(err: validator::ValidationErrors) -> Self {
      Self::ValidationError(err.to_string())
  }
}

impl AppError {
  pub fn status_code(&self) -> StatusCode {
      match self {
          AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
          AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
          AppError::AuthError(_)
          | AppError::DatabaseError(_)
          | AppError::DecodeError(_)
          | AppError::ConfigError(_)
          | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
      }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
      let status = self.status_code();
      if status.is_server_error() {
          tracing::error!(error = %self, "request failed");
      }

      let body = Json(json!({
          "error": self.to_string(),
      }));

      (status, body).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn maps_variants_to_status_codes() {
      assert_eq!(AppError::ValidationError("hours".into()).status_code(), StatusCode::BAD_REQUEST);
      assert_eq!(AppError::NotFoundError("x".into()).status_code(), StatusCode::NOT_FOUND);
      assert_eq!(AppError::AuthError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
      assert_eq!(AppError::DatabaseError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
      assert_eq!(AppError::DecodeError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[tokio::test]
  async fn renders_error_body() {
      let response = AppError::DatabaseError("cluster unreachable".into()).into_response();
      assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

      let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
      let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
      assert_eq!(body, json!({ "error": "Database error: cluster unreachable" }));
  }
}
