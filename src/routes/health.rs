// ABOUTME: Health check route handler for service monitoring
// ABOUTME: Reports healthy only when the cache backend answers a health check
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::cache::{Cache, CacheProvider};
use crate::errors::AppError;
use axum::{extract::State, routing::get, Json, Router};

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route
    pub fn routes(cache: Cache) -> Router {
        async fn health_handler(
            State(cache): State<Cache>,
        ) -> Result<Json<serde_json::Value>, AppError> {
            cache.health_check().await?;
            Ok(Json(serde_json::json!({
                "status": "healthy",
                "cache": cache.backend_name(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })))
        }

        Router::new()
            .route("/health", get(health_handler))
            .with_state(cache)
    }
}
