// ABOUTME: Route module organization for the gatehouse HTTP endpoints
// ABOUTME: Merges the auth and health routers into the application router
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Authentication routes
pub mod auth;
/// Health check route
pub mod health;

pub use auth::{AuthRoutes, ClientContext};
pub use health::HealthRoutes;

use crate::auth::AuthOrchestrator;
use axum::Router;

/// Full application router
pub fn router(orchestrator: AuthOrchestrator) -> Router {
    let cache = orchestrator.context().cache().clone();
    Router::new()
        .merge(AuthRoutes::routes(orchestrator))
        .merge(HealthRoutes::routes(cache))
}
