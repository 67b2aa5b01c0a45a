//! PayMongo checkout gateway
//!
//! Drives a PayMongo payment intent through its lifecycle for storefront
//! orders: intent creation on order submission, card attachment, 3-D Secure
//! redirects, webhooks, and exactly-once order finalization.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod paymongo;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::{AppConfig, GatewayConfig};
use crate::notifications::InvoiceNotifier;
use crate::paymongo::PaymentProcessor;
use crate::services::{checkout_form::CheckoutFormController, payments::PaymentOrchestrator};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub gateway: Arc<GatewayConfig>,
    pub event_sender: events::EventSender,
    pub payments: Arc<PaymentOrchestrator>,
    pub checkout_form: CheckoutFormController,
}

impl AppState {
    /// Wires the orchestrator and form controller from configuration and
    /// the two outbound seams (processor and invoice delivery).
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn InvoiceNotifier>,
        event_sender: events::EventSender,
    ) -> Self {
        let gateway = Arc::new(config.paymongo.clone());
        let payments = Arc::new(PaymentOrchestrator::new(
            db.clone(),
            gateway.clone(),
            config.store.clone(),
            processor,
            notifier,
            event_sender.clone(),
        ));
        let checkout_form = CheckoutFormController::new(gateway.clone(), config.store.clone());

        Self {
            db,
            config,
            gateway,
            event_sender,
            payments,
            checkout_form,
        }
    }
}

/// Full HTTP surface: checkout API, processor callbacks, health and the
/// OpenAPI document. Transport layers (timeouts) are added by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "paymongo-checkout up" }))
        .nest("/api/v1/orders", handlers::checkout::checkout_routes())
        .nest("/paymongo", handlers::callbacks::callback_routes())
        .merge(handlers::health::health_routes())
        .merge(openapi::openapi_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
