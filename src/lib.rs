//! Traffic Stats Backend Library
//!
//! Reconciles paid-advertising spend (Facebook Ads) with closed CRM sales
//! (amoCRM) into per-team ROI/ROAS reports. Exposes core modules for use
//! by the server binary and integration tests.

pub mod api;
pub mod clients;
pub mod config;
pub mod engine;
pub mod models;
pub mod sink;
