//! # Controller
//!
//! The Terraform reconciler, post-planning webhooks and the metrics and health server.

pub mod reconciler;
pub mod server;
pub mod webhooks;
