//! smtp2rest — SMTP-to-REST message routing gateway.

pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod relay;
pub mod rest;
pub mod token;
