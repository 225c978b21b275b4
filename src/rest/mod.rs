//! Outbound request rendering and dispatch.
//!
//! A fresh [`input::RestInput`] is built per message by the decoration
//! pipeline in [`decorators`], then handed to a [`client::RestClient`]
//! for the actual HTTP call.

pub mod client;
pub mod decorators;
pub mod input;
