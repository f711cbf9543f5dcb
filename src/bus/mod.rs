//! Change notifications for the settings state.
//!
//! The coordinator is the only writer of the reactive settings fields. Every
//! accepted change is announced on the [`EventBus`] so observers (the UI
//! layer, the CLI `watch` command) can re-read the fields they render.
//!
//! # Architecture
//!
//! Events flow from coordinator → EventBus → subscribers:
//! - `EventBus`: in-memory broadcast channel, one sender, any number of receivers
//! - `event_types`: category and event type constants shared by publishers and observers

mod event_bus;
pub mod event_types;

pub use event_bus::{BusEvent, EventBus};
