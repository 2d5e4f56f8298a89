#![allow(clippy::missing_docs_in_private_items)]

pub mod bus;
pub mod event;
pub mod gateway;

pub use bus::{bus_from_config, DatabaseEventBus, EventBus, EventStream, InMemoryEventBus};
pub use event::JobEvent;
