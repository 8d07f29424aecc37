//! Marketplace domain: identifiers, value objects, aggregates and events.
pub mod aggregates;
pub mod events;
pub mod ids;
pub mod value_objects;
