//! Domain layer: the pipeline's entities, value objects and ports.
//!
//! Entities expose their status only through transition methods, so every
//! state change goes through a check of the current status.

pub mod actor;
pub mod earning;
pub mod money;
pub mod payment;
pub mod ports;
pub mod rating;
pub mod request;
pub mod task;
