//! Delivery subsystem: the chat gateway client and the retrying,
//! endpoint-failover delivery engine with sticky routing.

pub mod engine;
pub mod gateway;

pub use engine::{DeliveryEngine, DeliveryReceipt};
pub use gateway::{ChatGateway, EvolutionGateway, GatewayError, MediaKind};
