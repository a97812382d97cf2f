#![forbid(unsafe_code)]

pub mod acks;
pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod gateway;
pub mod health;
pub mod heartbeat;
pub mod hub;
pub mod ingest;
pub mod presence;
pub mod registry;
pub mod topics;

#[cfg(test)]
mod test_support;



#[cfg(test)]
mod heartbeat_tests;
