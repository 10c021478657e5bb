//! Task lifecycle and delivery cost negotiation.
//!
//! [`engine::NegotiationEngine`] holds the pure rules; [`service::TaskService`]
//! wires them to a [`repository::TaskRepository`], a
//! [`notify::NotificationSink`] and a [`timestamp::Clock`].

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod money;
pub mod notify;
pub mod repository;
pub mod service;
pub mod state_machine;
pub mod storage;
pub mod task;
pub mod timestamp;
pub mod utils;
