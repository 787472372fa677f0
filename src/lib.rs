pub mod agent;
pub mod artifact;
pub mod banner;
pub mod config;
pub mod consts;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod input;
pub mod job;
pub mod spinner;
pub mod store;
