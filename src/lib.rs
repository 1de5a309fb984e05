pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod import;
pub mod mail;
pub mod pagination;
pub mod routes;
pub mod startup;
pub mod storage;
pub mod telemetry;
