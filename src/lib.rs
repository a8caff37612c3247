//! Adaptive crypto trading bot: regime detection, multi-signal voting,
//! DCA accumulation and laddered take-profits.

pub mod advisor;
pub mod api;
pub mod bot;
pub mod models;
pub mod signal;
pub mod trading;
