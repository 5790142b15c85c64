// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Sample contracts, settings, and the collaborators (retry limiter, gap filler) shared by the
//! windowing engine and its callers.

pub mod config;
pub mod gap;
pub mod retry;
pub mod types;

pub use config::{EngineConfig, MultiKeySettings, RegistrySettings, RetrySettings, WindowSettings};
pub use gap::fill_gaps;
pub use retry::RetryLimiter;
pub use types::{Entry, Keyed, KeyedPoint, Point};
