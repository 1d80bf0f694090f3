// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trawl runtime library — adaptive scraping scheduler for web data
//! extraction at scale.
//!
//! This library crate exposes the core modules for integration testing.

#![allow(
    dead_code,
    unused_imports,
    clippy::new_without_default,
    clippy::should_implement_trait
)]

pub mod acquisition;
pub mod cli;
pub mod events;
pub mod scheduler;
