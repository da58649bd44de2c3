// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Webhost Core
//!
//! Domain lifecycle manager for a multi-application hosting process: one
//! isolated execution context per application, created on demand, shut down
//! gracefully and bounded in time.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Registry, execution contexts and their collaborators

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
