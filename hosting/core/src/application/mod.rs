// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! The domain registry and the services that drive it: preload, request
//! dispatch, idle monitoring and ping.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates execution contexts across applications

pub mod dispatch;
pub(crate) mod idle_monitor;
pub mod ping;
pub mod preload;
pub mod registry;
pub mod slot;
