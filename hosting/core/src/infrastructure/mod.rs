// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Concrete collaborators: the configured application table and in-process
//! context factory, the event bus and the failure reporter.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements domain interfaces

pub mod app_factory;
pub mod event_bus;
pub mod failure_reporter;
