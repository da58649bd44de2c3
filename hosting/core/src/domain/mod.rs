// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Identities, errors, configuration, the execution context with its
//! shutdown state machine, and the collaborator contracts around it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and invariants shared by every other layer

pub mod context;
pub mod error;
pub mod events;
pub mod host_config;
pub mod hosting;
pub mod identity;
pub mod lifecycle;
pub mod registered_object;
