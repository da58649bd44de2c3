// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`webhost-core`)
//!
//! Control-channel surface that translates administrative commands into
//! registry calls. No lifecycle logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`admin`] | JSON lines | Start/stop, preload, suspend/resume, ping and status commands |

pub mod admin;
