// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seams between the plugin manager and its collaborators.

pub mod sandbox;
pub mod store;
