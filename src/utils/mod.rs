// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Utility modules
//!
//! Common utilities for the labflow CLI.

pub mod colors;

pub use colors::*;
