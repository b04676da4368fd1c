// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::new_without_default)]

pub mod check;
pub mod cli;
pub mod config;
pub mod definition;
pub mod error;
pub mod http;
pub mod httpinner;
pub mod marker;
pub mod output;
pub mod request;
pub mod runner;
pub mod stats;
pub mod waflog;

pub use check::Verdict;
pub use error::{FtwError, FtwResult, TransportError, TransportErrorKind};
