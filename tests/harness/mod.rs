// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness: a local fixture web server for HTTP-level tests.

pub mod fixtures;

pub use fixtures::FixtureServer;
