// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Miscellaneous utilities: URLs, link text, JSON data, dates and times.

pub mod data;
pub mod misc;
pub mod text;
pub mod time;
pub mod urls;

pub use data::{get_first, get_list, get_url, get_urls, trim_nulls, uniquify};
pub use text::{ellipsize, extract_links, linkify, pretty_link, PrettyLink};
pub use urls::{clean_url, dedupe_urls, domain_from_link, fragmentless, schemeless};
