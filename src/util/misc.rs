// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Small parsing, file and secret helpers.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use regex::Regex;
use std::collections::HashSet;
use std::io::{self, BufRead, Read};
use std::path::Path;
use std::sync::LazyLock;

static BASE64_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_=-]*$").expect("valid base64 regex"));

/// Returns true if `arg` parses as an integer.
pub fn is_int(arg: &str) -> bool {
    arg.trim().replace('_', "").parse::<i64>().is_ok()
}

/// Returns true if `arg` parses as a float, including `inf` and `nan`.
pub fn is_float(arg: &str) -> bool {
    arg.trim().replace('_', "").parse::<f64>().is_ok()
}

/// Returns true if `arg` only contains URL-safe base64 characters.
pub fn is_base64(arg: &str) -> bool {
    BASE64_RE.is_match(arg)
}

/// Generates a URL-safe random secret from 16 random bytes.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Returns the trimmed contents of a file, or `None` if it doesn't exist.
pub fn read(path: impl AsRef<Path>) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads lines into a set, trimmed. Blank lines and `#` comments are skipped.
pub fn load_file_lines(reader: impl BufRead) -> io::Result<HashSet<String>> {
    let mut items = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let val = line.trim();
        if !val.is_empty() && !val.starts_with('#') {
            items.insert(val.to_string());
        }
    }
    Ok(items)
}

/// A reader wrapper that reads up to a limit and then reports EOF.
#[derive(Debug)]
pub struct FileLimiter<R> {
    inner: R,
    read_limit: u64,
    amount_seen: u64,
    at_eof: bool,
}

impl<R: Read> FileLimiter<R> {
    pub fn new(inner: R, read_limit: u64) -> Self {
        Self {
            inner,
            read_limit,
            amount_seen: 0,
            at_eof: false,
        }
    }

    /// True once the underlying reader ran out before the limit.
    pub fn at_eof(&self) -> bool {
        self.at_eof
    }
}

impl<R: Read> Read for FileLimiter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.amount_seen >= self.read_limit {
            return Ok(0);
        }
        let remaining = (self.read_limit - self.amount_seen) as usize;
        let to_read = remaining.min(buf.len());
        let n = self.inner.read(&mut buf[..to_read])?;
        self.amount_seen += n as u64;
        if to_read > 0 && n == 0 {
            self.at_eof = true;
        }
        Ok(n)
    }
}
