//! Structs that have to do with server replies.


use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// A complete (possibly multiline) server reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, lines: Vec<String>) -> Self {
        Reply { code, lines }
    }

    /// 2yz
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// The human-readable part of the reply, lines joined by spaces.
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message())
    }
}

/// Parses the raw text of one reply, which must contain exactly the lines belonging to it.
pub fn parse_reply(raw: &str) -> Result<Reply> {
    let mut code = None;
    let mut lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.len() < 3 || !line.is_char_boundary(3) {
            return Err(Error::Malformed(line.to_owned()));
        }

        let (digits, rest) = line.split_at(3);
        let this_code: u16 = match digits.parse() {
            Ok(v) if (200..600).contains(&v) => v,
            _ => return Err(Error::Malformed(line.to_owned())),
        };
        match code {
            None => code = Some(this_code),
            Some(c) if c != this_code => return Err(Error::Malformed(line.to_owned())),
            _ => {}
        }

        // the separator is '-' on continuation lines and ' ' (or nothing) on the last one
        let text = rest.get(1..).unwrap_or("");
        lines.push(text.to_owned());
    }

    match code {
        Some(code) => Ok(Reply::new(code, lines)),
        None => Err(Error::Malformed(raw.to_owned())),
    }
}

/// Service extensions advertised in the EHLO reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extensions {
    inner: HashMap<String, Vec<String>>,
}

impl Extensions {
    /// The first line of an EHLO reply is the server's greeting; every following line is one
    /// keyword, optionally followed by parameters.
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut inner = HashMap::new();
        for line in reply.lines.iter().skip(1) {
            let mut parts = line.split(|c: char| c == ' ' || c == '=');
            let keyword = match parts.next() {
                Some(k) if !k.is_empty() => k.to_ascii_uppercase(),
                _ => continue,
            };
            let params: Vec<String> = parts
                .filter(|p| !p.is_empty())
                .map(|p| p.to_owned())
                .collect();
            inner
                .entry(keyword)
                .or_insert_with(Vec::new)
                .extend(params);
        }
        Extensions { inner }
    }

    pub fn has(&self, keyword: impl AsRef<str>) -> bool {
        self.inner
            .contains_key(&keyword.as_ref().to_ascii_uppercase())
    }

    /// The SASL mechanisms listed under `AUTH`, uppercased.
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.inner
            .get("AUTH")
            .map(|mechs| mechs.iter().map(|m| m.to_ascii_uppercase()).collect())
            .unwrap_or_default()
    }

    pub fn supports_auth(&self, mechanism: impl AsRef<str>) -> bool {
        let mechanism = mechanism.as_ref();
        self.auth_mechanisms()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}
