//! Wildcard CIDR expansion
//!
//! `10.*.*.0/24` expands to `10.1.1.0/24`, `10.1.2.0/24`, ... `10.253.253.0/24`:
//! every wildcard octet runs from 1 to 253, the leftmost wildcard varying
//! slowest. Any number of octets may be wildcards; literal octets and the
//! prefix are kept exactly as written. The caller skips candidates already
//! used by the provider.

use crate::error::{CloudError, Result};
use std::collections::HashSet;

const FIRST_OCTET: u8 = 1;
const LAST_OCTET: u8 = 253;

/// Lazy, finite expansion of a wildcard CIDR pattern
#[derive(Debug, Clone)]
pub struct CidrWildcards {
    /// Literal octet text, `None` for a wildcard
    octets: [Option<String>; 4],
    prefix: String,
    /// Current value of each wildcard, outermost first
    counters: Vec<u8>,
    done: bool,
}

/// Expands `pattern` (e.g. `10.*.*.0/24`) into concrete CIDRs
pub fn cidr_wildcard_iterator(pattern: &str) -> Result<CidrWildcards> {
    CidrWildcards::new(pattern)
}

impl CidrWildcards {
    pub fn new(pattern: &str) -> Result<Self> {
        let invalid = || CloudError::InvalidConfig(format!("invalid CIDR pattern: {}", pattern));

        let (address, prefix) = pattern.split_once('/').ok_or_else(invalid)?;
        match prefix.parse::<u8>() {
            Ok(bits) if bits <= 32 => {}
            _ => return Err(invalid()),
        }

        let parts: Vec<&str> = address.split('.').collect();
        if parts.len() != 4 {
            return Err(invalid());
        }

        let mut octets: [Option<String>; 4] = Default::default();
        for (slot, part) in octets.iter_mut().zip(&parts) {
            *slot = match *part {
                "*" => None,
                value => {
                    value.parse::<u8>().map_err(|_| invalid())?;
                    Some(value.to_string())
                }
            };
        }

        let wildcards = octets.iter().filter(|o| o.is_none()).count();

        Ok(Self {
            octets,
            prefix: prefix.to_string(),
            counters: vec![FIRST_OCTET; wildcards],
            done: false,
        })
    }

    /// Back to the first candidate
    pub fn restart(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = FIRST_OCTET);
        self.done = false;
    }

    fn render(&self) -> String {
        let mut wildcard = self.counters.iter();
        let octets: Vec<String> = self
            .octets
            .iter()
            .map(|o| match o {
                Some(value) => value.clone(),
                // one counter per wildcard octet
                None => wildcard.next().copied().unwrap_or(FIRST_OCTET).to_string(),
            })
            .collect();
        format!("{}/{}", octets.join("."), self.prefix)
    }

    fn advance(&mut self) {
        for counter in self.counters.iter_mut().rev() {
            if *counter < LAST_OCTET {
                *counter += 1;
                return;
            }
            *counter = FIRST_OCTET;
        }
        self.done = true;
    }

    fn remaining(&self) -> usize {
        if self.done {
            return 0;
        }
        let span = (LAST_OCTET - FIRST_OCTET + 1) as usize;
        // position of the current candidate in odometer order
        let consumed = self
            .counters
            .iter()
            .fold(0usize, |acc, c| acc * span + (c - FIRST_OCTET) as usize);
        span.pow(self.counters.len() as u32) - consumed
    }

    /// First candidate not present in `used`
    pub fn first_free(mut self, used: &HashSet<String>) -> Option<String> {
        self.find(|cidr| !used.contains(cidr))
    }
}

impl Iterator for CidrWildcards {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let cidr = self.render();
        self.advance();
        Some(cidr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CidrWildcards {}
