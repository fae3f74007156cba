//! Facility fingerprints and the IDs derived from them.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use url::Url;

use crate::models::NormalizedRecord;

/// Hex characters kept from the SHA-1 digest.
///
/// 48 bits: the birthday bound gives ~1.8e-7 collision odds at 10k facilities
/// and ~50% near 16.7M. Collisions are detected by the resolver, not assumed away.
pub const ID_HEX_LEN: usize = 12;

/// Deterministic identity string for one physical facility
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Rounded coordinates plus normalized type, name, address, website and
    /// reference URL. The attributed place is deliberately not part of it.
    pub fn of(record: &NormalizedRecord) -> Self {
        let coords = match record.point() {
            Some(p) => format!("{:.5},{:.5}", p.lat, p.lng),
            None => String::new(),
        };
        Fingerprint(format!(
            "ll:{}|t:{}|n:{}|a:{}|w:{}|s:{}",
            coords,
            record.facility_type().as_str(),
            normalize_text(&record.name),
            normalize_text(&record.address),
            normalize_url(record.website.as_deref().unwrap_or("")),
            normalize_url(record.source_url.as_deref().unwrap_or("")),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who produced the record an ID is minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrigin {
    /// Automated source match, `f_` prefix
    Automated,
    /// Manually curated entry, `m_` prefix
    Manual,
}

impl IdOrigin {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdOrigin::Automated => "f_",
            IdOrigin::Manual => "m_",
        }
    }
}

/// `<prefix><first 12 hex chars of SHA-1(fingerprint)>`
pub fn facility_id(fingerprint: &Fingerprint, origin: IdOrigin) -> String {
    let digest = Sha1::digest(fingerprint.as_str().as_bytes());
    let hex = hex::encode(digest);
    format!("{}{}", origin.prefix(), &hex[..ID_HEX_LEN])
}

/// Lowercase, punctuation to spaces, whitespace collapsed
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scheme-less, `www.`-less, lower-cased host plus path without trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let parsed = Url::parse(raw).or_else(|_| Url::parse(&format!("http://{}", raw)));
    match parsed {
        Ok(url) => {
            let host = url.host_str().unwrap_or("").trim_start_matches("www.");
            let path = url.path().trim_end_matches('/');
            match url.query() {
                Some(query) => format!("{}{}?{}", host, path, query),
                None => format!("{}{}", host, path),
            }
        }
        Err(_) => raw.to_lowercase(),
    }
}
