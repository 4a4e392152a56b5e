//! The record for one discovered script and the channels that observed it.

use crate::hashing::{compute_all, HashAlgorithm};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// A collection channel through which a script can be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// The markup returned by a plain HTTP fetch, before any script runs.
    StaticHtml,
    /// The live DOM after the browser has loaded and executed the page.
    RenderedDom,
    /// The script body itself was fetched.
    FetchedResource,
}

/// Which channels have observed a resource. Flags only ever go from false to true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Presence {
    static_html: bool,
    rendered_dom: bool,
    fetched: bool,
}

/// Outcome of comparing a declared integrity attribute against computed hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrityStatus {
    /// No integrity attribute was declared.
    NotDeclared,
    /// Declared, but no content hash is available for any declared algorithm.
    Unverified,
    /// Content matches one of the strongest declared digests.
    Match,
    /// Content matches none of the strongest declared digests.
    Mismatch,
}

/// One script discovered on the target page, identified by its absolute URL.
#[derive(Debug, Clone)]
pub struct ScriptResource {
    /// Absolute, normalized script URL.
    pub url: Url,
    /// Integrity attribute as declared in the observed tag.
    pub declared_integrity: Option<String>,
    /// Serialized tag as observed, kept for audit.
    pub tag: String,
    presence: Presence,
    hashes: BTreeMap<HashAlgorithm, String>,
    content: Option<Vec<u8>>,
}

impl ScriptResource {
    pub fn new(url: Url, declared_integrity: Option<String>, tag: impl Into<String>) -> Self {
        Self {
            url,
            declared_integrity: declared_integrity.filter(|s| !s.trim().is_empty()),
            tag: tag.into(),
            presence: Presence::default(),
            hashes: BTreeMap::new(),
            content: None,
        }
    }

    /// Record that `channel` observed this resource.
    pub fn mark_observed_in(&mut self, channel: Channel) {
        match channel {
            Channel::StaticHtml => self.presence.static_html = true,
            Channel::RenderedDom => self.presence.rendered_dom = true,
            Channel::FetchedResource => self.presence.fetched = true,
        }
    }

    pub fn is_observed_in(&self, channel: Channel) -> bool {
        match channel {
            Channel::StaticHtml => self.presence.static_html,
            Channel::RenderedDom => self.presence.rendered_dom,
            Channel::FetchedResource => self.presence.fetched,
        }
    }

    pub fn in_static_html(&self) -> bool {
        self.presence.static_html
    }

    pub fn in_rendered_dom(&self) -> bool {
        self.presence.rendered_dom
    }

    pub fn in_fetched_resources(&self) -> bool {
        self.presence.fetched
    }

    /// Store a digest for `algorithm`. Unknown algorithm names are ignored.
    pub fn set_hash(&mut self, algorithm: &str, value: impl Into<String>) {
        if let Some(algo) = HashAlgorithm::from_name(algorithm) {
            self.hashes.insert(algo, value.into());
        }
    }

    pub fn remove_hash(&mut self, algorithm: HashAlgorithm) -> Option<String> {
        self.hashes.remove(&algorithm)
    }

    pub fn hash_for(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.hashes.get(&algorithm).map(String::as_str)
    }

    pub fn available_hashes(&self) -> impl Iterator<Item = HashAlgorithm> + '_ {
        self.hashes.keys().copied()
    }

    pub fn hashes(&self) -> &BTreeMap<HashAlgorithm, String> {
        &self.hashes
    }

    /// Compute and store digests of `content` under every guaranteed algorithm.
    pub fn compute_hashes(&mut self, content: &[u8]) {
        self.hashes.extend(compute_all(content));
    }

    /// Retain a fetched body and hash it.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.compute_hashes(&content);
        self.content = Some(content);
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Content-level identity: same URL, same tag, and at least one algorithm
    /// for which both sides hold the same digest.
    pub fn equivalent_to(&self, other: &ScriptResource) -> bool {
        self.url == other.url
            && self.tag == other.tag
            && self
                .hashes
                .iter()
                .any(|(algo, value)| other.hashes.get(algo) == Some(value))
    }

    /// Compare the declared integrity attribute against the computed hashes.
    ///
    /// Only the strongest declared algorithm we hold a hash for is considered,
    /// and any one of its digests matching is enough.
    pub fn integrity_check(&self) -> IntegrityStatus {
        let Some(declared) = self.declared_integrity.as_deref() else {
            return IntegrityStatus::NotDeclared;
        };

        let tokens = parse_integrity(declared);
        let Some(strongest) = tokens
            .iter()
            .filter(|(algo, _)| self.hashes.contains_key(algo))
            .map(|(algo, _)| *algo)
            .max_by_key(|algo| sri_strength(*algo))
        else {
            return IntegrityStatus::Unverified;
        };

        let computed = &self.hashes[&strongest];
        let matched = tokens
            .iter()
            .filter(|(algo, _)| *algo == strongest)
            .any(|(_, expected)| expected.eq_ignore_ascii_case(computed));

        if matched {
            IntegrityStatus::Match
        } else {
            IntegrityStatus::Mismatch
        }
    }

    /// Serializable snapshot of this resource.
    pub fn to_record(&self) -> ResourceRecord {
        ResourceRecord {
            url: self.url.to_string(),
            hashes: self
                .hashes
                .iter()
                .map(|(algo, value)| (algo.name().to_string(), value.clone()))
                .collect(),
            tag: self.tag.clone(),
            in_html: self.presence.static_html,
            in_dom: self.presence.rendered_dom,
            in_resources: self.presence.fetched,
            integrity: self.declared_integrity.clone(),
            integrity_status: self.integrity_check(),
        }
    }
}

/// Serialized shape of a [`ScriptResource`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub url: String,
    /// Algorithm name to hex digest.
    pub hashes: BTreeMap<String, String>,
    pub tag: String,
    pub in_html: bool,
    pub in_dom: bool,
    pub in_resources: bool,
    pub integrity: Option<String>,
    pub integrity_status: IntegrityStatus,
}

/// Subresource-integrity algorithms, weakest first.
fn sri_strength(algo: HashAlgorithm) -> u8 {
    match algo {
        HashAlgorithm::Sha256 => 1,
        HashAlgorithm::Sha384 => 2,
        HashAlgorithm::Sha512 => 3,
        _ => 0,
    }
}

/// Parse `sha384-<base64> sha512-<base64>?opt` into (algorithm, hex digest) pairs.
/// Tokens with unknown algorithms or undecodable digests are dropped.
fn parse_integrity(declared: &str) -> Vec<(HashAlgorithm, String)> {
    declared
        .split_whitespace()
        .filter_map(|token| {
            let token = token.split('?').next().unwrap_or(token);
            let (name, encoded) = token.split_once('-')?;
            let algo = HashAlgorithm::from_name(name).filter(|a| sri_strength(*a) > 0)?;
            let raw = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()?;
            Some((algo, hex::encode(raw)))
        })
        .collect()
}
