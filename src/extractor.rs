use crate::lexer;
use crate::types::CandidateUrl;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::{Host, Url};
use walkdir::WalkDir;

static TLD_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[a-z]{2,}$").expect("static regex"));

/// Which files to read while walking source roots.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub extensions: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["php".into()],
            max_file_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Walk `roots` and collect the outbound HTTP(S) origins referenced by string literals.
///
/// - Missing roots are skipped; unreadable or oversized files are logged and skipped.
/// - Results are deduplicated by `scheme://host[:port]` and sorted by that string.
pub fn extract_urls(roots: &[PathBuf], opts: &ExtractOptions) -> Vec<CandidateUrl> {
    let mut found = BTreeMap::new();
    for root in roots {
        if !root.is_dir() {
            debug!(root = %root.display(), "skipping missing source directory");
            continue;
        }
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to read directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_source_extension(entry.path(), &opts.extensions) {
                continue;
            }
            for candidate in extract_from_file(entry.path(), opts.max_file_bytes) {
                found.entry(candidate.to_string()).or_insert(candidate);
            }
        }
    }
    found.into_values().collect()
}

fn has_source_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn extract_from_file(path: &Path, max_bytes: u64) -> Vec<CandidateUrl> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => {
            warn!(file = %path.display(), size = meta.len(), "skipping oversized file");
            return Vec::new();
        }
        Ok(_) => {}
        Err(e) => {
            warn!(file = %path.display(), error = %e, "skipping unreadable file");
            return Vec::new();
        }
    }
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "skipping unreadable file");
            return Vec::new();
        }
    };
    let source = String::from_utf8_lossy(&bytes);
    lexer::string_literals(&source)
        .iter()
        .filter_map(|lit| {
            let candidate = candidate_from_literal(lit.value())?;
            debug!(file = %path.display(), offset = lit.offset, url = %candidate, "found URL literal");
            Some(candidate)
        })
        .collect()
}

/// Apply the URL filters to one literal value.
///
/// The scheme must be followed by `//`; forms like `https:example.com`, which
/// WHATWG parsing would accept, have no authority and are not URLs here.
pub fn candidate_from_literal(value: &str) -> Option<CandidateUrl> {
    let value = value.trim();
    let (_, rest) = value.split_once(':')?;
    if !rest.starts_with("//") {
        return None;
    }
    let url = Url::parse(value).ok()?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let host = match url.host()? {
        Host::Domain(d) => d.to_ascii_lowercase(),
        Host::Ipv4(_) | Host::Ipv6(_) => return None,
    };
    if host.is_empty() || host == "localhost" || host.parse::<IpAddr>().is_ok() {
        return None;
    }
    if !TLD_SUFFIX.is_match(&host) {
        return None;
    }
    if host.contains(['{', '}', '[', ']']) {
        return None;
    }
    Some(CandidateUrl {
        scheme: scheme.to_string(),
        host,
        port: url.port(),
    })
}
