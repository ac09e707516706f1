use crate::error::{Result, ScanError};
use url::Url;

/// Canonicalize a URL (or an existing host key) into a host key.
///
/// The host is lowercased and one leading `www.` label is dropped. An
/// explicit port survives only when it is neither 80 nor 443. A bare `host`
/// or `host:port` is read as `https://`, so any key whose host does not
/// itself start with `www.` normalizes to itself.
pub fn normalize(input: &str) -> Result<String> {
    let (host, port) = host_and_port(input)?;
    let host = host.strip_prefix("www.").unwrap_or(&host);
    Ok(match port {
        Some(p) if p != 80 && p != 443 => format!("{host}:{p}"),
        _ => host.to_string(),
    })
}

/// Lowercased host and explicit port of `input`, without stripping `www.`.
pub fn host_and_port(input: &str) -> Result<(String, Option<u16>)> {
    let trimmed = input.trim();
    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed)
    } else if looks_like_key(trimmed) {
        Url::parse(&format!("https://{trimmed}"))
    } else {
        return Err(ScanError::InvalidUrl(format!("{input}: not an absolute URL")));
    }
    .map_err(|e| ScanError::InvalidUrl(format!("{input}: {e}")))?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ScanError::InvalidUrl(format!("{input}: no host")))?
        .to_ascii_lowercase();
    Ok((host, parsed.port()))
}

/// `host` or `host:port`, nothing else.
fn looks_like_key(s: &str) -> bool {
    let (host, port) = match s.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (s, None),
    };
    !host.is_empty()
        && !host.contains(['/', '@', '?', '#'])
        && port.map_or(true, |p| !p.is_empty() && p.bytes().all(|c| c.is_ascii_digit()))
}
