//! URL Canonicalization
//! One canonical form per page: lowercased host, no tracking params,
//! no fragments, sorted query. Applying it twice changes nothing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Query parameters that identify campaigns, not content
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "ref_src",
];

/// Two-part public suffixes we care about for root-domain extraction
const TWO_PART_TLDS: &[&str] = &[
    "co.uk", "org.uk", "co.jp", "com.au", "com.br", "co.nz", "com.cn", "co.kr",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUrl {
    pub canonical_url: String,
    pub domain: String,
    pub path_sig: String,
}

/// Normalize a URL into its canonical form.
/// Idempotent: canonicalize(canonicalize(u).canonical_url) == canonicalize(u).
pub fn canonicalize(raw: &str) -> Result<CanonicalUrl> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("Unparseable URL: {}", raw))?;

    let host = url
        .host_str()
        .with_context(|| format!("URL has no host: {}", raw))?
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .with_context(|| format!("Invalid host in {}", raw))?;

    url.set_fragment(None);

    // Collapse duplicate slashes and trailing slash in the path
    let collapsed: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    let path = if collapsed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", collapsed.join("/"))
    };
    url.set_path(&path);

    // Strip tracking params, sort the rest for a stable ordering
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.set_query(Some(&query));
    }

    let path_sig = path_signature(&path);

    Ok(CanonicalUrl {
        canonical_url: url.to_string(),
        domain: host,
        path_sig,
    })
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Path with volatile segments replaced by placeholders, so
/// /product/12345 and /product/67890 share one signature.
pub fn path_signature(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            if seg.chars().all(|c| c.is_ascii_digit()) {
                ":num".to_string()
            } else if seg.len() >= 6 && seg.chars().all(|c| c.is_ascii_hexdigit()) {
                ":id".to_string()
            } else {
                seg.to_lowercase()
            }
        })
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Registrable domain: last two labels, or three when the suffix is
/// a known two-part TLD (example.co.uk).
pub fn root_domain(host: &str) -> String {
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let take = if TWO_PART_TLDS.contains(&last_two.as_str()) {
        3
    } else {
        2
    };

    labels[labels.len().saturating_sub(take)..].join(".")
}
