/// Turn a raw scope entry or discovered name into a canonical domain identity.
///
/// Strips the scheme, path, port and wildcard marker, in that order, trimming
/// whitespace around the result. Returns `None` when nothing usable remains. Case is preserved.
pub fn normalize(raw: &str) -> Option<String> {
    let mut s = raw;
    if let Some(rest) = s.strip_prefix("https://") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("http://") {
        s = rest;
    }

    if let Some(idx) = s.find('/') {
        s = &s[..idx];
    }
    if let Some(idx) = s.find(':') {
        s = &s[..idx];
    }
    // Repeat until stable so stacked or space-padded wildcards cannot survive a pass.
    let mut s = s.trim();
    while let Some(rest) = s.strip_prefix("*.") {
        s = rest.trim();
    }

    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Normalize every entry, drop rejects and duplicates. First occurrence wins the order.
pub fn normalize_all<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = ahash::AHashSet::new();
    let mut out = Vec::new();
    for entry in raw {
        if let Some(d) = normalize(entry) {
            if seen.insert(d.clone()) {
                out.push(d);
            }
        }
    }
    out
}
