use crate::FederationError;

/// Normalizes a remote server base URL.
///
/// - trims surrounding whitespace
/// - defaults to `https://` when no scheme is given
/// - lowercases the scheme and host
/// - strips trailing slashes
///
/// Rejects anything without a plausible host, with a scheme other than
/// http/https, or containing whitespace, so the registry's unique key is
/// stable regardless of how the administrator typed the address.
pub fn normalize_url(raw: &str) -> Result<String, FederationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(FederationError::InvalidUrl(raw.to_string()));
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => ("https".to_string(), trimmed),
    };
    if scheme != "http" && scheme != "https" {
        return Err(FederationError::InvalidUrl(raw.to_string()));
    }

    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(FederationError::InvalidUrl(raw.to_string()));
    }

    // Lowercase the host part only; any path segment keeps its case.
    let (host, path) = match rest.split_once('/') {
        Some((h, p)) => (h, Some(p)),
        None => (rest, None),
    };
    if host.is_empty() || !host.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(FederationError::InvalidUrl(raw.to_string()));
    }

    let mut normalized = format!("{}://{}", scheme, host.to_ascii_lowercase());
    if let Some(path) = path {
        normalized.push('/');
        normalized.push_str(path);
    }
    Ok(normalized)
}
