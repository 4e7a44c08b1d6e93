use std::time::Duration;

use anyhow::{Context, Result, bail};
use http::Uri;

/// Parse a human duration like `90s`, `10m`, `1h`, `2d`, `3w` or `1y`.
/// A bare integer is taken as seconds. Used by `--expires`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (digits, unit) = match value.find(|ch: char| !ch.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let count = digits
        .parse::<u64>()
        .map_err(|_| format!("invalid duration {value:?}"))?;
    let seconds_per_unit = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        "y" => 365 * 24 * 60 * 60,
        _ => return Err(format!("invalid duration unit {unit:?} in {value:?}")),
    };
    Ok(Duration::from_secs(count * seconds_per_unit))
}

/// Parse a command line url, recovering from a missing scheme. Anything
/// other than http/https is rejected.
pub fn parse_url(url: &str) -> Result<Uri> {
    let fixed;
    let url = if url.contains("://") {
        url
    } else {
        fixed = format!("http://{url}");
        &fixed
    };
    let uri: Uri = url
        .parse()
        .with_context(|| format!("invalid url {url:?}"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => bail!("only http/https supported"),
    }
    if uri.host().is_none() {
        bail!("invalid url {url:?}");
    }
    Ok(uri)
}

/// Resolve a redirect `Location` against the url that produced it. Handles
/// absolute urls, root-relative paths, and paths relative to the current
/// directory.
pub fn resolve_redirect(base: &Uri, location: &str) -> Result<Uri> {
    if location.contains("://") {
        return location
            .parse()
            .with_context(|| format!("invalid redirect location {location:?}"));
    }

    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base
        .authority()
        .map(|a| a.as_str())
        .context("redirect from url without authority")?;
    let path_and_query = if location.starts_with('/') {
        location.to_string()
    } else {
        let path = base.path();
        let dir = &path[..path.rfind('/').map_or(0, |i| i + 1)];
        format!("{dir}{location}")
    };
    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .with_context(|| format!("invalid redirect location {location:?}"))
}
