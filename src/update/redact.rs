use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const PLACEHOLDER: &str = "REDACTED";

/// Query parameters whose values must never be logged.
const SECRET_PARAMS: &[&str] = &["license_key", "key", "token", "access_token", "password"];

static SECRET_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)((?:license_key|key|token|access_token|password)=)[^&#\s]*").unwrap()
});

fn is_secret(name: &str) -> bool {
    SECRET_PARAMS
        .iter()
        .any(|secret| secret.eq_ignore_ascii_case(name))
}

/// Render `url` with every secret-bearing query value replaced by a placeholder.
pub fn redact_url(url: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        // Not a URL we can take apart; mask anything that looks like a secret.
        Err(_) => return SECRET_QUERY.replace_all(url, "${1}REDACTED").into_owned(),
    };

    if !parsed.query_pairs().any(|(name, _)| is_secret(&name)) {
        return url.to_owned();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            let value = if is_secret(&name) {
                PLACEHOLDER.to_owned()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.into()
}
