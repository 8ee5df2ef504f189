use std::borrow::Cow;

const REDACTED: &str = "REDACTED";
const JWT_PREFIX: &str = "eyJ";
const TOKEN_FIELDS: [&str; 5] = [
    "accessToken",
    "refreshToken",
    "access_token",
    "refresh_token",
    "token",
];

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - nee.len()).find(|&i| hay[i..i + nee.len()].eq_ignore_ascii_case(nee))
}

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~' | '+' | '/' | '=')
}

fn token_len(rest: &str) -> usize {
    rest.chars()
        .take_while(|ch| is_token_char(*ch))
        .map(char::len_utf8)
        .sum()
}

fn redact_bearer(text: String) -> String {
    let marker = "bearer ";
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = find_ascii_case_insensitive(rest, marker) {
        out.push_str(&rest[..idx + marker.len()]);
        rest = &rest[idx + marker.len()..];
        let consumed = token_len(rest);
        if consumed > 0 {
            out.push_str(REDACTED);
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

fn redact_json_field(text: String, field: &str) -> String {
    let quoted = format!("\"{field}\"");
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(&quoted) {
        out.push_str(&rest[..idx + quoted.len()]);
        rest = &rest[idx + quoted.len()..];

        let after_colon = rest.trim_start().strip_prefix(':').map(str::trim_start);
        let Some(value) = after_colon.and_then(|s| s.strip_prefix('"')) else {
            continue;
        };
        let Some(end) = value.find('"') else {
            continue;
        };
        let prefix_len = rest.len() - value.len();
        out.push_str(&rest[..prefix_len]);
        out.push_str(REDACTED);
        rest = &value[end..];
    }
    out.push_str(rest);
    out
}

fn redact_jwt(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(JWT_PREFIX) {
        out.push_str(&rest[..idx]);
        let candidate = &rest[idx..];
        let consumed = token_len(candidate);
        if candidate[..consumed].matches('.').count() >= 2 {
            out.push_str(JWT_PREFIX);
            out.push('-');
            out.push_str(REDACTED);
        } else {
            out.push_str(&candidate[..consumed]);
        }
        rest = &candidate[consumed..];
    }
    out.push_str(rest);
    out
}

/// Masks bearer credentials, token-bearing JSON fields and JWT-shaped strings.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_bearer(input.to_string());
    for field in TOKEN_FIELDS {
        value = redact_json_field(value, field);
    }
    value = redact_jwt(value);

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
