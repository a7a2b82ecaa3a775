/// see https://atproto.com/specs/did#at-protocol-did-identifier-syntax
///
/// lax on purpose: every valid DID passes, a few invalid ones may too. the
/// ingester only needs to reject garbage before it becomes a store key.
pub fn parse_did(s: &str) -> Option<&str> {
    // hard limit of 2 KB in atproto
    if s.is_empty() || s.len() > 2 * 1024 {
        return None;
    }
    if !s
        .chars()
        .all(|c| matches!(c, 'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | ':' | '%' | '-'))
    {
        return None;
    }
    let (method, identifier) = s.strip_prefix("did:")?.split_once(':')?;
    if method.is_empty() || !method.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    if identifier.is_empty() || identifier.ends_with(':') {
        return None;
    }
    Some(s)
}

pub fn is_did(s: &str) -> bool {
    parse_did(s).is_some()
}
