use url::Url;
use validator::ValidateEmail;

/// Trim and lower-case. Applied before every store and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email.validate_email()
}

/// Registered redirect URIs must be absolute and carry no fragment.
pub fn validate_redirect_uri(uri: &str) -> Result<(), String> {
    let parsed = Url::parse(uri).map_err(|e| format!("invalid redirect_uri {}: {}", uri, e))?;

    if parsed.cannot_be_a_base() {
        return Err(format!("redirect_uri {} must be absolute", uri));
    }
    if parsed.fragment().is_some() {
        return Err(format!("redirect_uri {} must not contain a fragment", uri));
    }
    Ok(())
}

/// Split a space-delimited scope string, dropping duplicates but keeping
/// first-seen order.
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

pub fn join_scope(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Lower-case letters, digits and single hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 63
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("not-an-email"));
    }

    #[test]
    fn test_redirect_uri_rules() {
        assert!(validate_redirect_uri("http://localhost/callback").is_ok());
        assert!(validate_redirect_uri("https://app.example.com/cb?x=1").is_ok());
        assert!(validate_redirect_uri("com.example.app:/oauth").is_ok());
        assert!(validate_redirect_uri("/relative/callback").is_err());
        assert!(validate_redirect_uri("https://app.example.com/cb#frag").is_err());
        assert!(validate_redirect_uri("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope("profile  email profile"), vec!["profile", "email"]);
        assert!(parse_scope("   ").is_empty());
        assert_eq!(join_scope(&parse_scope("a b")), "a b");
    }

    #[test]
    fn test_slug() {
        assert!(is_valid_slug("acme-corp"));
        assert!(!is_valid_slug("Acme"));
        assert!(!is_valid_slug("-acme"));
        assert!(!is_valid_slug("acme--corp"));
        assert!(!is_valid_slug(""));
    }
}
