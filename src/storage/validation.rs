//! Package-name validity, following npm's naming rules.

/// Names npm refuses regardless of their characters.
const RESERVED_NAMES: &[&str] = &["node_modules", "__proto__", "favicon.ico"];

/// Decides whether a recovered directory name is a legal package name.
pub trait PackageNameValidator: Send + Sync {
    fn is_valid(&self, name: &str) -> bool;
}

/// The npm rules implemented by [`validate_name`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmNameValidator;

impl PackageNameValidator for NpmNameValidator {
    fn is_valid(&self, name: &str) -> bool {
        validate_name(name)
    }
}

impl<F> PackageNameValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, name: &str) -> bool {
        self(name)
    }
}

/// Validate a package name.
///
/// Scoped names (`@scope/name`) are valid when both parts are; the bare part
/// must be URL-safe, must not start with `.`, and must not be reserved.
pub fn validate_name(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix('@')
        && let Some((scope, bare)) = rest.split_once('/')
    {
        return is_legal_segment(scope) && validate_name(bare);
    }

    let normalized = name.to_ascii_lowercase();
    is_legal_segment(&normalized)
        && !normalized.starts_with('.')
        && !RESERVED_NAMES.contains(&normalized.as_str())
}

fn is_legal_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.!~*'()@".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_scoped_names() {
        assert!(validate_name("lodash"));
        assert!(validate_name("left-pad"));
        assert!(validate_name("@babel/core"));
        assert!(validate_name("Capitalized.Name_1"));
    }

    #[test]
    fn rejects_illegal_names() {
        assert!(!validate_name(""));
        assert!(!validate_name(".bin"));
        assert!(!validate_name("node_modules"));
        assert!(!validate_name("favicon.ico"));
        assert!(!validate_name("has space"));
        assert!(!validate_name("nested/dir"));
        assert!(!validate_name("@scope/"));
        assert!(!validate_name("@/pkg"));
        assert!(!validate_name("@scope/a/b"));
    }

    #[test]
    fn closures_act_as_validators() {
        let only_foo = |name: &str| name.starts_with("foo");
        assert!(only_foo.is_valid("foobar"));
        assert!(!only_foo.is_valid("bar"));
    }
}
