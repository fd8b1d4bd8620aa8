//! Free-text query matching against package summaries.
//!
//! A query is split on whitespace; every term must match (logical AND).
//! `author:<value>` terms match against the author field, any other term
//! matches against `name`, `displayName` and `description`. Matching is plain
//! case-sensitive substring containment.

use crate::model::{PackageSummary, Person};

const AUTHOR_PREFIX: &str = "author:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Author(String),
    Text(String),
}

impl Term {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix(AUTHOR_PREFIX) {
            Some(value) => Self::Author(value.to_string()),
            None => Self::Text(raw.to_string()),
        }
    }

    fn matches(&self, pkg: &PackageSummary) -> bool {
        match self {
            Self::Author(needle) => pkg
                .author
                .as_ref()
                .is_some_and(|author| person_matches(author, needle)),
            Self::Text(needle) => [
                Some(pkg.name.as_str()),
                pkg.display_name.as_deref(),
                pkg.description.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.contains(needle.as_str())),
        }
    }
}

fn person_matches(person: &Person, needle: &str) -> bool {
    person.strings().into_iter().any(|s| s.contains(needle))
}

/// Compiled predicate over [`PackageSummary`].
#[derive(Debug, Clone, Default)]
pub struct QueryMatcher {
    terms: Vec<Term>,
}

impl QueryMatcher {
    /// Compile `text`; empty or whitespace-only text matches everything.
    pub fn compile(text: &str) -> Self {
        Self {
            terms: text.split_whitespace().map(Term::parse).collect(),
        }
    }

    pub fn matches(&self, pkg: &PackageSummary) -> bool {
        self.terms.iter().all(|term| term.matches(pkg))
    }

    pub fn is_match_all(&self) -> bool {
        self.terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pkg(name: &str, description: Option<&str>, author: Option<Person>) -> PackageSummary {
        PackageSummary {
            name: name.into(),
            description: description.map(str::to_string),
            author,
            ..Default::default()
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        let m = QueryMatcher::compile("   ");
        assert!(m.is_match_all());
        assert!(m.matches(&pkg("anything", None, None)));
    }

    #[test]
    fn text_term_matches_name_or_description() {
        let m = QueryMatcher::compile("pad");
        assert!(m.matches(&pkg("left-pad", None, None)));
        assert!(m.matches(&pkg("strings", Some("pad a string"), None)));
        assert!(!m.matches(&pkg("strings", Some("trim a string"), None)));
    }

    #[test]
    fn display_name_is_searched_when_present() {
        let mut p = pkg("x", None, None);
        p.display_name = Some("Fancy Widget".into());
        assert!(QueryMatcher::compile("Widget").matches(&p));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!QueryMatcher::compile("React").matches(&pkg("react", None, None)));
    }

    #[test]
    fn all_terms_must_match() {
        let m = QueryMatcher::compile("left pad");
        assert!(m.matches(&pkg("left-pad", None, None)));
        assert!(!m.matches(&pkg("right-pad", None, None)));
    }

    #[test]
    fn author_term_matches_plain_string() {
        let m = QueryMatcher::compile("author:alice");
        let alice = pkg("foo", None, Some(Person::Text("alice@example.com".into())));
        let bob = pkg("foo", None, Some(Person::Text("bob".into())));
        assert!(m.matches(&alice));
        assert!(!m.matches(&bob));
        assert!(!m.matches(&pkg("foo", None, None)));
    }

    #[test]
    fn author_term_matches_any_string_field_of_record() {
        let record: Person = serde_json::from_value(json!({
            "name": "Carol",
            "email": "carol@corp.dev",
            "age": 42
        }))
        .unwrap();
        let p = pkg("foo", None, Some(record));
        assert!(QueryMatcher::compile("author:corp.dev").matches(&p));
        assert!(QueryMatcher::compile("author:Carol").matches(&p));
        assert!(!QueryMatcher::compile("author:42").matches(&p));
    }

    #[test]
    fn author_and_text_terms_combine() {
        let p = pkg("foo-utils", None, Some(Person::named("dave", None)));
        assert!(QueryMatcher::compile("foo author:dave").matches(&p));
        assert!(!QueryMatcher::compile("bar author:dave").matches(&p));
    }
}
