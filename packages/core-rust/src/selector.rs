//! Label selectors used by network service matches.
//!
//! A selector is a label map. It is satisfied by a label set that contains
//! every selector key with an equal value. Selector values may reference
//! requester labels as `{{.key}}`, which are substituted before comparison.

use crate::connection::Labels;

const TEMPLATE_OPEN: &str = "{{.";
const TEMPLATE_CLOSE: &str = "}}";

/// Replaces every `{{.key}}` in `value` with `values[key]`.
///
/// Returns `None` when a referenced key is missing or a template is left
/// unterminated: such a selector value cannot match anything.
#[must_use]
pub fn render(value: &str, values: &Labels) -> Option<String> {
    if !value.contains(TEMPLATE_OPEN) {
        return Some(value.to_string());
    }
    let mut rendered = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find(TEMPLATE_OPEN) {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + TEMPLATE_OPEN.len()..];
        let end = after_open.find(TEMPLATE_CLOSE)?;
        let key = after_open[..end].trim();
        rendered.push_str(values.get(key)?);
        rest = &after_open[end + TEMPLATE_CLOSE.len()..];
    }
    rendered.push_str(rest);
    Some(rendered)
}

/// True when every entry of `selector`, rendered against `values`, is
/// present in `labels`. The empty selector is satisfied by anything.
#[must_use]
pub fn is_subset(labels: &Labels, selector: &Labels, values: &Labels) -> bool {
    selector.iter().all(|(key, expected)| {
        render(expected, values)
            .is_some_and(|expected| labels.get(key).is_some_and(|actual| *actual == expected))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_anything() {
        assert!(is_subset(&Labels::new(), &Labels::new(), &Labels::new()));
        assert!(is_subset(&labels(&[("a", "b")]), &Labels::new(), &Labels::new()));
    }

    #[test]
    fn selector_requires_exact_values() {
        let have = labels(&[("app", "firewall"), ("zone", "a")]);
        assert!(is_subset(&have, &labels(&[("app", "firewall")]), &Labels::new()));
        assert!(!is_subset(&have, &labels(&[("app", "gateway")]), &Labels::new()));
        assert!(!is_subset(&have, &labels(&[("tier", "web")]), &Labels::new()));
    }

    #[test]
    fn templates_take_requester_values() {
        let requester = labels(&[("color", "red")]);
        let endpoint = labels(&[("color", "red")]);
        assert!(is_subset(&endpoint, &labels(&[("color", "{{.color}}")]), &requester));
        assert!(!is_subset(
            &labels(&[("color", "blue")]),
            &labels(&[("color", "{{.color}}")]),
            &requester
        ));
    }

    #[test]
    fn template_with_missing_key_never_matches() {
        assert_eq!(render("{{.missing}}", &Labels::new()), None);
        assert_eq!(render("{{.open", &Labels::new()), None);
    }

    #[test]
    fn render_handles_mixed_text() {
        let values = labels(&[("app", "vpn"), ("zone", "a")]);
        assert_eq!(
            render("{{.app}}-{{ .zone }}-x", &values).as_deref(),
            Some("vpn-a-x")
        );
    }

    proptest! {
        #[test]
        fn labels_always_satisfy_their_own_subsets(
            map in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..6),
            keep in proptest::collection::vec(any::<bool>(), 6),
        ) {
            let selector: Labels = map
                .iter()
                .zip(keep.iter().cycle())
                .filter(|(_, keep)| **keep)
                .map(|((k, v), _)| (k.clone(), v.clone()))
                .collect();
            prop_assert!(is_subset(&map, &selector, &Labels::new()));
        }

        #[test]
        fn foreign_key_never_matches(map in proptest::collection::btree_map("[a-z]{1,6}", "[a-z]{1,6}", 0..6)) {
            let mut selector = Labels::new();
            selector.insert("UPPER".to_string(), "x".to_string());
            prop_assert!(!is_subset(&map, &selector, &Labels::new()));
        }
    }
}
