//! Property tests for the permission decision.

use authz_core::{PermissionCode, PermissionSet, RequiredPermissions, decide, unsatisfied};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,8}"
}

fn code() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..4).prop_map(|parts| parts.join(":"))
}

fn granted(codes: &[String]) -> PermissionSet {
    codes.iter().filter_map(|c| PermissionCode::parse(c)).collect()
}

proptest! {
    #[test]
    fn exact_grant_always_allows(required in code(), extra in prop::collection::vec(code(), 0..5)) {
        let mut codes = extra;
        codes.push(required.clone());
        prop_assert!(decide(&RequiredPermissions::from_codes([&required]), &granted(&codes)));
    }

    #[test]
    fn global_wildcard_allows_anything(required in prop::collection::vec(code(), 0..5)) {
        let perms = granted(&["*".to_string()]);
        prop_assert!(decide(&RequiredPermissions::from_codes(&required), &perms));
    }

    #[test]
    fn resource_wildcard_allows_every_action(resource in segment(), action in segment()) {
        let perms = granted(&[format!("{resource}:*")]);
        let required = RequiredPermissions::from_codes([format!("{resource}:{action}")]);
        prop_assert!(decide(&required, &perms));
    }

    #[test]
    fn empty_grant_denies_any_requirement(required in prop::collection::vec(code(), 1..5)) {
        prop_assert!(!decide(&RequiredPermissions::from_codes(&required), &PermissionSet::new()));
    }

    #[test]
    fn case_does_not_change_the_outcome(
        required in prop::collection::vec(code(), 0..4),
        grants in prop::collection::vec(code(), 0..6),
    ) {
        let lower = decide(&RequiredPermissions::from_codes(&required), &granted(&grants));
        let upper_required: Vec<String> = required.iter().map(|c| c.to_uppercase()).collect();
        let upper_grants: Vec<String> = grants.iter().map(|c| c.to_uppercase()).collect();
        let upper = decide(&RequiredPermissions::from_codes(&upper_required), &granted(&upper_grants));
        prop_assert_eq!(lower, upper);
    }

    #[test]
    fn decide_agrees_with_unsatisfied(
        required in prop::collection::vec(code(), 1..4),
        grants in prop::collection::vec(code(), 0..6),
    ) {
        let required = RequiredPermissions::from_codes(&required);
        let perms = granted(&grants);
        let missing = unsatisfied(&required, &perms);
        prop_assert_eq!(decide(&required, &perms), missing.len() < required.codes().len());
    }
}
