//! Property-based tests for the combinator, merge precedence and evaluation

use proptest::prelude::*;
use serde_json::json;
use warden_authz::policy::{
    PolicyFactory, PolicyInvocation, PolicyRef, PolicyRegistry, PolicyTableBuilder, ResourceTypeDecl,
};
use warden_authz::predicate::combine;
use warden_authz::{Decision, Predicate, Principal, RbacEngine, RequestContext, ResourceContext};

fn owner(attr: &str) -> PolicyRef {
    PolicyInvocation::new("is_owner").with("owner_attribute", attr).into()
}

fn arb_policy() -> impl Strategy<Value = PolicyRef> {
    prop_oneof![
        Just(PolicyRef::Grant),
        Just(PolicyRef::Deny),
        "[a-z]{1,8}".prop_map(|attr| owner(&attr)),
    ]
}

fn arb_role() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("public".to_string()),
        Just("registered".to_string()),
        Just("admin".to_string()),
        Just("editor".to_string()),
    ]
}

proptest! {
    #[test]
    fn test_combine_preserves_every_filter(
        fields in proptest::collection::vec("[a-z]{1,6}", 1..8)
    ) {
        let predicates: Vec<Predicate> = fields.iter().map(|f| Predicate::eq(f.clone(), "x")).collect();
        let combined = combine(predicates.clone()).unwrap();

        if predicates.len() == 1 {
            prop_assert_eq!(combined, predicates[0].clone());
        } else {
            prop_assert_eq!(combined, Predicate::Or(predicates));
        }
    }

    #[test]
    fn test_or_matches_when_any_term_matches(
        owner_id in "[A-Z][0-9]{1,3}",
        team_id in "[A-Z][0-9]{1,3}",
        record_owner in "[A-Z][0-9]{1,3}",
        record_team in "[A-Z][0-9]{1,3}"
    ) {
        let filter = combine(vec![
            Predicate::eq("ownerId", owner_id.clone()),
            Predicate::eq("teamId", team_id.clone()),
        ]).unwrap();
        let record = json!({"ownerId": record_owner, "teamId": record_team});

        prop_assert_eq!(
            filter.matches(&record),
            record_owner == owner_id || record_team == team_id
        );
    }

    #[test]
    fn test_most_specific_level_wins(
        ancestor in arb_policy(),
        subtype in arb_policy(),
        override_policy in proptest::option::of(arb_policy())
    ) {
        let mut builder = PolicyRegistry::builder()
            .declare(ResourceTypeDecl::new("A").with_policies(
                PolicyTableBuilder::new().bind("editor", "update", ancestor).build(),
            ))
            .declare(ResourceTypeDecl::new("B").with_parent("A").with_policies(
                PolicyTableBuilder::new().bind("editor", "update", subtype.clone()).build(),
            ));

        if let Some(policy) = override_policy.clone() {
            let mut by_op = indexmap::IndexMap::new();
            by_op.insert("update".to_string(), policy.into());
            let mut by_type = indexmap::IndexMap::new();
            by_type.insert("B".to_string(), by_op);
            let mut overrides = warden_authz::policy::OverrideTable::new();
            overrides.insert("editor".to_string(), by_type);
            builder = builder.with_overrides(overrides);
        }

        let registry = builder.build(&PolicyFactory::with_builtins()).unwrap();
        let merged = registry.merged_policies("B", "update");
        let expected = override_policy.unwrap_or(subtype);
        prop_assert_eq!(&merged["editor"]["default"], &expected);
    }

    #[test]
    fn test_decisions_are_deterministic(
        bindings in proptest::collection::vec((arb_role(), arb_policy()), 0..8),
        held in proptest::collection::vec(arb_role(), 0..3),
        principal_id in "[A-Z][0-9]{1,4}"
    ) {
        let mut table = PolicyTableBuilder::new();
        for (i, (role, policy)) in bindings.iter().enumerate() {
            table = table.bind_named(role.clone(), "find", format!("p{}", i), policy.clone());
        }

        let engine = RbacEngine::builder()
            .declare(ResourceTypeDecl::new("Note").with_policies(table.build()))
            .build()
            .unwrap();

        let ctx = RequestContext::for_principal(Principal::new(principal_id).with_roles(held));
        let resource = ResourceContext::new("Note", "find");

        let first = engine.can(&ctx, &resource).unwrap();
        let second = engine.can(&ctx, &resource).unwrap();
        prop_assert_eq!(&first, &second);

        // A filtered decision is never reported for a table without invocations
        let has_invocation = bindings.iter().any(|(_, p)| matches!(p, PolicyRef::Invocation(_)));
        if !has_invocation {
            prop_assert!(!first.is_filter());
        }
        if bindings.is_empty() {
            prop_assert_eq!(first, Decision::Grant);
        }
    }
}
