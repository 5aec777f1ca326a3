//! Policy evaluation with short-circuit grants and OR-combined filters

use super::decision::Decision;
use crate::error::{AuthzError, Result};
use crate::policy::{
    MergedPolicies, PolicyContext, PolicyFactory, PolicyInvocation, PolicyOutcome, PolicyRef,
};
use crate::predicate::{self, Predicate};
use std::sync::Arc;
use tracing::{debug, trace};

/// Walks merged policies for the caller's roles and produces a [`Decision`]
///
/// Rules, in order:
/// - no policies at all grants (default-open)
/// - policies bound to roles the caller lacks are skipped
/// - the first grant wins and nothing after it runs
/// - constant denies are skipped
/// - filters accumulate and are OR-combined
/// - nothing granted and no filters denies
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    factory: Arc<PolicyFactory>,
}

impl PolicyEvaluator {
    pub fn new(factory: Arc<PolicyFactory>) -> Self {
        Self { factory }
    }

    /// Evaluate merged policies for one check
    ///
    /// # Errors
    ///
    /// `PolicyContractViolation` when a policy fails or returns an invalid
    /// predicate; `Configuration` when an invocation cannot be constructed.
    pub fn evaluate(&self, merged: &MergedPolicies, ctx: &PolicyContext<'_>) -> Result<Decision> {
        let check = ctx.resource.check_name();

        if merged.is_empty() {
            debug!("No valid policies found, granting full access for {}", check);
            return Ok(Decision::Grant);
        }

        let mut filters: Vec<Predicate> = Vec::new();

        for (role, policies) in merged {
            if !ctx.roles.contains(role) {
                trace!("Skipping {} policies for {} as they are for {}", policies.len(), check, role);
                continue;
            }

            for (name, policy) in policies {
                let invocation = match policy {
                    PolicyRef::Grant => {
                        debug!("Policy ({}) accepted, granting full access for {}", name, check);
                        return Ok(Decision::Grant);
                    }
                    PolicyRef::Deny => {
                        trace!("Policy ({}) is a constant deny, skipping", name);
                        continue;
                    }
                    PolicyRef::Invocation(invocation) => invocation,
                };

                match self.run(invocation, ctx, &check)? {
                    PolicyOutcome::Grant => {
                        debug!("Policy ({}) accepted, granting full access for {}", name, check);
                        return Ok(Decision::Grant);
                    }
                    PolicyOutcome::Skip => {
                        trace!("Policy ({}) doesn't apply, skipping", name);
                    }
                    PolicyOutcome::Filter(filter) => {
                        filter.validate().map_err(|reason| AuthzError::PolicyContractViolation {
                            policy: invocation.policy.clone(),
                            check: check.clone(),
                            reason,
                        })?;
                        debug!("Policy ({}) has a filter for {}", name, check);
                        filters.push(filter);
                    }
                }
            }
        }

        if filters.is_empty() {
            debug!("No policies matched, denying access for {}", check);
            return Ok(Decision::Deny);
        }

        let combined = predicate::combine(filters)?;
        trace!("Applying filter to {}: {}", check, combined);
        Ok(Decision::Filter(combined))
    }

    fn run(
        &self,
        invocation: &PolicyInvocation,
        ctx: &PolicyContext<'_>,
        check: &str,
    ) -> Result<PolicyOutcome> {
        let policy = self.factory.construct(invocation)?;

        policy.run(ctx).map_err(|e| match e {
            AuthzError::PolicyContractViolation { .. } => e,
            other => AuthzError::PolicyContractViolation {
                policy: invocation.policy.clone(),
                check: check.to_string(),
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Policy, PolicyRegistry, PolicyTableBuilder, ResourceTypeDecl};
    use crate::types::{Principal, ResourceContext, RoleSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Broken;

    impl Policy for Broken {
        fn run(&self, _ctx: &PolicyContext<'_>) -> Result<PolicyOutcome> {
            Err(AuthzError::Internal("returned a string".to_string()))
        }
    }

    struct EmptyOr;

    impl Policy for EmptyOr {
        fn run(&self, _ctx: &PolicyContext<'_>) -> Result<PolicyOutcome> {
            Ok(PolicyOutcome::Filter(Predicate::Or(vec![])))
        }
    }

    static COUNTED_RUNS: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Policy for Counted {
        fn run(&self, _ctx: &PolicyContext<'_>) -> Result<PolicyOutcome> {
            COUNTED_RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(PolicyOutcome::Skip)
        }
    }

    fn factory() -> Arc<PolicyFactory> {
        let mut factory = PolicyFactory::with_builtins();
        factory.register("broken", |_| Ok(Box::new(Broken) as Box<dyn Policy>));
        factory.register("empty_or", |_| Ok(Box::new(EmptyOr) as Box<dyn Policy>));
        factory.register("counted", |_| Ok(Box::new(Counted) as Box<dyn Policy>));
        Arc::new(factory)
    }

    fn roles(items: &[&str]) -> RoleSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn evaluate(table: crate::policy::PolicyTable, held: &[&str], principal: Option<&Principal>) -> Result<Decision> {
        let factory = factory();
        let registry = PolicyRegistry::builder()
            .declare(ResourceTypeDecl::new("Note").with_policies(table))
            .build(&factory)?;
        let merged = registry.merged_policies("Note", "find");
        let held = roles(held);
        let resource = ResourceContext::new("Note", "find");
        let ctx = PolicyContext {
            principal,
            roles: &held,
            resource: &resource,
        };
        PolicyEvaluator::new(factory).evaluate(&merged, &ctx)
    }

    fn owner(attr: &str) -> PolicyRef {
        PolicyInvocation::new("is_owner").with("owner_attribute", attr).into()
    }

    #[test]
    fn test_no_policies_grants() {
        let decision = evaluate(PolicyTableBuilder::new().build(), &["public"], None).unwrap();
        assert_eq!(decision, Decision::Grant);
    }

    #[test]
    fn test_grant_short_circuits_before_broken_policy() {
        let table = PolicyTableBuilder::new()
            .bind_named("registered", "find", "grant", PolicyRef::Grant)
            .bind_named("registered", "find", "broken", PolicyRef::invoke("broken"))
            .build();

        let decision = evaluate(table, &["public", "registered"], None).unwrap();
        assert_eq!(decision, Decision::Grant);
    }

    #[test]
    fn test_broken_policy_is_contract_violation() {
        let table = PolicyTableBuilder::new()
            .bind("registered", "find", PolicyRef::invoke("broken"))
            .build();

        match evaluate(table, &["registered"], None) {
            Err(AuthzError::PolicyContractViolation { policy, check, .. }) => {
                assert_eq!(policy, "broken");
                assert_eq!(check, "Note:find");
            }
            other => panic!("Expected PolicyContractViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_predicate_is_contract_violation() {
        let table = PolicyTableBuilder::new()
            .bind("registered", "find", PolicyRef::invoke("empty_or"))
            .build();

        assert!(matches!(
            evaluate(table, &["registered"], None),
            Err(AuthzError::PolicyContractViolation { .. })
        ));
    }

    #[test]
    fn test_roles_not_held_are_skipped() {
        let before = COUNTED_RUNS.load(Ordering::SeqCst);
        let table = PolicyTableBuilder::new()
            .bind("admin", "find", PolicyRef::invoke("counted"))
            .bind("editor", "find", PolicyRef::Grant)
            .build();

        let decision = evaluate(table, &["public"], None).unwrap();
        assert_eq!(decision, Decision::Deny);
        assert_eq!(COUNTED_RUNS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_constant_deny_with_no_filters_denies() {
        let table = PolicyTableBuilder::new().bind("public", "find", PolicyRef::Deny).build();
        assert_eq!(evaluate(table, &["public"], None).unwrap(), Decision::Deny);
    }

    #[test]
    fn test_skip_only_denies() {
        // Anonymous callers make is_owner skip
        let table = PolicyTableBuilder::new().bind("public", "find", owner("ownerId")).build();
        assert_eq!(evaluate(table, &["public"], None).unwrap(), Decision::Deny);
    }

    #[test]
    fn test_filters_are_or_combined_in_order() {
        let table = PolicyTableBuilder::new()
            .bind("registered", "find", owner("ownerId"))
            .bind("editor", "find", owner("editorId"))
            .build();

        let principal = Principal::new("U1");
        let decision = evaluate(table, &["registered", "editor"], Some(&principal)).unwrap();
        assert_eq!(
            decision,
            Decision::Filter(Predicate::Or(vec![
                Predicate::eq("ownerId", "U1"),
                Predicate::eq("editorId", "U1"),
            ]))
        );
    }

    #[test]
    fn test_single_filter_is_unwrapped() {
        let table = PolicyTableBuilder::new().bind("registered", "find", owner("ownerId")).build();
        let principal = Principal::new("U1");
        let decision = evaluate(table, &["registered"], Some(&principal)).unwrap();
        assert_eq!(decision, Decision::Filter(Predicate::eq("ownerId", "U1")));
    }

    #[test]
    fn test_grant_after_filter_still_grants() {
        let table = PolicyTableBuilder::new()
            .bind("registered", "find", owner("ownerId"))
            .bind("editor", "find", PolicyRef::Grant)
            .build();

        let principal = Principal::new("U1");
        let decision = evaluate(table, &["registered", "editor"], Some(&principal)).unwrap();
        assert_eq!(decision, Decision::Grant);
    }
}
