use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

pub type RoleSet = BTreeSet<String>;

/// How a token's roles are compared with a resource's required roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePolicy {
    /// At least one required role is held.
    #[default]
    AnyOf,
    /// Every required role is held.
    AllOf,
}

impl FromStr for RolePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any_of" | "any" => Ok(RolePolicy::AnyOf),
            "all_of" | "all" => Ok(RolePolicy::AllOf),
            _ => Err(format!("Invalid role policy: {} (expected any_of or all_of)", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Role-based access decision. Pure: no I/O, no clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer {
    policy: RolePolicy,
}

impl Authorizer {
    pub fn new(policy: RolePolicy) -> Self {
        Self { policy }
    }

    /// An empty `required` set admits any authenticated subject.
    pub fn authorize(&self, token_roles: &[String], required: &RoleSet) -> Decision {
        if required.is_empty() {
            return Decision::Allow;
        }

        let allowed = match self.policy {
            RolePolicy::AnyOf => token_roles.iter().any(|role| required.contains(role)),
            RolePolicy::AllOf => required.iter().all(|role| token_roles.contains(role)),
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn required(names: &[&str]) -> RoleSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_any_of() {
        let authz = Authorizer::new(RolePolicy::AnyOf);
        assert_eq!(
            authz.authorize(&roles(&["bank_read"]), &required(&["bank_read"])),
            Decision::Allow
        );
        assert_eq!(
            authz.authorize(&roles(&["bank_read"]), &required(&["bank_read", "bank_admin"])),
            Decision::Allow
        );
        assert_eq!(
            authz.authorize(&roles(&["other"]), &required(&["bank_read"])),
            Decision::Deny
        );
        assert_eq!(authz.authorize(&[], &required(&["bank_read"])), Decision::Deny);
    }

    #[test]
    fn test_all_of() {
        let authz = Authorizer::new(RolePolicy::AllOf);
        assert_eq!(
            authz.authorize(&roles(&["bank_read"]), &required(&["bank_read", "bank_admin"])),
            Decision::Deny
        );
        assert_eq!(
            authz.authorize(
                &roles(&["bank_read", "bank_admin", "x"]),
                &required(&["bank_read", "bank_admin"])
            ),
            Decision::Allow
        );
        assert_eq!(authz.authorize(&[], &required(&["bank_read"])), Decision::Deny);
    }

    #[test]
    fn test_empty_required_allows_under_both_policies() {
        for policy in [RolePolicy::AnyOf, RolePolicy::AllOf] {
            let authz = Authorizer::new(policy);
            assert!(authz.authorize(&[], &RoleSet::new()).is_allowed());
            assert!(authz.authorize(&roles(&["a"]), &RoleSet::new()).is_allowed());
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("any_of".parse::<RolePolicy>(), Ok(RolePolicy::AnyOf));
        assert_eq!("ALL_OF".parse::<RolePolicy>(), Ok(RolePolicy::AllOf));
        assert!("some".parse::<RolePolicy>().is_err());
        assert_eq!(RolePolicy::default(), RolePolicy::AnyOf);
    }

    fn arb_roles() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("[a-e]", 0..5)
    }

    proptest! {
        #[test]
        fn any_of_allows_iff_intersection(held in arb_roles(), req in arb_roles()) {
            let token: Vec<String> = held.iter().cloned().collect();
            let decision = Authorizer::new(RolePolicy::AnyOf).authorize(&token, &req);
            let expected = req.is_empty() || !held.is_disjoint(&req);
            prop_assert_eq!(decision.is_allowed(), expected);
        }

        #[test]
        fn all_of_allows_iff_subset(held in arb_roles(), req in arb_roles()) {
            let token: Vec<String> = held.iter().cloned().collect();
            let decision = Authorizer::new(RolePolicy::AllOf).authorize(&token, &req);
            prop_assert_eq!(decision.is_allowed(), req.is_subset(&held));
        }

        #[test]
        fn decision_is_deterministic(held in arb_roles(), req in arb_roles()) {
            let token: Vec<String> = held.iter().cloned().collect();
            let authz = Authorizer::default();
            prop_assert_eq!(authz.authorize(&token, &req), authz.authorize(&token, &req));
        }
    }
}
