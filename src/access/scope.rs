//! State scoping for every listing and single-record lookup.

use crate::db::SqlFilter;
use crate::principal::Principal;

use super::permissions::has_all_state_access;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateScope {
    /// No restriction.
    All,
    /// Only these states (compared trimmed and case-insensitively). May be empty,
    /// in which case nothing matches.
    States(Vec<String>),
}

impl StateScope {
    pub fn for_principal(principal: &Principal) -> Self {
        if has_all_state_access(principal) {
            StateScope::All
        } else {
            StateScope::States(principal.assigned_states())
        }
    }

    /// Restrict `filter` to rows whose `column` is in scope.
    pub fn apply(&self, filter: &mut SqlFilter, column: &str) {
        if let StateScope::States(states) = self {
            filter.in_normalized(column, states);
        }
    }

    /// A fresh filter holding only the scope clause.
    pub fn filter(&self, column: &str) -> SqlFilter {
        let mut filter = SqlFilter::new();
        self.apply(&mut filter, column);
        filter
    }

    /// In-memory check for a single state value.
    pub fn allows(&self, state: Option<&str>) -> bool {
        match self {
            StateScope::All => true,
            StateScope::States(states) => state.is_some_and(|s| {
                let s = s.trim();
                states.iter().any(|allowed| allowed.trim().eq_ignore_ascii_case(s))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::fixtures::admin;

    #[test]
    fn test_all_access_adds_no_clause() {
        let scope = StateScope::for_principal(&admin(1, &["super_admin"], &[("Goa", true)]));
        assert_eq!(scope, StateScope::All);
        assert!(scope.filter("state").is_empty());
    }

    #[test]
    fn test_assigned_states_restrict() {
        let scope = StateScope::for_principal(&admin(2, &[], &[("Karnataka", true)]));
        assert_eq!(
            scope.filter("state").where_sql(),
            " WHERE LOWER(TRIM(state)) IN (?)"
        );
        assert!(scope.allows(Some(" karnataka")));
        assert!(!scope.allows(Some("Goa")));
        assert!(!scope.allows(None));
    }

    #[test]
    fn test_only_inactive_assignments_match_nothing() {
        let scope = StateScope::for_principal(&admin(3, &[], &[("Goa", false)]));
        assert_eq!(scope, StateScope::States(vec![]));
        assert_eq!(scope.filter("state").where_sql(), " WHERE 1 = 0");
        assert!(!scope.allows(Some("Goa")));
    }
}
