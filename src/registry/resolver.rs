//! Conflict resolution for competing ownership claims
//!
//! Merging is a pure function of the current record and the incoming update,
//! so every replica that sees the same pair reaches the same result no matter
//! which order the claims arrived in.

use super::record::{NickRecord, NickUpdate};
use std::cmp::Ordering;

/// Outcome of merging an incoming update into the current state of one nick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Store this record, creating or replacing the current one
    Store(NickRecord),
    /// Delete the current record
    Remove,
    /// Current state stands; nothing visible changes
    Unchanged,
}

impl Resolution {
    /// Whether applying this resolution changes visible state
    pub fn is_change(&self) -> bool {
        !matches!(self, Resolution::Unchanged)
    }

    /// Apply this resolution to an owned state, yielding the new state
    pub fn apply_to(self, current: Option<NickRecord>) -> Option<NickRecord> {
        match self {
            Resolution::Store(record) => Some(record),
            Resolution::Remove => None,
            Resolution::Unchanged => current,
        }
    }
}

/// Merge `incoming` into `current`.
///
/// Rules, first match wins:
/// 1. nothing held: a claim is stored, an unregistration is a no-op;
/// 2. same claim time and account: keep the binding, take the later `last_used`;
/// 3. later claim time, or equal claim time with a smaller account: incoming
///    replaces current outright (the sentinel sorts below every account);
/// 4. otherwise current wins.
pub fn resolve(current: Option<&NickRecord>, incoming: &NickUpdate) -> Resolution {
    let Some(current) = current else {
        return match incoming.to_record() {
            Some(record) => Resolution::Store(record),
            None => Resolution::Unchanged,
        };
    };

    if incoming.claim_time == current.claim_time
        && incoming.account.as_deref() == Some(current.account.as_str())
    {
        if incoming.last_used > current.last_used {
            let mut merged = current.clone();
            merged.last_used = incoming.last_used;
            return Resolution::Store(merged);
        }
        return Resolution::Unchanged;
    }

    if incoming_wins(current, incoming) {
        match incoming.to_record() {
            Some(record) => Resolution::Store(record),
            None => Resolution::Remove,
        }
    } else {
        Resolution::Unchanged
    }
}

/// Fold an update into an owned state. Convenience over [`resolve`] for
/// replaying histories.
pub fn merge(current: Option<NickRecord>, incoming: &NickUpdate) -> Option<NickRecord> {
    resolve(current.as_ref(), incoming).apply_to(current)
}

fn incoming_wins(current: &NickRecord, incoming: &NickUpdate) -> bool {
    match incoming.claim_time.cmp(&current.claim_time) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match incoming.account.as_deref() {
            None => true,
            Some(account) => account < current.account.as_str(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn claim(account: &str, claim_time: i64, last_used: i64) -> NickUpdate {
        NickUpdate::claim("nick", account, claim_time, last_used)
    }

    #[test]
    fn test_empty_state() {
        let update = claim("acctA", 10, 10);
        assert_eq!(
            resolve(None, &update),
            Resolution::Store(NickRecord::new("nick", "acctA", 10, 10))
        );
        assert_eq!(
            resolve(None, &NickUpdate::unregister("nick", 10)),
            Resolution::Unchanged
        );
    }

    #[test]
    fn test_same_binding_takes_later_last_used() {
        let current = NickRecord::new("nick", "acctA", 10, 20);

        let newer = claim("acctA", 10, 30);
        assert_eq!(
            resolve(Some(&current), &newer),
            Resolution::Store(NickRecord::new("nick", "acctA", 10, 30))
        );

        let older = claim("acctA", 10, 15);
        assert_eq!(resolve(Some(&current), &older), Resolution::Unchanged);
    }

    #[test]
    fn test_later_claim_wins() {
        let current = NickRecord::new("bob", "acctA", 50, 50);
        let update = NickUpdate::claim("bob", "acctB", 80, 80);
        let current = merge(Some(current), &update);
        assert_eq!(current.as_ref().map(|r| r.account.as_str()), Some("acctB"));

        let stale = NickUpdate::claim("bob", "acctC", 60, 90);
        assert_eq!(resolve(current.as_ref(), &stale), Resolution::Unchanged);
    }

    #[test]
    fn test_tie_break_smaller_account() {
        let x = claim("acctX", 100, 100);
        let y = claim("acctY", 100, 101);

        let via_x = merge(merge(None, &x), &y);
        let via_y = merge(merge(None, &y), &x);
        assert_eq!(via_x, via_y);
        assert_eq!(via_x.map(|r| r.account), Some("acctX".to_string()));
    }

    #[test]
    fn test_unregistration_wins_on_later_claim_time() {
        let current = NickRecord::new("nick", "acctA", 10, 10);
        assert_eq!(
            resolve(Some(&current), &NickUpdate::unregister("nick", 11)),
            Resolution::Remove
        );
        assert_eq!(
            resolve(Some(&current), &NickUpdate::unregister("nick", 9)),
            Resolution::Unchanged
        );
    }

    #[test]
    fn test_unregistration_wins_tie() {
        let current = NickRecord::new("nick", "acctA", 10, 10);
        assert_eq!(
            resolve(Some(&current), &NickUpdate::unregister("nick", 10)),
            Resolution::Remove
        );
    }

    #[test]
    fn test_release_then_older_claim_does_not_commute() {
        // Releases leave no trace, so an older claim arriving after the
        // release is indistinguishable from a fresh one.
        let older_claim = claim("acctA", 10, 10);
        let release = NickUpdate::unregister("nick", 11);

        let claim_first = merge(merge(None, &older_claim), &release);
        let release_first = merge(merge(None, &release), &older_claim);

        assert_eq!(claim_first, None);
        assert_eq!(release_first, Some(NickRecord::new("nick", "acctA", 10, 10)));
    }

    fn arb_claim() -> impl Strategy<Value = NickUpdate> {
        (
            prop::sample::select(vec!["acctA", "acctB", "acctC"]),
            0i64..4,
            0i64..4,
        )
            .prop_map(|(account, claim_time, last_used)| claim(account, claim_time, last_used))
    }

    fn arb_update() -> impl Strategy<Value = NickUpdate> {
        prop_oneof![
            3 => arb_claim(),
            1 => (0i64..4).prop_map(|at| NickUpdate::unregister("nick", at)),
        ]
    }

    proptest! {
        #[test]
        fn prop_merge_commutes(a in arb_claim(), b in arb_claim()) {
            let ab = merge(merge(None, &a), &b);
            let ba = merge(merge(None, &b), &a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_merge_idempotent(a in arb_update(), b in arb_update()) {
            let once = merge(merge(None, &a), &b);
            let twice = merge(once.clone(), &b);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_release_wins_ties_and_later_times(a in arb_claim(), at in 0i64..4) {
            let held = merge(None, &a);
            let after = merge(held.clone(), &NickUpdate::unregister("nick", at));
            if at >= a.claim_time {
                prop_assert_eq!(after, None);
            } else {
                prop_assert_eq!(after, held);
            }
        }

        #[test]
        fn prop_merge_associative(a in arb_claim(), b in arb_claim(), c in arb_claim()) {
            let left = merge(merge(merge(None, &a), &b), &c);
            let right = merge(merge(merge(None, &c), &b), &a);
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_last_used_never_regresses(a in arb_update(), b in arb_update()) {
            let first = merge(None, &a);
            let second = merge(first.clone(), &b);
            if let (Some(first), Some(second)) = (first, second) {
                if first.account == second.account && first.claim_time == second.claim_time {
                    prop_assert!(second.last_used >= first.last_used);
                }
            }
        }
    }
}
