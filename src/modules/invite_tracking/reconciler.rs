use super::snapshot::{GuildSnapshot, InviteRecord};
use poise::serenity_prelude as serenity;
use std::cmp::Ordering;

/// A member join waiting to be attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberJoin {
    pub guild: serenity::GuildId,
    pub member: serenity::UserId,
    /// Set only when the platform says which code was used.
    pub invite_code: Option<String>,
}

/// One join attributed to the creator of an invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionEvent {
    pub guild: serenity::GuildId,
    pub member: serenity::UserId,
    pub inviter: serenity::UserId,
    pub code: String,
    /// Uses gained since the previous baseline. Several joins between two
    /// reconciliations still produce a single event.
    pub gained: u64,
    /// Uses summed over every live invite created by `inviter`.
    pub inviter_total: u64,
}

/// A counter that went backwards without a delete event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReset {
    pub code: String,
    pub previous: u64,
    pub current: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub events: Vec<AttributionEvent>,
    /// Replaces the prior snapshot wholesale, whatever the outcome.
    pub snapshot: GuildSnapshot,
    pub resets: Vec<CounterReset>,
    /// Codes that gained uses but have no inviter (vanity, widget).
    pub unattributed: Vec<String>,
}

struct Candidate<'a> {
    invite: &'a InviteRecord,
    gained: u64,
}

/// Diffs the prior snapshot against the live invite list.
///
/// Never fails: without a prior baseline there is nothing to diff against, so
/// the live list simply becomes the new one. A prior snapshot assembled only
/// from create events counts as no baseline.
pub fn reconcile(
    join: &MemberJoin,
    prior: Option<&GuildSnapshot>,
    live: &[InviteRecord],
) -> Reconciliation {
    let snapshot = GuildSnapshot::from_invites(join.guild, live);
    let live: Vec<&InviteRecord> = live.iter().filter(|i| i.guild == join.guild).collect();

    let Some(prior) = prior.filter(|p| p.is_baselined()) else {
        return Reconciliation {
            events: vec![],
            snapshot,
            resets: vec![],
            unattributed: vec![],
        };
    };

    let mut candidates = vec![];
    let mut resets = vec![];

    for invite in live.iter().copied() {
        let previous = prior.uses(&invite.code).unwrap_or(0);
        match invite.uses.cmp(&previous) {
            Ordering::Greater => candidates.push(Candidate {
                invite,
                gained: invite.uses - previous,
            }),
            Ordering::Less => resets.push(CounterReset {
                code: invite.code.clone(),
                previous,
                current: invite.uses,
            }),
            Ordering::Equal => {}
        }
    }

    candidates.sort_by(|a, b| a.invite.code.cmp(&b.invite.code));

    if let Some(code) = &join.invite_code {
        if candidates.iter().any(|c| &c.invite.code == code) {
            candidates.retain(|c| &c.invite.code == code);
        }
    }

    let mut events = vec![];
    let mut unattributed = vec![];

    for candidate in candidates {
        let Some(inviter) = candidate.invite.inviter else {
            unattributed.push(candidate.invite.code.clone());
            continue;
        };

        events.push(AttributionEvent {
            guild: join.guild,
            member: join.member,
            inviter,
            code: candidate.invite.code.clone(),
            gained: candidate.gained,
            inviter_total: total_uses(live.iter().copied(), inviter),
        });
    }

    Reconciliation {
        events,
        snapshot,
        resets,
        unattributed,
    }
}

fn total_uses<'a>(
    invites: impl Iterator<Item = &'a InviteRecord>,
    inviter: serenity::UserId,
) -> u64 {
    invites
        .filter(|i| i.inviter == Some(inviter))
        .map(|i| i.uses)
        .sum()
}

/// Total uses across every live invite the member created.
pub fn inviter_total(live: &[InviteRecord], inviter: serenity::UserId) -> u64 {
    total_uses(live.iter(), inviter)
}

/// The member's live invites, ordered by code.
pub fn invites_by(live: &[InviteRecord], inviter: serenity::UserId) -> Vec<InviteRecord> {
    let mut invites: Vec<InviteRecord> = live
        .iter()
        .filter(|i| i.inviter == Some(inviter))
        .cloned()
        .collect();
    invites.sort_by(|a, b| a.code.cmp(&b.code));
    invites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u1() -> serenity::UserId {
        serenity::UserId::new(1)
    }

    fn u2() -> serenity::UserId {
        serenity::UserId::new(2)
    }

    fn member() -> serenity::UserId {
        serenity::UserId::new(99)
    }

    fn guild() -> serenity::GuildId {
        serenity::GuildId::new(10)
    }

    fn join() -> MemberJoin {
        MemberJoin {
            guild: guild(),
            member: member(),
            invite_code: None,
        }
    }

    fn invite(code: &str, uses: u64, inviter: Option<serenity::UserId>) -> InviteRecord {
        InviteRecord {
            code: code.to_string(),
            uses,
            inviter,
            guild: guild(),
        }
    }

    fn snapshot(entries: &[(&str, u64)]) -> GuildSnapshot {
        let invites: Vec<_> = entries
            .iter()
            .map(|(code, uses)| invite(code, *uses, None))
            .collect();
        GuildSnapshot::from_invites(guild(), &invites)
    }

    #[test]
    fn single_increment_is_attributed() {
        let prior = snapshot(&[("abc", 5)]);
        let live = [invite("abc", 6, Some(u1()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert_eq!(result.events.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.inviter, u1());
        assert_eq!(event.code, "abc");
        assert_eq!(event.member, member());
        assert_eq!(event.gained, 1);
        assert_eq!(result.snapshot, snapshot(&[("abc", 6)]));
    }

    #[test]
    fn new_code_counts_full_uses() {
        let prior = snapshot(&[]);
        let live = [invite("xyz", 1, Some(u2()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].inviter, u2());
        assert_eq!(result.snapshot, snapshot(&[("xyz", 1)]));
    }

    #[test]
    fn deleted_invite_drops_from_baseline() {
        let prior = snapshot(&[("abc", 5)]);

        let result = reconcile(&join(), Some(&prior), &[]);

        assert!(result.events.is_empty());
        assert!(result.snapshot.is_empty());
    }

    #[test]
    fn counter_reset_is_flagged_not_attributed() {
        let prior = snapshot(&[("abc", 5)]);
        let live = [invite("abc", 3, Some(u1()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert!(result.events.is_empty());
        assert_eq!(
            result.resets,
            vec![CounterReset {
                code: "abc".to_string(),
                previous: 5,
                current: 3,
            }]
        );
        assert_eq!(result.snapshot, snapshot(&[("abc", 3)]));
    }

    #[test]
    fn unchanged_counts_produce_nothing() {
        let prior = snapshot(&[("abc", 5)]);
        let live = [invite("abc", 5, Some(u1()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert!(result.events.is_empty());
        assert!(result.resets.is_empty());
    }

    #[test]
    fn missing_prior_adopts_live_baseline() {
        let live = [invite("abc", 8, Some(u1())), invite("def", 2, Some(u2()))];

        let result = reconcile(&join(), None, &live);

        assert!(result.events.is_empty());
        assert_eq!(result.snapshot, snapshot(&[("abc", 8), ("def", 2)]));
    }

    #[test]
    fn event_only_prior_adopts_live_baseline() {
        let prior = GuildSnapshot::new(guild());
        let live = [invite("old", 50, Some(u2())), invite("new", 1, Some(u1()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert!(result.events.is_empty());
        assert!(result.snapshot.is_baselined());
        assert_eq!(result.snapshot, snapshot(&[("new", 1), ("old", 50)]));
    }

    #[test]
    fn recreated_code_counts_from_zero() {
        // "abc" was deleted (absent from prior) and recreated with the same code
        let prior = snapshot(&[("other", 1)]);
        let live = [invite("abc", 2, Some(u1())), invite("other", 1, Some(u2()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].gained, 2);
        assert!(result.resets.is_empty());
    }

    #[test]
    fn multiple_joins_between_cycles_yield_one_event() {
        let prior = snapshot(&[("abc", 5)]);
        let live = [invite("abc", 8, Some(u1()))];

        let result = reconcile(&join(), Some(&prior), &live);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].gained, 3);
    }

    #[test]
    fn simultaneous_candidates_are_ordered_by_code() {
        let prior = snapshot(&[("bbb", 1), ("aaa", 1)]);
        let live = [invite("bbb", 2, Some(u2())), invite("aaa", 2, Some(u1()))];

        let result = reconcile(&join(), Some(&prior), &live);

        let codes: Vec<_> = result.events.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, ["aaa", "bbb"]);
    }

    #[test]
    fn named_code_narrows_attribution() {
        let prior = snapshot(&[("aaa", 1), ("bbb", 1)]);
        let live = [invite("aaa", 2, Some(u1())), invite("bbb", 2, Some(u2()))];
        let join = MemberJoin {
            invite_code: Some("bbb".to_string()),
            ..join()
        };

        let result = reconcile(&join, Some(&prior), &live);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].inviter, u2());
    }

    #[test]
    fn named_code_without_increment_falls_back_to_all_candidates() {
        let prior = snapshot(&[("aaa", 1), ("bbb", 1)]);
        let live = [invite("aaa", 2, Some(u1())), invite("bbb", 1, Some(u2()))];
        let join = MemberJoin {
            invite_code: Some("bbb".to_string()),
            ..join()
        };

        let result = reconcile(&join, Some(&prior), &live);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].code, "aaa");
    }

    #[test]
    fn inviter_total_spans_all_their_invites() {
        let prior = snapshot(&[("abc", 5), ("def", 3)]);
        let live = [
            invite("abc", 6, Some(u1())),
            invite("def", 3, Some(u1())),
            invite("ghi", 4, Some(u2())),
        ];

        let result = reconcile(&join(), Some(&prior), &live);

        assert_eq!(result.events[0].inviter_total, 9);
        assert_eq!(inviter_total(&live, u2()), 4);
        assert_eq!(inviter_total(&live, member()), 0);
    }

    #[test]
    fn inviterless_candidate_is_unattributed() {
        let prior = snapshot(&[("vanity", 10)]);
        let live = [invite("vanity", 11, None)];

        let result = reconcile(&join(), Some(&prior), &live);

        assert!(result.events.is_empty());
        assert_eq!(result.unattributed, ["vanity"]);
        assert_eq!(result.snapshot.uses("vanity"), Some(11));
    }

    #[test]
    fn foreign_guild_invites_are_ignored() {
        let prior = snapshot(&[]);
        let live = [InviteRecord {
            guild: serenity::GuildId::new(11),
            ..invite("abc", 3, Some(u1()))
        }];

        let result = reconcile(&join(), Some(&prior), &live);

        assert!(result.events.is_empty());
        assert!(result.snapshot.is_empty());
    }

    #[test]
    fn invites_by_filters_and_sorts() {
        let live = [
            invite("zzz", 1, Some(u1())),
            invite("mmm", 2, Some(u2())),
            invite("aaa", 3, Some(u1())),
        ];

        let codes: Vec<_> = invites_by(&live, u1()).into_iter().map(|i| i.code).collect();
        assert_eq!(codes, ["aaa", "zzz"]);
    }
}
