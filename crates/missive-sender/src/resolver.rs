// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recipient resolution.
//!
//! [`resolve`] sorts candidate recipient conversations into those that can be
//! sent to, those whose identity key changed, and those dropped with a
//! reason. It is a pure function: callers load the directory and act on the
//! result.

use std::collections::{HashMap, HashSet};

use missive_core::{Conversation, ConversationId, ServiceId};
use strum::Display;
use tracing::debug;

/// Why a candidate was left out of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    UnknownConversation,
    MissingSendAddress,
    NotMember,
    Unregistered,
    Blocked,
    SystemConversation,
}

/// A candidate with a usable send address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecipient {
    pub conversation_id: ConversationId,
    pub service_id: ServiceId,
    pub is_self: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientResolution {
    /// Send addresses, self included.
    pub targets: Vec<ServiceId>,
    pub targets_without_self: Vec<ServiceId>,
    pub accepted: Vec<ResolvedRecipient>,
    /// Identity key changed since last trusted.
    pub untrusted: Vec<ResolvedRecipient>,
    pub dropped: Vec<(ConversationId, DropReason)>,
}

impl RecipientResolution {
    /// Conversation an accepted or untrusted address belongs to.
    pub fn conversation_for(&self, service_id: &ServiceId) -> Option<&ConversationId> {
        self.accepted
            .iter()
            .chain(self.untrusted.iter())
            .find(|r| &r.service_id == service_id)
            .map(|r| &r.conversation_id)
    }

    /// Map addresses back to their conversations, skipping unknown ones.
    pub fn conversations_for(&self, service_ids: &[ServiceId]) -> Vec<ConversationId> {
        service_ids
            .iter()
            .filter_map(|s| self.conversation_for(s).cloned())
            .collect()
    }

    pub fn has_untrusted(&self) -> bool {
        !self.untrusted.is_empty()
    }
}

/// Resolve `candidates` against the owning conversation and the contact
/// directory. Duplicate candidates are considered once.
pub fn resolve(
    owner: &Conversation,
    directory: &HashMap<ConversationId, Conversation>,
    candidates: &[ConversationId],
) -> RecipientResolution {
    let mut resolution = RecipientResolution::default();
    let mut seen = HashSet::new();

    for candidate in candidates {
        if !seen.insert(candidate) {
            continue;
        }

        let Some(contact) = directory.get(candidate) else {
            drop_candidate(&mut resolution, candidate, DropReason::UnknownConversation);
            continue;
        };
        let Some(service_id) = contact.service_id.clone() else {
            drop_candidate(&mut resolution, candidate, DropReason::MissingSendAddress);
            continue;
        };

        let is_member = if owner.is_group() {
            owner.has_member(&service_id)
        } else {
            contact.id == owner.id
        };
        if !is_member && !contact.is_self {
            drop_candidate(&mut resolution, candidate, DropReason::NotMember);
            continue;
        }

        let recipient = ResolvedRecipient {
            conversation_id: candidate.clone(),
            service_id,
            is_self: contact.is_self,
        };

        if contact.identity_untrusted {
            debug!(recipient = %candidate, "identity key changed, needs verification");
            resolution.untrusted.push(recipient);
            continue;
        }
        if contact.is_unregistered() {
            drop_candidate(&mut resolution, candidate, DropReason::Unregistered);
            continue;
        }
        if contact.blocked {
            drop_candidate(&mut resolution, candidate, DropReason::Blocked);
            continue;
        }
        if contact.is_system {
            drop_candidate(&mut resolution, candidate, DropReason::SystemConversation);
            continue;
        }

        debug!(recipient = %candidate, is_self = recipient.is_self, "recipient accepted");
        resolution.targets.push(recipient.service_id.clone());
        if !recipient.is_self {
            resolution
                .targets_without_self
                .push(recipient.service_id.clone());
        }
        resolution.accepted.push(recipient);
    }

    resolution
}

fn drop_candidate(
    resolution: &mut RecipientResolution,
    candidate: &ConversationId,
    reason: DropReason,
) {
    debug!(recipient = %candidate, %reason, "recipient dropped");
    resolution.dropped.push((candidate.clone(), reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn directory(contacts: &[Conversation]) -> HashMap<ConversationId, Conversation> {
        contacts.iter().map(|c| (c.id.clone(), c.clone())).collect()
    }

    fn contact(id: &str) -> Conversation {
        Conversation::direct(id, format!("svc-{id}"))
    }

    fn group(members: &[&str]) -> Conversation {
        Conversation::group(
            "g",
            members.iter().map(|m| ServiceId::from(format!("svc-{m}"))).collect(),
        )
    }

    #[test]
    fn group_send_partitions_recipients() {
        let owner = group(&["r1", "r2", "r3", "blocked", "gone"]);
        let mut r3 = contact("r3");
        r3.identity_untrusted = true;
        let mut blocked = contact("blocked");
        blocked.blocked = true;
        let mut gone = contact("gone");
        gone.unregistered_at = Some(10);
        let outsider = contact("outsider");
        let dir = directory(&[contact("r1"), contact("r2"), r3, blocked, gone, outsider]);

        let candidates: Vec<ConversationId> = ["r1", "r2", "r3", "blocked", "gone", "outsider", "ghost"]
            .into_iter()
            .map(ConversationId::from)
            .collect();
        let res = resolve(&owner, &dir, &candidates);

        assert_eq!(
            res.targets,
            vec![ServiceId::from("svc-r1"), ServiceId::from("svc-r2")]
        );
        assert_eq!(res.untrusted.len(), 1);
        assert_eq!(res.untrusted[0].conversation_id.as_str(), "r3");
        assert_eq!(
            res.dropped,
            vec![
                (ConversationId::from("blocked"), DropReason::Blocked),
                (ConversationId::from("gone"), DropReason::Unregistered),
                (ConversationId::from("outsider"), DropReason::NotMember),
                (ConversationId::from("ghost"), DropReason::UnknownConversation),
            ]
        );
    }

    #[test]
    fn self_is_target_but_not_in_without_self() {
        let owner = group(&["r1"]);
        let mut me = contact("me");
        me.is_self = true;
        let dir = directory(&[contact("r1"), me]);

        let res = resolve(&owner, &dir, &["r1".into(), "me".into()]);
        assert_eq!(res.targets.len(), 2);
        assert_eq!(res.targets_without_self, vec![ServiceId::from("svc-r1")]);
    }

    #[test]
    fn direct_conversation_only_accepts_itself() {
        let owner = contact("alice");
        let dir = directory(&[contact("alice"), contact("bob")]);
        let res = resolve(&owner, &dir, &["alice".into(), "bob".into()]);
        assert_eq!(res.targets, vec![ServiceId::from("svc-alice")]);
        assert_eq!(res.dropped, vec![(ConversationId::from("bob"), DropReason::NotMember)]);
    }

    #[test]
    fn missing_address_and_system_are_dropped() {
        let owner = group(&["sys"]);
        let mut no_addr = contact("noaddr");
        no_addr.service_id = None;
        let mut sys = contact("sys");
        sys.is_system = true;
        let dir = directory(&[no_addr, sys]);

        let res = resolve(&owner, &dir, &["noaddr".into(), "sys".into()]);
        assert!(res.targets.is_empty());
        assert_eq!(
            res.dropped,
            vec![
                (ConversationId::from("noaddr"), DropReason::MissingSendAddress),
                (ConversationId::from("sys"), DropReason::SystemConversation),
            ]
        );
    }

    #[test]
    fn untrusted_wins_over_unregistered() {
        let owner = group(&["x"]);
        let mut x = contact("x");
        x.identity_untrusted = true;
        x.unregistered_at = Some(1);
        let res = resolve(&owner, &directory(&[x]), &["x".into()]);
        assert_eq!(res.untrusted.len(), 1);
        assert!(res.dropped.is_empty());
    }

    #[test]
    fn conversation_lookup_by_address() {
        let owner = group(&["r1"]);
        let res = resolve(&owner, &directory(&[contact("r1")]), &["r1".into()]);
        assert_eq!(
            res.conversation_for(&"svc-r1".into()),
            Some(&ConversationId::from("r1"))
        );
        assert_eq!(
            res.conversations_for(&["svc-r1".into(), "svc-zzz".into()]),
            vec![ConversationId::from("r1")]
        );
    }

    fn arb_contact() -> impl Strategy<Value = Conversation> {
        (
            0u8..12,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(n, has_addr, is_self, blocked, unreg, untrusted, system)| {
                let mut c = contact(&format!("c{n}"));
                if !has_addr {
                    c.service_id = None;
                }
                c.is_self = is_self;
                c.blocked = blocked;
                c.unregistered_at = unreg.then_some(1);
                c.identity_untrusted = untrusted;
                c.is_system = system;
                c
            })
    }

    proptest! {
        #[test]
        fn every_candidate_lands_in_exactly_one_bucket(
            contacts in proptest::collection::vec(arb_contact(), 0..10),
            members in proptest::collection::vec(0u8..12, 0..12),
            candidates in proptest::collection::vec(0u8..16, 0..16),
        ) {
            let member_names: Vec<String> = members.iter().map(|m| format!("c{m}")).collect();
            let member_refs: Vec<&str> = member_names.iter().map(String::as_str).collect();
            let owner = group(&member_refs);
            let dir = directory(&contacts);
            let candidates: Vec<ConversationId> =
                candidates.iter().map(|n| ConversationId::from(format!("c{n}"))).collect();

            let res = resolve(&owner, &dir, &candidates);

            let unique: HashSet<&ConversationId> = candidates.iter().collect();
            let mut placed: Vec<&ConversationId> = res
                .accepted
                .iter()
                .map(|r| &r.conversation_id)
                .chain(res.untrusted.iter().map(|r| &r.conversation_id))
                .chain(res.dropped.iter().map(|(c, _)| c))
                .collect();
            prop_assert_eq!(placed.len(), unique.len());
            placed.sort();
            placed.dedup();
            prop_assert_eq!(placed.len(), unique.len());
            prop_assert_eq!(res.targets.len(), res.accepted.len());
            prop_assert!(res.targets_without_self.len() <= res.targets.len());
        }
    }
}
