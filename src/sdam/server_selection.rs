use rand::seq::IndexedRandom;

use super::{member::MemberState, topology::TopologyType};
use crate::{
    error::{Error, Result},
    selection_criteria::{OperationKind, ReadPreference},
};

/// Chooses one of `candidates` for an operation.
///
/// Standalone topologies always yield their single member. In a replica set, writes and
/// primary reads need the primary, `Secondary` needs a secondary, and `SecondaryPreferred` /
/// `Nearest` fall back from a random secondary to the primary. Secondaries are chosen uniformly
/// at random on every call.
pub(crate) fn select_by_state<T: Clone>(
    candidates: &[(T, MemberState)],
    topology_type: TopologyType,
    kind: OperationKind,
    read_preference: ReadPreference,
) -> Result<T> {
    if candidates.is_empty() {
        return Err(Error::operation_failure("no connections available"));
    }

    if topology_type == TopologyType::Standalone {
        if let Some((candidate, _)) = candidates.first() {
            return Ok(candidate.clone());
        }
    }

    let primary = || {
        candidates
            .iter()
            .find(|(_, state)| *state == MemberState::Primary)
            .map(|(candidate, _)| candidate.clone())
    };
    let secondary = || {
        let secondaries: Vec<&T> = candidates
            .iter()
            .filter(|(_, state)| *state == MemberState::Secondary)
            .map(|(candidate, _)| candidate)
            .collect();
        secondaries.choose(&mut rand::rng()).map(|candidate| (*candidate).clone())
    };

    let selected = match (kind, read_preference) {
        (OperationKind::Write, _)
        | (OperationKind::Read, ReadPreference::Primary | ReadPreference::PrimaryPreferred) => {
            primary()
        }
        (OperationKind::Read, ReadPreference::Secondary) => secondary(),
        (OperationKind::Read, ReadPreference::SecondaryPreferred | ReadPreference::Nearest) => {
            secondary().or_else(primary)
        }
    };

    selected.ok_or_else(|| {
        Error::operation_failure(format!(
            "no member suitable for a {kind} with read preference {read_preference} among {} \
             connected members",
            candidates.len()
        ))
    })
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::select_by_state;
    use crate::{
        sdam::{MemberState, TopologyType},
        selection_criteria::{OperationKind, ReadPreference},
    };

    const ALL_READ_PREFERENCES: [ReadPreference; 5] = [
        ReadPreference::Primary,
        ReadPreference::PrimaryPreferred,
        ReadPreference::Secondary,
        ReadPreference::SecondaryPreferred,
        ReadPreference::Nearest,
    ];

    fn replica_set() -> Vec<(&'static str, MemberState)> {
        vec![
            ("a", MemberState::Primary),
            ("b", MemberState::Secondary),
            ("c", MemberState::Secondary),
        ]
    }

    fn select(
        candidates: &[(&'static str, MemberState)],
        kind: OperationKind,
        read_preference: ReadPreference,
    ) -> Option<&'static str> {
        select_by_state(candidates, TopologyType::ReplicaSet, kind, read_preference).ok()
    }

    #[test]
    fn empty_topology_fails() {
        for topology_type in [TopologyType::Standalone, TopologyType::ReplicaSet] {
            let error = select_by_state::<&str>(
                &[],
                topology_type,
                OperationKind::Read,
                ReadPreference::SecondaryPreferred,
            )
            .unwrap_err();
            assert!(error.is_operation_failure());
        }
    }

    #[test]
    fn standalone_ignores_read_preference() {
        let candidates = [("standalone", MemberState::Unknown)];
        for kind in [OperationKind::Read, OperationKind::Write] {
            for read_preference in ALL_READ_PREFERENCES {
                assert_eq!(
                    select_by_state(&candidates, TopologyType::Standalone, kind, read_preference)
                        .ok(),
                    Some("standalone")
                );
            }
        }
    }

    #[test]
    fn writes_need_a_primary() {
        for read_preference in ALL_READ_PREFERENCES {
            assert_eq!(
                select(&replica_set(), OperationKind::Write, read_preference),
                Some("a")
            );
        }

        let no_primary = [("b", MemberState::Secondary), ("c", MemberState::Secondary)];
        assert_eq!(
            select(&no_primary, OperationKind::Write, ReadPreference::Primary),
            None
        );
        assert_eq!(
            select(&no_primary, OperationKind::Write, ReadPreference::Nearest),
            None
        );
    }

    #[test]
    fn primary_reads() {
        assert_eq!(
            select(&replica_set(), OperationKind::Read, ReadPreference::Primary),
            Some("a")
        );
        assert_eq!(
            select(
                &replica_set(),
                OperationKind::Read,
                ReadPreference::PrimaryPreferred
            ),
            Some("a")
        );
        assert_eq!(
            select(
                &[("b", MemberState::Secondary)],
                OperationKind::Read,
                ReadPreference::Primary
            ),
            None
        );
    }

    #[test]
    fn secondary_reads_do_not_fall_back() {
        let primary_only = [("a", MemberState::Primary)];

        assert_eq!(
            select(&primary_only, OperationKind::Read, ReadPreference::Secondary),
            None
        );
        assert_eq!(
            select(
                &primary_only,
                OperationKind::Read,
                ReadPreference::SecondaryPreferred
            ),
            Some("a")
        );
        assert_eq!(
            select(&primary_only, OperationKind::Read, ReadPreference::Nearest),
            Some("a")
        );
    }

    #[test]
    fn secondaries_are_chosen_at_random() {
        for read_preference in [
            ReadPreference::Secondary,
            ReadPreference::SecondaryPreferred,
            ReadPreference::Nearest,
        ] {
            let seen: HashSet<_> = (0..200)
                .filter_map(|_| select(&replica_set(), OperationKind::Read, read_preference))
                .collect();
            assert_eq!(seen, HashSet::from(["b", "c"]));
        }
    }

    #[test]
    fn unusable_members_are_never_selected() {
        let candidates = [
            ("a", MemberState::Other(3)),
            ("b", MemberState::Unknown),
            ("c", MemberState::Other(7)),
        ];
        for kind in [OperationKind::Read, OperationKind::Write] {
            for read_preference in ALL_READ_PREFERENCES {
                assert_eq!(select(&candidates, kind, read_preference), None);
            }
        }
    }
}
