use pubgoods_protocol::PublicGroup;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub group_number: usize,
    pub members: Vec<Uuid>,
}

impl Group {
    pub fn contains(&self, id: Uuid) -> bool {
        self.members.contains(&id)
    }

    pub fn public(&self) -> PublicGroup {
        PublicGroup {
            group_number: self.group_number,
            members: self.members.clone(),
        }
    }
}

/// Shuffles `players` and cuts them into consecutive groups of exactly
/// `group_size`. A trailing remainder smaller than `group_size` sits out.
pub fn partition<R: Rng + ?Sized>(players: &[Uuid], group_size: usize, rng: &mut R) -> Vec<Group> {
    if group_size == 0 {
        return vec![];
    }
    let mut ids = players.to_vec();
    ids.shuffle(rng);
    ids.chunks_exact(group_size)
        .enumerate()
        .map(|(i, chunk)| Group {
            group_number: i + 1,
            members: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn eight_players_make_two_groups_of_four() {
        let players = ids(8);
        let groups = partition(&players, 4, &mut StdRng::seed_from_u64(7));
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.members.len() == 4));
        assert_eq!(groups[0].group_number, 1);
        assert_eq!(groups[1].group_number, 2);

        let seen: HashSet<_> = groups.iter().flat_map(|g| g.members.iter()).collect();
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn remainder_is_dropped() {
        let groups = partition(&ids(7), 3, &mut StdRng::seed_from_u64(1));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.iter().map(|g| g.members.len()).sum::<usize>(), 6);
    }

    #[test]
    fn same_seed_same_groups() {
        let players = ids(12);
        let a = partition(&players, 4, &mut StdRng::seed_from_u64(42));
        let b = partition(&players, 4, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn groups_are_always_full(n in 0usize..60, size in 2usize..9, seed in any::<u64>()) {
            let players = ids(n);
            let groups = partition(&players, size, &mut StdRng::seed_from_u64(seed));
            prop_assert!(groups.iter().all(|g| g.members.len() == size));
            let placed: usize = groups.iter().map(|g| g.members.len()).sum();
            prop_assert!(placed <= n);
            prop_assert_eq!(groups.len(), n / size);
            let unique: HashSet<_> = groups.iter().flat_map(|g| g.members.iter()).collect();
            prop_assert_eq!(unique.len(), placed);
        }
    }
}
