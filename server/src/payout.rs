use pubgoods_protocol::{round_money, GroupResult, PlayerResult, RoundResults};
use uuid::Uuid;

/// What one group member brings into settlement.
#[derive(Debug, Clone)]
pub struct Stake {
    pub player_id: Uuid,
    pub name: String,
    pub balance: f64,
    pub contribution: f64,
    pub timed_out: bool,
}

/// Pool the group's contributions, multiply, and split evenly across members
/// regardless of what each of them put in.
pub fn settle_group(group_number: usize, stakes: &[Stake], multiplier: f64) -> GroupResult {
    let total_contribution = round_money(stakes.iter().map(|s| s.contribution).sum());
    let total_pool = round_money(total_contribution * multiplier);
    let payout_per_player = if stakes.is_empty() {
        0.0
    } else {
        round_money(total_pool / stakes.len() as f64)
    };

    let players = stakes
        .iter()
        .map(|s| {
            let new_balance = round_money(s.balance - s.contribution + payout_per_player);
            PlayerResult {
                player_id: s.player_id,
                name: s.name.clone(),
                contribution: s.contribution,
                old_balance: s.balance,
                new_balance,
                profit: round_money(new_balance - s.balance),
                timed_out: s.timed_out,
            }
        })
        .collect();

    GroupResult {
        group_number,
        total_contribution,
        total_pool,
        payout_per_player,
        players,
    }
}

pub fn settle_round<I>(round: u32, multiplier: f64, groups: I) -> RoundResults
where
    I: IntoIterator<Item = (usize, Vec<Stake>)>,
{
    RoundResults {
        round,
        groups: groups
            .into_iter()
            .map(|(number, stakes)| settle_group(number, &stakes, multiplier))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stake(balance: f64, contribution: f64) -> Stake {
        Stake {
            player_id: Uuid::new_v4(),
            name: "p".into(),
            balance,
            contribution,
            timed_out: false,
        }
    }

    #[test]
    fn everyone_contributes_everything() {
        let stakes: Vec<_> = (0..4).map(|_| stake(10.0, 10.0)).collect();
        let g = settle_group(1, &stakes, 2.0);
        assert_eq!(g.total_contribution, 40.0);
        assert_eq!(g.total_pool, 80.0);
        assert_eq!(g.payout_per_player, 20.0);
        for p in &g.players {
            assert_eq!(p.new_balance, 20.0);
            assert_eq!(p.profit, 10.0);
        }
    }

    #[test]
    fn free_rider_gains_most() {
        let stakes = vec![stake(10.0, 0.0), stake(10.0, 10.0), stake(10.0, 10.0), stake(10.0, 10.0)];
        let g = settle_group(1, &stakes, 2.0);
        assert_eq!(g.payout_per_player, 15.0);
        assert_eq!(g.players[0].new_balance, 25.0);
        assert_eq!(g.players[0].profit, 15.0);
        assert_eq!(g.players[1].new_balance, 15.0);
        assert_eq!(g.players[1].profit, 5.0);
    }

    #[test]
    fn nobody_contributes() {
        let stakes: Vec<_> = (0..3).map(|_| stake(7.5, 0.0)).collect();
        let g = settle_group(2, &stakes, 1.6);
        assert_eq!(g.payout_per_player, 0.0);
        assert!(g.players.iter().all(|p| p.new_balance == 7.5 && p.profit == 0.0));
    }

    #[test]
    fn uneven_split_is_rounded() {
        let stakes = vec![stake(10.0, 1.0), stake(10.0, 0.0), stake(10.0, 0.0)];
        let g = settle_group(1, &stakes, 2.0);
        assert_eq!(g.payout_per_player, 0.67);
        assert_eq!(g.players[0].new_balance, 9.67);
        assert_eq!(g.players[1].new_balance, 10.67);
    }

    #[test]
    fn round_keeps_group_order() {
        let r = settle_round(
            3,
            2.0,
            vec![(1, vec![stake(1.0, 1.0), stake(1.0, 1.0)]), (2, vec![stake(1.0, 0.0), stake(1.0, 0.0)])],
        );
        assert_eq!(r.round, 3);
        assert_eq!(r.groups[0].group_number, 1);
        assert_eq!(r.groups[1].payout_per_player, 0.0);
    }

    proptest! {
        #[test]
        fn pool_is_conserved(
            contributions in prop::collection::vec(0u32..=1000, 2..10),
            multiplier in 1.0f64..5.0,
        ) {
            let stakes: Vec<_> = contributions
                .iter()
                .map(|c| stake(10.0, *c as f64 / 100.0))
                .collect();
            let n = stakes.len() as f64;
            let c: f64 = stakes.iter().map(|s| s.contribution).sum();
            let g = settle_group(1, &stakes, multiplier);
            let paid = g.payout_per_player * n;
            prop_assert!((paid - c * multiplier).abs() <= n * 0.01 + 0.01);
        }
    }
}
