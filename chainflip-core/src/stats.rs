//! Presentation aggregates derived from a snapshot. Nothing here is cached.

use crate::types::{Address, LeaderboardEntry, Match, PlayerStats, Wei};
use std::collections::HashMap;
use std::fmt;

/// Fee percentages are expressed in basis points of this.
pub const FEE_DENOMINATOR: u128 = 10_000;

/// Wins over decided matches (total minus canceled), as a percentage.
pub fn win_percentage(stats: &PlayerStats) -> f64 {
    let decided = stats.total_matches.saturating_sub(stats.total_canceled);
    if decided == 0 {
        return 0.0;
    }
    (stats.total_wins as f64 / decided as f64 * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WinLossRatio {
    Finite(f64),
    /// Wins with no losses.
    Infinite,
}

impl fmt::Display for WinLossRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(r) => write!(f, "{:.2}", r),
            Self::Infinite => f.write_str("∞"),
        }
    }
}

pub fn win_loss_ratio(stats: &PlayerStats) -> WinLossRatio {
    match (stats.total_wins, stats.total_losses) {
        (0, 0) => WinLossRatio::Finite(0.0),
        (_, 0) => WinLossRatio::Infinite,
        (wins, losses) => WinLossRatio::Finite(wins as f64 / losses as f64),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingBand {
    NoLosses,
    Winning,
    Balanced,
    Losing,
}

impl RatingBand {
    pub fn of(stats: &PlayerStats) -> Self {
        match win_loss_ratio(stats) {
            _ if stats.total_losses == 0 => Self::NoLosses,
            WinLossRatio::Finite(r) if r > 1.0 => Self::Winning,
            WinLossRatio::Finite(r) if r > 0.5 => Self::Balanced,
            _ => Self::Losing,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoLosses => "no losses",
            Self::Winning => "winning",
            Self::Balanced => "balanced",
            Self::Losing => "losing",
        }
    }
}

/// Signed difference between what a player won and what they put in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetGain {
    Gain(Wei),
    Loss(Wei),
    Even,
}

impl NetGain {
    pub fn of(stats: &PlayerStats) -> Self {
        let (won, invested) = (stats.amount_won, stats.amount_invested);
        match won.cmp(&invested) {
            std::cmp::Ordering::Greater => Self::Gain(won.saturating_sub(invested)),
            std::cmp::Ordering::Less => Self::Loss(invested.saturating_sub(won)),
            std::cmp::Ordering::Equal => Self::Even,
        }
    }

    pub fn as_ether_f64(&self) -> f64 {
        match self {
            Self::Gain(w) => w.to_ether_f64(),
            Self::Loss(w) => -w.to_ether_f64(),
            Self::Even => 0.0,
        }
    }
}

impl fmt::Display for NetGain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gain(w) => write!(f, "+{}", w.format_ether()),
            Self::Loss(w) => write!(f, "-{}", w.format_ether()),
            Self::Even => f.write_str("0"),
        }
    }
}

/// Combined pot of both wagers minus the protocol fee.
pub fn adjusted_prize_pool(bet_amount: Wei, fee_basis_points: u64) -> Wei {
    let pot = bet_amount.as_wei().saturating_mul(2);
    let fee = pot.saturating_mul(fee_basis_points as u128) / FEE_DENOMINATOR;
    Wei::from_wei(pot.saturating_sub(fee))
}

/// Matches split into those still in play and those that are settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub active: Vec<Match>,
    pub ended: Vec<Match>,
}

/// Partition by lifecycle state. Every match lands in exactly one bucket.
pub fn classify(matches: &[Match]) -> Classified {
    let (active, ended) = matches.iter().cloned().partition(|m| m.state.is_active());
    Classified { active, ended }
}

/// Winner tally over settled matches, most wins first and ties by address.
pub fn tally_winners<'a>(matches: impl IntoIterator<Item = &'a Match>) -> Vec<LeaderboardEntry> {
    let mut wins: HashMap<Address, u64> = HashMap::new();
    for m in matches.into_iter().filter(|m| m.has_winner()) {
        *wins.entry(m.winner).or_default() += 1;
    }

    let mut entries: Vec<LeaderboardEntry> = wins
        .into_iter()
        .map(|(address, wins)| LeaderboardEntry { address, wins })
        .collect();
    entries.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.address.cmp(&b.address)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoinSide, MatchState, RequestId};

    fn stats(matches: u64, wins: u64, losses: u64, canceled: u64) -> PlayerStats {
        PlayerStats {
            total_matches: matches,
            total_wins: wins,
            total_losses: losses,
            total_canceled: canceled,
            ..Default::default()
        }
    }

    fn settled(id: u64, state: MatchState, winner: u8) -> Match {
        Match {
            id,
            state,
            player1: Address::new([1; 20]),
            player2: Address::new([2; 20]),
            bet_amount: Wei::from_wei(1),
            winner: Address::new([winner; 20]),
            result: true,
            start_time: None,
            end_time: None,
            player1_choice: CoinSide::Heads,
            player2_choice: CoinSide::Tails,
            vrf_request_id: RequestId::ZERO,
        }
    }

    #[test]
    fn test_win_percentage() {
        assert_eq!(win_percentage(&stats(0, 0, 0, 0)), 0.0);
        assert_eq!(win_percentage(&stats(3, 0, 0, 3)), 0.0);
        assert_eq!(win_percentage(&stats(5, 2, 2, 1)), 50.0);
        assert_eq!(win_percentage(&stats(4, 4, 0, 0)), 100.0);
    }

    #[test]
    fn test_win_loss_ratio() {
        assert_eq!(win_loss_ratio(&stats(3, 3, 0, 0)), WinLossRatio::Infinite);
        assert_eq!(win_loss_ratio(&stats(0, 0, 0, 0)), WinLossRatio::Finite(0.0));
        assert_eq!(win_loss_ratio(&stats(4, 1, 3, 0)), WinLossRatio::Finite(1.0 / 3.0));
        assert_eq!(WinLossRatio::Finite(1.5).to_string(), "1.50");
    }

    #[test]
    fn test_rating_bands() {
        assert_eq!(RatingBand::of(&stats(0, 0, 0, 0)), RatingBand::NoLosses);
        assert_eq!(RatingBand::of(&stats(3, 2, 1, 0)), RatingBand::Winning);
        assert_eq!(RatingBand::of(&stats(5, 2, 3, 0)), RatingBand::Balanced);
        assert_eq!(RatingBand::of(&stats(4, 1, 3, 0)), RatingBand::Losing);
        assert_eq!(RatingBand::of(&stats(2, 1, 1, 0)), RatingBand::Balanced);
    }

    #[test]
    fn test_net_gain() {
        let mut s = PlayerStats {
            amount_won: Wei::parse_ether("5.0").unwrap(),
            amount_invested: Wei::parse_ether("3.0").unwrap(),
            ..Default::default()
        };
        let gain = NetGain::of(&s);
        assert_eq!(gain, NetGain::Gain(Wei::parse_ether("2").unwrap()));
        assert_eq!(gain.to_string(), "+2");
        assert_eq!(gain.as_ether_f64(), 2.0);

        s.amount_won = Wei::parse_ether("1.5").unwrap();
        assert_eq!(NetGain::of(&s).to_string(), "-1.5");

        s.amount_won = s.amount_invested;
        assert_eq!(NetGain::of(&s), NetGain::Even);
    }

    #[test]
    fn test_adjusted_prize_pool() {
        let bet = Wei::parse_ether("1.0").unwrap();
        assert_eq!(adjusted_prize_pool(bet, 500).format_ether(), "1.9");
        assert_eq!(adjusted_prize_pool(bet, 0).format_ether(), "2");
        assert_eq!(adjusted_prize_pool(Wei::ZERO, 500), Wei::ZERO);
    }

    #[test]
    fn test_classify_partitions_every_match() {
        let matches = vec![
            settled(1, MatchState::Waiting, 0),
            settled(2, MatchState::Flipping, 0),
            settled(3, MatchState::Canceled, 0),
            settled(4, MatchState::Ended, 2),
        ];
        let c = classify(&matches);

        assert_eq!(c.active.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(c.ended.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(c.active.len() + c.ended.len(), matches.len());
        assert!(c.active.iter().all(|a| c.ended.iter().all(|e| e.id != a.id)));
    }

    #[test]
    fn test_tally_winners_orders_by_wins_then_address() {
        let matches = vec![
            settled(1, MatchState::Ended, 3),
            settled(2, MatchState::Ended, 2),
            settled(3, MatchState::Ended, 3),
            settled(4, MatchState::Ended, 1),
            // no winner recorded
            settled(5, MatchState::Ended, 0),
            // canceled matches never count
            settled(6, MatchState::Canceled, 2),
        ];
        let board = tally_winners(&matches);

        assert_eq!(board.len(), 3);
        assert_eq!(board[0], LeaderboardEntry { address: Address::new([3; 20]), wins: 2 });
        assert_eq!(board[1].address, Address::new([1; 20]));
        assert_eq!(board[2].address, Address::new([2; 20]));
    }
}
