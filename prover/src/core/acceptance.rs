//! Majority-vote acceptance rule for verifier ensembles.

/// Outcome of applying the acceptance rule to per-attempt vote counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Highest-voted attempt, lowest index on ties. `None` with no attempts.
    pub best: Option<usize>,
    pub votes: u32,
    pub accepted: bool,
}

/// Pick the best attempt and accept it on a strict majority of the ensemble.
///
/// For even ensembles exactly half the votes is a reject.
pub fn decide(votes: &[u32], ensemble_size: u32) -> Decision {
    let mut best: Option<(usize, u32)> = None;
    for (index, &count) in votes.iter().enumerate() {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((index, count));
        }
    }
    match best {
        Some((index, count)) => Decision {
            best: Some(index),
            votes: count,
            accepted: u64::from(count) * 2 > u64::from(ensemble_size),
        },
        None => Decision {
            best: None,
            votes: 0,
            accepted: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_majority_accepts_first_best() {
        let decision = decide(&[2, 1, 0], 3);
        assert_eq!(decision.best, Some(0));
        assert!(decision.accepted);

        let decision = decide(&[2, 1, 1], 3);
        assert_eq!(decision.best, Some(0));
        assert!(decision.accepted);
    }

    /// Verifies ties resolve to the lowest index and a minority is rejected.
    #[test]
    fn tie_without_majority_rejects_with_lowest_index() {
        let decision = decide(&[1, 1, 1], 3);
        assert_eq!(decision.best, Some(0));
        assert_eq!(decision.votes, 1);
        assert!(!decision.accepted);
    }

    #[test]
    fn later_attempt_wins_with_more_votes() {
        let decision = decide(&[0, 3, 3], 3);
        assert_eq!(decision.best, Some(1));
        assert!(decision.accepted);
    }

    #[test]
    fn exactly_half_of_even_ensemble_rejects() {
        assert!(!decide(&[2], 4).accepted);
        assert!(decide(&[3], 4).accepted);
    }

    #[test]
    fn no_attempts_is_never_accepted() {
        assert_eq!(
            decide(&[], 3),
            Decision {
                best: None,
                votes: 0,
                accepted: false
            }
        );
    }
}
