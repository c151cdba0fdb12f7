//! Cost-aware tier selection for extraction work.
//!
//! Pure policy: the router holds no state, reserves nothing, and can be
//! called any number of times with the same inputs. The caller reserves
//! budget after the tier is chosen.

use crate::budget::BudgetView;
use crate::segment::Segment;
use crate::tier::Tier;

/// Segments with fewer entities than this ride the free path.
const SPARSE_ENTITY_LIMIT: u32 = 3;

/// Segments with more entities than this deserve the premium tier.
const DENSE_ENTITY_LIMIT: u32 = 8;

/// A sparse but long segment is promoted past the free path: entity density
/// alone under-detects topic complexity in running prose.
const LONG_SEGMENT_TOKENS: u32 = 400;

/// Picks the processing tier for a segment, honoring remaining budget.
///
/// The density policy chooses a desired tier; the fallback chain then walks
/// down from it, taking the first tier the budget view grants. The free
/// tier always qualifies, so a segment is never dropped.
pub fn select_route(segment: &Segment, budget: &impl BudgetView) -> Tier {
    for tier in desired_tier(segment).fallback_chain() {
        if budget.has_allowance(tier) {
            return tier;
        }
    }
    Tier::NoLlm
}

/// Density policy, ties broken toward the cheaper tier.
fn desired_tier(segment: &Segment) -> Tier {
    if segment.entity_count < SPARSE_ENTITY_LIMIT {
        if segment.token_length > LONG_SEGMENT_TOKENS {
            Tier::Small
        } else {
            Tier::NoLlm
        }
    } else if segment.entity_count <= DENSE_ENTITY_LIMIT {
        Tier::Small
    } else {
        Tier::Big
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowAll;

    impl BudgetView for AllowAll {
        fn has_allowance(&self, _tier: Tier) -> bool {
            true
        }
    }

    /// Grants only the tiers listed.
    struct AllowOnly(&'static [Tier]);

    impl BudgetView for AllowOnly {
        fn has_allowance(&self, tier: Tier) -> bool {
            self.0.contains(&tier)
        }
    }

    fn segment(entity_count: u32, token_length: u32) -> Segment {
        Segment {
            text: String::new(),
            entity_count,
            token_length,
        }
    }

    #[test]
    fn sparse_segments_ride_the_free_path() {
        assert_eq!(select_route(&segment(0, 50), &AllowAll), Tier::NoLlm);
        assert_eq!(select_route(&segment(2, 300), &AllowAll), Tier::NoLlm);
    }

    #[test]
    fn sparse_but_long_segments_are_promoted_one_tier() {
        assert_eq!(select_route(&segment(2, 401), &AllowAll), Tier::Small);
        // Exactly at the threshold stays free (ties break cheaper).
        assert_eq!(select_route(&segment(2, 400), &AllowAll), Tier::NoLlm);
    }

    #[test]
    fn medium_density_takes_the_cheaper_paid_tier() {
        assert_eq!(select_route(&segment(3, 100), &AllowAll), Tier::Small);
        assert_eq!(select_route(&segment(8, 100), &AllowAll), Tier::Small);
    }

    #[test]
    fn dense_segments_take_the_premium_tier() {
        assert_eq!(select_route(&segment(9, 100), &AllowAll), Tier::Big);
        assert_eq!(select_route(&segment(40, 2000), &AllowAll), Tier::Big);
    }

    #[test]
    fn exhausted_premium_falls_back_to_small() {
        let budget = AllowOnly(&[Tier::Small, Tier::NoLlm]);
        assert_eq!(select_route(&segment(12, 100), &budget), Tier::Small);
    }

    #[test]
    fn unavailable_premium_is_never_selected() {
        let budget = AllowOnly(&[Tier::Small, Tier::NoLlm]);
        for entities in 0..40 {
            for tokens in [10, 500] {
                assert_ne!(
                    select_route(&segment(entities, tokens), &budget),
                    Tier::Big
                );
            }
        }
    }

    #[test]
    fn full_exhaustion_still_yields_the_free_tier() {
        struct DenyAll;
        impl BudgetView for DenyAll {
            fn has_allowance(&self, _tier: Tier) -> bool {
                false
            }
        }
        // Never "no tier available": the free path absorbs everything.
        assert_eq!(select_route(&segment(20, 1000), &DenyAll), Tier::NoLlm);
    }

    #[test]
    fn routing_is_pure() {
        let s = segment(5, 120);
        let first = select_route(&s, &AllowAll);
        let second = select_route(&s, &AllowAll);
        assert_eq!(first, second);
    }
}
