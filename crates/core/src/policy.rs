//! Per-resource collection decision. Pure and synchronous: pacing and the
//! actual claim call belong to the orchestrator.

use crate::model::{CollectionOutcome, Identity, Resource};

/// What to do with one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether a claim call is warranted.
    pub attempt_claim: bool,
    /// Outcome to record. While a claim is pending `owned` is false; call
    /// [`Decision::claimed`] once the claim succeeded.
    pub outcome: CollectionOutcome,
}

impl Decision {
    /// Outcome after a successful claim.
    pub fn claimed(self) -> CollectionOutcome {
        CollectionOutcome {
            owned: true,
            ..self.outcome
        }
    }
}

/// Decides whether to claim `resource` and what ownership to record.
///
/// Unclaimed resources warrant a claim. Claimed ones are recorded as owned
/// only when the claimant is `identity`'s username.
pub fn decide(resource: &Resource, identity: &Identity) -> Decision {
    let (attempt_claim, owned) = match resource.claimant() {
        None => (true, false),
        Some(claimant) => (false, claimant == identity.username),
    };

    Decision {
        attempt_claim,
        outcome: CollectionOutcome {
            lat: resource.lat,
            lon: resource.lon,
            amount: resource.amount,
            owned,
        },
    }
}
