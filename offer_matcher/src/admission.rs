//! Op admission: deciding how many newly matched ops an offer can accept
//! given its remaining token budget and its per-offer instance cap.

use crate::offer::InstanceOpWithSource;
use crate::offer_data::OfferData;
use crate::tokens::TokenAccountant;

/// Admits as many of `added_ops` as the token balance and
/// `max_instances_per_offer` allow, folding the accepted ones into
/// `data.offer` and `data.ops`, debiting `tokens` accordingly, and
/// returning whatever didn't fit so the caller can reject them.
///
/// Runs fully before mutating `data.offer`: if some op's `apply_to_offer`
/// were to panic partway through the fold, `data` is left untouched rather
/// than half-updated. Callers that want panic isolation should still wrap
/// this call in `catch_unwind`, since the function itself does not.
pub fn admit(
    data: &mut OfferData,
    tokens: &mut TokenAccountant,
    max_instances_per_offer: usize,
    mut added_ops: Vec<InstanceOpWithSource>,
) -> Vec<InstanceOpWithSource> {
    let remaining_capacity = max_instances_per_offer.saturating_sub(data.ops.len());
    let k = (tokens.balance().max(0) as usize)
        .min(added_ops.len())
        .min(remaining_capacity);

    let rejected = added_ops.split_off(k);
    let accepted = added_ops;

    if !accepted.is_empty() {
        let mut offer = data.offer.clone();
        for entry in &accepted {
            offer = entry.op.apply_to_offer(&offer);
        }
        data.offer = offer;

        let mut ops = accepted;
        ops.append(&mut data.ops);
        data.ops = ops;

        tokens.debit(k);
    }

    rejected
}
