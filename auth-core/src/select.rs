//! Outbound share selection.
//!
//! When the repository sends to a peer that shares more than one team
//! with us, exactly one session key must seal the message. Shares that
//! own the message's document are preferred; the final tiebreak is the
//! lexicographic order of the session-key bytes, which both endpoints
//! can compute identically.

use std::collections::BTreeSet;

use vouch_auth_types::ShareId;

/// One connected session usable for an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The share the session belongs to.
    pub share_id: ShareId,
    /// The session-key bytes, used for deterministic ordering.
    pub key: Vec<u8>,
}

/// Pick the share to seal an outbound message with.
///
/// `document_shares` is the set of shares owning the message's document
/// (empty when the message names no document or no share owns it). When
/// any candidate is in that set, only those candidates are considered.
pub fn select_share<'a>(
    candidates: &'a [Candidate],
    document_shares: &BTreeSet<ShareId>,
) -> Option<&'a Candidate> {
    let owning: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| document_shares.contains(&c.share_id))
        .collect();

    let pool: Vec<&Candidate> = if owning.is_empty() {
        candidates.iter().collect()
    } else {
        owning
    };

    pool.into_iter().min_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| a.share_id.as_bytes().cmp(b.share_id.as_bytes()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(key: &[u8]) -> Candidate {
        Candidate {
            share_id: ShareId::random(),
            key: key.to_vec(),
        }
    }

    #[test]
    fn no_candidates_selects_nothing() {
        assert_eq!(select_share(&[], &BTreeSet::new()), None);
    }

    #[test]
    fn singleton_is_selected() {
        let candidates = [candidate(b"k")];
        let selected = select_share(&candidates, &BTreeSet::new()).unwrap();
        assert_eq!(selected, &candidates[0]);
    }

    #[test]
    fn lowest_key_wins() {
        let candidates = [candidate(b"bbb"), candidate(b"aaa"), candidate(b"ccc")];
        let selected = select_share(&candidates, &BTreeSet::new()).unwrap();
        assert_eq!(selected.key, b"aaa");
    }

    #[test]
    fn document_owner_beats_lower_key() {
        let candidates = [candidate(b"aaa"), candidate(b"zzz")];
        let owner: BTreeSet<ShareId> = [candidates[1].share_id].into();

        let selected = select_share(&candidates, &owner).unwrap();
        assert_eq!(selected.share_id, candidates[1].share_id);
    }

    #[test]
    fn key_order_breaks_ties_among_owners() {
        let candidates = [candidate(b"bbb"), candidate(b"aaa"), candidate(b"ccc")];
        let owners: BTreeSet<ShareId> = candidates.iter().map(|c| c.share_id).collect();

        let selected = select_share(&candidates, &owners).unwrap();
        assert_eq!(selected.key, b"aaa");
    }

    #[test]
    fn selection_is_deterministic() {
        let candidates = [candidate(b"x"), candidate(b"y")];
        let first = select_share(&candidates, &BTreeSet::new()).unwrap().share_id;
        for _ in 0..10 {
            let again = select_share(&candidates, &BTreeSet::new()).unwrap().share_id;
            assert_eq!(first, again);
        }
    }

    #[test]
    fn equal_keys_fall_back_to_share_id_order() {
        let a = candidate(b"same");
        let b = candidate(b"same");
        let expected = if a.share_id.as_bytes() < b.share_id.as_bytes() {
            a.share_id
        } else {
            b.share_id
        };
        let candidates = [a, b];
        assert_eq!(
            select_share(&candidates, &BTreeSet::new()).unwrap().share_id,
            expected
        );
    }
}
