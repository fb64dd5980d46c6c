//! Share registry and peer tracking.
//!
//! The registry knows which shares this endpoint belongs to, which
//! invitations are pending, and which peers are currently present on
//! each wrapped adapter. A share id appears in `shares` or in
//! `invitations`, never both; admission migrates it atomically.
//!
//! The registry is generic over the team handle so it stays pure: the
//! provider instantiates it with its crypto-library team type.

use std::collections::{BTreeMap, BTreeSet};

use vouch_auth_types::{AdapterId, DocumentId, Invitation, PeerId, ShareId};

/// One share: the backing team handle and the documents synced under it.
#[derive(Debug, Clone)]
pub struct Share<T> {
    /// The share id (equal to the team id).
    pub id: ShareId,
    /// The crypto-library team handle.
    pub team: T,
    /// The documents owned by this share.
    pub documents: BTreeSet<DocumentId>,
}

/// Known shares, pending invitations, and per-adapter peer sets.
#[derive(Debug)]
pub struct ShareRegistry<T> {
    shares: BTreeMap<ShareId, Share<T>>,
    invitations: BTreeMap<ShareId, Invitation>,
    peers: BTreeMap<AdapterId, BTreeSet<PeerId>>,
}

impl<T> ShareRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            shares: BTreeMap::new(),
            invitations: BTreeMap::new(),
            peers: BTreeMap::new(),
        }
    }

    // ---- shares & invitations ----

    /// Admit a team as a share with an empty document set.
    ///
    /// Removes any pending invitation for the same id (the migration is
    /// atomic within the registry). Returns false if the share was
    /// already admitted; the existing share is left untouched.
    pub fn admit_share(&mut self, id: ShareId, team: T) -> bool {
        if self.shares.contains_key(&id) {
            return false;
        }
        self.invitations.remove(&id);
        self.shares.insert(
            id,
            Share {
                id,
                team,
                documents: BTreeSet::new(),
            },
        );
        true
    }

    /// Record a pending invitation.
    ///
    /// Returns false (and keeps the registry unchanged) if a share with
    /// the same id is already admitted. A second invitation for the same
    /// id replaces the first.
    pub fn add_invitation(&mut self, invitation: Invitation) -> bool {
        let id = invitation.share_id();
        if self.shares.contains_key(&id) {
            return false;
        }
        self.invitations.insert(id, invitation);
        true
    }

    /// Remove and return a pending invitation.
    pub fn remove_invitation(&mut self, id: &ShareId) -> Option<Invitation> {
        self.invitations.remove(id)
    }

    /// Look up a share.
    pub fn share(&self, id: &ShareId) -> Option<&Share<T>> {
        self.shares.get(id)
    }

    /// Whether a share with this id is admitted.
    pub fn contains_share(&self, id: &ShareId) -> bool {
        self.shares.contains_key(id)
    }

    /// Look up a pending invitation.
    pub fn invitation(&self, id: &ShareId) -> Option<&Invitation> {
        self.invitations.get(id)
    }

    /// Every id we should handshake for: admitted shares plus pending
    /// invitations.
    pub fn all_share_ids(&self) -> Vec<ShareId> {
        self.shares
            .keys()
            .chain(self.invitations.keys())
            .copied()
            .collect()
    }

    /// Iterate over admitted shares.
    pub fn shares(&self) -> impl Iterator<Item = &Share<T>> {
        self.shares.values()
    }

    /// Number of admitted shares.
    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    /// Number of pending invitations.
    pub fn invitation_count(&self) -> usize {
        self.invitations.len()
    }

    // ---- documents ----

    /// Add document ids to a share. Returns false if the share is
    /// unknown.
    pub fn add_documents(
        &mut self,
        id: &ShareId,
        documents: impl IntoIterator<Item = DocumentId>,
    ) -> bool {
        match self.shares.get_mut(id) {
            Some(share) => {
                share.documents.extend(documents);
                true
            }
            None => false,
        }
    }

    /// Remove document ids from a share. Returns false if the share is
    /// unknown.
    pub fn remove_documents(&mut self, id: &ShareId, documents: &[DocumentId]) -> bool {
        match self.shares.get_mut(id) {
            Some(share) => {
                for doc in documents {
                    share.documents.remove(doc);
                }
                true
            }
            None => false,
        }
    }

    /// The ids of all shares whose document set contains this document.
    pub fn shares_with_document(&self, document: &DocumentId) -> BTreeSet<ShareId> {
        self.shares
            .values()
            .filter(|share| share.documents.contains(document))
            .map(|share| share.id)
            .collect()
    }

    // ---- peers ----

    /// Record that a peer is present on an adapter. Returns false if it
    /// was already known there.
    pub fn add_peer(&mut self, adapter: AdapterId, peer: PeerId) -> bool {
        self.peers.entry(adapter).or_default().insert(peer)
    }

    /// Forget a peer on an adapter. Returns false if it was not known.
    pub fn remove_peer(&mut self, adapter: AdapterId, peer: &PeerId) -> bool {
        self.peers
            .get_mut(&adapter)
            .map(|set| set.remove(peer))
            .unwrap_or(false)
    }

    /// The peers currently known on an adapter.
    pub fn peers_on(&self, adapter: AdapterId) -> Vec<PeerId> {
        self.peers
            .get(&adapter)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget everything about an adapter.
    pub fn drop_adapter(&mut self, adapter: AdapterId) {
        self.peers.remove(&adapter);
    }
}

impl<T> Default for ShareRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_auth_types::InvitationSecret;

    fn invitation(share_id: ShareId) -> Invitation {
        Invitation::Member {
            share_id,
            secret: InvitationSecret::new("secret"),
        }
    }

    #[test]
    fn admission_is_idempotent() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let id = ShareId::random();

        assert!(registry.admit_share(id, "team"));
        assert!(!registry.admit_share(id, "other"));
        assert_eq!(registry.share(&id).unwrap().team, "team");
        assert_eq!(registry.share_count(), 1);
    }

    #[test]
    fn admission_consumes_the_invitation() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let id = ShareId::random();

        assert!(registry.add_invitation(invitation(id)));
        assert!(registry.admit_share(id, "team"));

        assert!(registry.invitation(&id).is_none());
        assert!(registry.contains_share(&id));
    }

    #[test]
    fn invitation_rejected_for_admitted_share() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let id = ShareId::random();
        registry.admit_share(id, "team");

        assert!(!registry.add_invitation(invitation(id)));
        assert_eq!(registry.invitation_count(), 0);
    }

    #[test]
    fn all_share_ids_is_the_union() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let admitted = ShareId::random();
        let invited = ShareId::random();
        registry.admit_share(admitted, "team");
        registry.add_invitation(invitation(invited));

        let ids = registry.all_share_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&admitted));
        assert!(ids.contains(&invited));
    }

    #[test]
    fn documents_mutate_only_the_named_share() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let one = ShareId::random();
        let two = ShareId::random();
        registry.admit_share(one, "one");
        registry.admit_share(two, "two");

        let doc = DocumentId::new("doc-1");
        assert!(registry.add_documents(&one, [doc.clone()]));

        assert_eq!(registry.shares_with_document(&doc), BTreeSet::from([one]));
        assert!(registry.remove_documents(&one, &[doc.clone()]));
        assert!(registry.shares_with_document(&doc).is_empty());
    }

    #[test]
    fn document_ops_on_unknown_share_fail() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let id = ShareId::random();
        assert!(!registry.add_documents(&id, [DocumentId::new("d")]));
        assert!(!registry.remove_documents(&id, &[DocumentId::new("d")]));
    }

    #[test]
    fn peers_are_scoped_to_adapters() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let a = AdapterId::new(1);
        let b = AdapterId::new(2);
        let peer = PeerId::new("peer");

        assert!(registry.add_peer(a, peer.clone()));
        assert!(!registry.add_peer(a, peer.clone()));
        assert!(registry.add_peer(b, peer.clone()));

        assert_eq!(registry.peers_on(a), vec![peer.clone()]);
        assert!(registry.remove_peer(a, &peer));
        assert!(registry.peers_on(a).is_empty());
        assert_eq!(registry.peers_on(b), vec![peer]);
    }

    #[test]
    fn drop_adapter_forgets_its_peers() {
        let mut registry: ShareRegistry<&str> = ShareRegistry::new();
        let a = AdapterId::new(1);
        registry.add_peer(a, PeerId::new("x"));
        registry.drop_adapter(a);
        assert!(registry.peers_on(a).is_empty());
    }
}
