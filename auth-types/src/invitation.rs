//! Pending invitations into a share.

use std::fmt;

use crate::ShareId;

/// The secret credential carried by an invitation.
///
/// Never appears in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct InvitationSecret(String);

impl InvitationSecret {
    /// Create an invitation secret from its string form.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InvitationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvitationSecret([REDACTED])")
    }
}

/// A pending invitation: a short-lived credential that lets this endpoint
/// join a share. Consumed (deleted) on a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invitation {
    /// An invitation admitting a new member (user) into the share.
    Member {
        /// The share to join.
        share_id: ShareId,
        /// The invitation secret.
        secret: InvitationSecret,
    },
    /// An invitation admitting a new device of an existing member.
    Device {
        /// The share to join.
        share_id: ShareId,
        /// The invitation secret.
        secret: InvitationSecret,
    },
}

impl Invitation {
    /// The share this invitation admits into.
    pub fn share_id(&self) -> ShareId {
        match self {
            Invitation::Member { share_id, .. } | Invitation::Device { share_id, .. } => *share_id,
        }
    }

    /// The invitation secret.
    pub fn secret(&self) -> &InvitationSecret {
        match self {
            Invitation::Member { secret, .. } | Invitation::Device { secret, .. } => secret,
        }
    }

    /// Whether this is a device invitation.
    pub fn is_device(&self) -> bool {
        matches!(self, Invitation::Device { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_exposes_share_and_secret() {
        let share_id = ShareId::random();
        let invitation = Invitation::Member {
            share_id,
            secret: InvitationSecret::new("sekrit"),
        };
        assert_eq!(invitation.share_id(), share_id);
        assert_eq!(invitation.secret().as_str(), "sekrit");
        assert!(!invitation.is_device());
    }

    #[test]
    fn device_invitation_is_tagged() {
        let invitation = Invitation::Device {
            share_id: ShareId::random(),
            secret: InvitationSecret::new("sekrit"),
        };
        assert!(invitation.is_device());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let invitation = Invitation::Member {
            share_id: ShareId::random(),
            secret: InvitationSecret::new("super-secret-value"),
        };
        let debug = format!("{:?}", invitation);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("super-secret-value"));
    }
}
