//! Auth collaborator interface (spec §6 "Auth collaborator").
//!
//! The core never issues tokens or owns a user store; it consumes a verified
//! identity handed to it by an external collaborator and mints its own
//! [`SessionToken`] to key the connection for the lifetime of that
//! connection, the same split the teacher crate draws between `ClientId`
//! (stable identity) and `SessionToken` (per-connection credential).

use mafia_protocol::PlayerId;

use crate::error::MafiaGameError;

/// A verified player identity, as handed over by the external auth
/// collaborator. The core treats `user_id` as opaque (spec §3 "User
/// identity").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: PlayerId,
    pub username: String,
    pub is_guest: bool,
}

/// Validates a raw connection credential, rejecting the connection if
/// verification fails (spec §6: "rejects connection if verification fails").
///
/// Real deployments inject a collaborator backed by the token-issuing
/// service; this crate ships only the trait and a trivial test double.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<VerifiedUser, MafiaGameError>;
}

/// Test/dev verifier: trusts `"<user_id>:<username>"` credentials verbatim.
/// Never appropriate in production; real verification happens upstream of
/// the core (spec §6 Non-goals).
#[derive(Default)]
pub struct TrustingVerifier;

impl SessionVerifier for TrustingVerifier {
    fn verify(&self, credential: &str) -> Result<VerifiedUser, MafiaGameError> {
        let (user_id, username) = credential
            .split_once(':')
            .ok_or(MafiaGameError::InvalidCredential)?;

        if user_id.is_empty() || username.is_empty() {
            return Err(MafiaGameError::InvalidCredential);
        }

        Ok(VerifiedUser {
            user_id: PlayerId::new(user_id),
            username: username.to_string(),
            is_guest: false,
        })
    }
}
