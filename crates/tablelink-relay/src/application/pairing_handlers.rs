//! Command and query handlers for pairings.
//!
//! A pairing starts on the agent side with a short code, is completed by the
//! issuer claiming that code, and can be reissued when the agent wants a
//! fresh code (for example after the issuer disconnected).

use std::sync::Mutex;
use std::time::Duration;

use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::rng::DeterministicRng;
use tablelink_core::store::{Pairing, PairingStatus, RelayStore};
use tracing::info;
use uuid::Uuid;

use crate::domain::commands::{ClaimPairing, CreatePairing, ReissuePairing};
use crate::domain::pairing_code::{generate_code, normalize_code};

/// How many fresh codes to try before giving up on a collision.
const CODE_ATTEMPTS: usize = 5;

/// Pairing lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingSettings {
    /// How long an unclaimed code stays valid.
    pub ttl: Duration,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// Draws codes until one is not already in use.
///
/// The `Mutex` is locked only around each synchronous draw, never across an
/// await.
async fn unused_code(
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn RelayStore,
) -> Result<String, RelayError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = {
            let mut rng_guard = rng
                .lock()
                .map_err(|e| RelayError::Infrastructure(format!("RNG mutex poisoned: {e}")))?;
            generate_code(&mut *rng_guard)
        };
        if store.find_pairing_by_code(&code).await?.is_none() {
            return Ok(code);
        }
    }
    Err(RelayError::Infrastructure(
        "could not draw an unused pairing code".into(),
    ))
}

/// Handles the `CreatePairing` command: draws a code and stores a pending
/// pairing.
///
/// # Errors
///
/// Returns `RelayError::Validation` if the agent reference is empty, or any
/// store error.
pub async fn handle_create_pairing(
    command: &CreatePairing,
    settings: &PairingSettings,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn RelayStore,
) -> Result<Pairing, RelayError> {
    let agent_ref = command.agent_ref.trim();
    if agent_ref.is_empty() {
        return Err(RelayError::Validation("agent_ref must not be empty".into()));
    }

    let code = unused_code(rng, store).await?;
    let pairing = Pairing {
        id: Uuid::new_v4(),
        code,
        issuer_ref: None,
        agent_ref: agent_ref.to_owned(),
        status: PairingStatus::Pending,
        created_at: clock.now(),
        connected_at: None,
        expires_at: clock.deadline(settings.ttl),
    };
    store.insert_pairing(&pairing).await?;

    info!(pairing_id = %pairing.id, agent_ref = %pairing.agent_ref, "pairing created");
    Ok(pairing)
}

/// Handles the `ClaimPairing` command: connects the issuer to the pairing
/// behind a code.
///
/// # Errors
///
/// Returns `RelayError::Validation` if the code is unknown, already used, or
/// expired.
pub async fn handle_claim_pairing(
    command: &ClaimPairing,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<Pairing, RelayError> {
    let issuer_ref = command.issuer_ref.trim();
    if issuer_ref.is_empty() {
        return Err(RelayError::Validation("issuer_ref must not be empty".into()));
    }

    let code = normalize_code(&command.code);
    let pairing = store
        .find_pairing_by_code(&code)
        .await?
        .ok_or_else(|| RelayError::Validation(format!("unknown pairing code {code}")))?;

    let now = clock.now();
    if !pairing.is_claimable(now) {
        return Err(RelayError::Validation(format!(
            "pairing code {code} is no longer claimable"
        )));
    }

    let pairing = store.connect_pairing(pairing.id, issuer_ref, now).await?;
    info!(pairing_id = %pairing.id, issuer_ref, "pairing connected");
    Ok(pairing)
}

/// Handles the `ReissuePairing` command: gives the pairing a fresh code and
/// puts it back to pending.
///
/// # Errors
///
/// Returns `RelayError::NotFound` if the pairing does not exist.
pub async fn handle_reissue_pairing(
    command: &ReissuePairing,
    settings: &PairingSettings,
    clock: &dyn Clock,
    rng: &Mutex<dyn DeterministicRng + Send>,
    store: &dyn RelayStore,
) -> Result<Pairing, RelayError> {
    store
        .get_pairing(command.pairing_id)
        .await?
        .ok_or(RelayError::NotFound(command.pairing_id))?;

    let code = unused_code(rng, store).await?;
    let pairing = store
        .reissue_pairing(command.pairing_id, &code, clock.deadline(settings.ttl))
        .await?;

    info!(pairing_id = %pairing.id, "pairing reissued");
    Ok(pairing)
}

/// Retrieves a pairing by id.
///
/// # Errors
///
/// Returns `RelayError::NotFound` if the pairing does not exist.
pub async fn get_pairing(pairing_id: Uuid, store: &dyn RelayStore) -> Result<Pairing, RelayError> {
    store
        .get_pairing(pairing_id)
        .await?
        .ok_or(RelayError::NotFound(pairing_id))
}
