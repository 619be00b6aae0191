//! Ticket issuance and the signed verification payload presented at the gate.
//!
//! The payload is a compact EdDSA JWT. Gate tooling only needs the public key to
//! verify it, and tolerates claims it does not know about.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{SigningKey, VerifyingKey};
use jwt_simple::prelude::*;
use rand::rngs::OsRng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::{Payment, TargetType, Ticket};

pub const TICKET_ISSUER: &str = "fundledger";
pub const TICKET_CLAIMS_VERSION: u32 = 1;

/// Custom claims carried by a ticket. Standard claims (iss, sub, iat, exp) are
/// handled by jwt-simple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketClaims {
    pub v: u32,
    pub ticket_id: String,
    pub payer_ref: Option<String>,
    pub event_id: String,
    pub payment_id: String,
    pub issued_at: i64,
}

/// Ed25519 signing key for ticket payloads.
#[derive(Clone)]
pub struct TicketSigner {
    seed: [u8; 32],
}

impl std::fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSigner")
            .field("public_key", &self.public_key_b64())
            .finish()
    }
}

impl TicketSigner {
    pub fn generate() -> Self {
        Self {
            seed: SigningKey::generate(&mut OsRng).to_bytes(),
        }
    }

    /// Load from a base64-encoded 32-byte seed.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("Invalid signing key encoding: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("Invalid signing key length".into()))?;
        Ok(Self { seed })
    }

    pub fn seed_b64(&self) -> String {
        BASE64.encode(self.seed)
    }

    pub fn public_key_b64(&self) -> String {
        BASE64.encode(SigningKey::from_bytes(&self.seed).verifying_key().to_bytes())
    }

    pub fn sign(&self, claims: &TicketClaims, validity_days: u64) -> Result<String> {
        let signing_key = SigningKey::from_bytes(&self.seed);
        let key_pair = Ed25519KeyPair::from_bytes(&signing_key.to_keypair_bytes())
            .map_err(|e| AppError::Internal(format!("Failed to create key pair: {}", e)))?;

        let jwt_claims =
            Claims::with_custom_claims(claims.clone(), Duration::from_days(validity_days))
                .with_issuer(TICKET_ISSUER)
                .with_subject(&claims.ticket_id);

        key_pair
            .sign(jwt_claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign ticket: {}", e)))
    }
}

/// Verify a ticket payload with the public key alone.
pub fn verify_ticket(token: &str, public_key_b64: &str) -> Result<JWTClaims<TicketClaims>> {
    let public_bytes = BASE64
        .decode(public_key_b64.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid public key encoding: {}", e)))?;

    let key_bytes: [u8; 32] = public_bytes
        .try_into()
        .map_err(|_| AppError::BadRequest("Invalid public key length".into()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| AppError::BadRequest(format!("Invalid public key: {}", e)))?;

    let public_key = Ed25519PublicKey::from_bytes(&verifying_key.to_bytes())
        .map_err(|e| AppError::BadRequest(format!("Failed to create public key: {}", e)))?;

    let options = VerificationOptions {
        allowed_issuers: Some(HashSet::from_strings(&[TICKET_ISSUER])),
        ..Default::default()
    };

    public_key
        .verify_token::<TicketClaims>(token, Some(options))
        .map_err(|e| AppError::BadRequest(format!("Invalid ticket: {}", e)))
}

/// Issue the ticket for an event-ticket payment, exactly once.
///
/// Returns the existing ticket if one already references the payment. Otherwise
/// signs a payload and inserts it, ignoring a conflict on payment id, and reads
/// back whichever row won. Safe to call any number of times, concurrently.
pub fn issue_ticket_for_payment(
    conn: &Connection,
    signer: &TicketSigner,
    validity_days: u64,
    payment: &Payment,
) -> Result<Ticket> {
    if payment.target_type != TargetType::EventTicket {
        return Err(AppError::Internal(format!(
            "payment {} is not an event ticket payment",
            payment.id
        )));
    }

    if let Some(existing) = queries::get_ticket_by_payment(conn, &payment.id)? {
        return Ok(existing);
    }

    let ticket_id = EntityType::Ticket.gen_id();
    let issued_at = queries::now();
    let payer_ref = payment.payer_ref().map(String::from);

    let claims = TicketClaims {
        v: TICKET_CLAIMS_VERSION,
        ticket_id: ticket_id.clone(),
        payer_ref: payer_ref.clone(),
        event_id: payment.target_id.clone(),
        payment_id: payment.id.clone(),
        issued_at,
    };
    let verification_payload = signer.sign(&claims, validity_days)?;

    let ticket = Ticket {
        id: ticket_id,
        payer_ref,
        event_id: payment.target_id.clone(),
        verification_payload,
        payment_id: payment.id.clone(),
        issued_at,
    };

    if queries::insert_ticket_if_absent(conn, &ticket)? {
        tracing::info!(
            "Issued ticket {} for payment {} (event {})",
            ticket.id,
            payment.id,
            payment.target_id
        );
        return Ok(ticket);
    }

    queries::get_ticket_by_payment(conn, &payment.id)?
        .ok_or_else(|| AppError::Internal(format!("ticket for payment {} vanished", payment.id)))
}
