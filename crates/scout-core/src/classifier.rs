//! Transaction classification.
//!
//! Classification is a pure, total function: every observed transaction maps
//! to a [`TxKind`] and decoding problems degrade to partial fields instead of
//! errors. Rules are applied in a fixed order, deployment first.

use std::collections::HashMap;

use crate::types::{
    lamports_to_usd_micros, ClassifiedTransaction, PendingTransaction, SwapDetails, TxKind,
};

/// Instruction tag used by the swap payload layout understood here:
/// `[tag, amount_in u64 le, token_in 32 bytes, token_out 32 bytes]`.
pub const SWAP_INSTRUCTION_TAG: u8 = 9;

const AMOUNT_END: usize = 9;
const TOKEN_IN_END: usize = 41;
const TOKEN_OUT_END: usize = 73;

/// Stateless classifier carrying the DEX program registry and the
/// high-value threshold.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Program id -> protocol name.
    programs: HashMap<String, String>,
    high_value_floor_usd_micros: u128,
    sol_price_usd_micros: u64,
}

impl Classifier {
    pub fn new(
        programs: HashMap<String, String>,
        high_value_floor_usd_micros: u128,
        sol_price_usd_micros: u64,
    ) -> Self {
        Self {
            programs,
            high_value_floor_usd_micros,
            sol_price_usd_micros,
        }
    }

    /// Classify a single transaction. Never fails; the fallback is
    /// [`TxKind::Unknown`].
    pub fn classify(&self, tx: &PendingTransaction) -> ClassifiedTransaction {
        let (kind, swap) = if tx.recipient.is_empty() && !tx.payload.is_empty() {
            (TxKind::ContractDeployment, SwapDetails::default())
        } else if let Some(protocol) = self.programs.get(&tx.recipient) {
            let mut swap = decode_swap_payload(&tx.payload);
            swap.protocol = Some(protocol.clone());
            (TxKind::DexSwap, swap)
        } else if tx.lamports > 0 && tx.payload.is_empty() {
            (TxKind::Transfer, SwapDetails::default())
        } else {
            (TxKind::Unknown, SwapDetails::default())
        };

        ClassifiedTransaction {
            transaction: tx.clone(),
            kind,
            swap,
        }
    }

    /// Notional value of a classified transaction: the decoded swap amount
    /// when available, the transferred lamports otherwise.
    pub fn notional_lamports(classified: &ClassifiedTransaction) -> u128 {
        classified
            .swap
            .amount_in
            .unwrap_or(classified.transaction.lamports)
    }

    pub fn is_high_value(&self, classified: &ClassifiedTransaction) -> bool {
        let notional = Self::notional_lamports(classified);
        lamports_to_usd_micros(notional, self.sol_price_usd_micros)
            >= self.high_value_floor_usd_micros
    }

    /// Classify a batch and keep only non-Unknown, above-threshold entries.
    /// Input order is preserved.
    pub fn filter_actionable(&self, txs: &[PendingTransaction]) -> Vec<ClassifiedTransaction> {
        txs.iter()
            .map(|tx| self.classify(tx))
            .filter(|c| c.kind != TxKind::Unknown && self.is_high_value(c))
            .collect()
    }
}

/// Best-effort decode of the fixed swap layout. Short payloads yield the
/// fields that fit and leave the rest unset.
fn decode_swap_payload(payload: &[u8]) -> SwapDetails {
    let mut details = SwapDetails::default();
    if payload.len() < AMOUNT_END || payload[0] != SWAP_INSTRUCTION_TAG {
        return details;
    }

    let mut amount_bytes = [0u8; 8];
    amount_bytes.copy_from_slice(&payload[1..AMOUNT_END]);
    details.amount_in = Some(u64::from_le_bytes(amount_bytes) as u128);

    if payload.len() >= TOKEN_IN_END {
        details.token_in = Some(hex::encode(&payload[AMOUNT_END..TOKEN_IN_END]));
    }
    if payload.len() >= TOKEN_OUT_END {
        details.token_out = Some(hex::encode(&payload[TOKEN_IN_END..TOKEN_OUT_END]));
    }
    details
}

/// Build a swap payload in the layout the classifier decodes. Token ids are
/// hex strings; malformed ids fall back to zeroed bytes so payload
/// construction never fails.
pub fn encode_swap_payload(amount_in: u64, token_in: &str, token_out: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(TOKEN_OUT_END);
    payload.push(SWAP_INSTRUCTION_TAG);
    payload.extend_from_slice(&amount_in.to_le_bytes());
    payload.extend_from_slice(&token_bytes(token_in));
    payload.extend_from_slice(&token_bytes(token_out));
    payload
}

fn token_bytes(token: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    if let Ok(decoded) = hex::decode(token) {
        let len = decoded.len().min(32);
        out[..len].copy_from_slice(&decoded[..len]);
    }
    out
}
