//! Idempotency ledger for outbox dispatches.

use fieldsync_protocol::{EntityType, IdempotencyToken, OperationKind, OutboxEntry, Timestamp};
use std::collections::HashMap;
use uuid::Uuid;

/// A side effect the server performed for an outbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    /// Token the effect was recorded under.
    pub token: IdempotencyToken,
    /// Client entry id.
    pub entry_id: Uuid,
    /// Entity type of the entry.
    pub entity_type: EntityType,
    /// Operation kind.
    pub kind: OperationKind,
    /// Operation payload.
    pub payload: Vec<u8>,
    /// Server time of the effect.
    pub applied_at: Timestamp,
}

/// Records which tokens already produced an effect.
#[derive(Debug, Default)]
pub struct IdempotencyLedger {
    by_token: HashMap<IdempotencyToken, usize>,
    effects: Vec<Effect>,
}

impl IdempotencyLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `entry` once per token.
    ///
    /// Returns `false` if the token was seen before, in which case nothing
    /// is applied.
    pub fn apply(&mut self, entry: &OutboxEntry, token: &IdempotencyToken, now: Timestamp) -> bool {
        if self.by_token.contains_key(token) {
            return false;
        }
        self.by_token.insert(token.clone(), self.effects.len());
        self.effects.push(Effect {
            token: token.clone(),
            entry_id: entry.entry_id,
            entity_type: entry.entity_type.clone(),
            kind: entry.kind,
            payload: entry.payload.clone(),
            applied_at: now,
        });
        true
    }

    /// Returns the effect recorded for a token.
    pub fn effect(&self, token: &IdempotencyToken) -> Option<&Effect> {
        self.by_token.get(token).and_then(|&i| self.effects.get(i))
    }

    /// All effects in the order they were applied.
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_token_applies_once() {
        let entry = OutboxEntry::new(
            EntityType::new("chat_message"),
            OperationKind::MessageSend,
            b"hi".to_vec(),
            "device-1",
            Timestamp(1),
        );
        let mut ledger = IdempotencyLedger::new();

        assert!(ledger.apply(&entry, &entry.idempotency_token, Timestamp(10)));
        assert!(!ledger.apply(&entry, &entry.idempotency_token, Timestamp(20)));

        assert_eq!(ledger.effects().len(), 1);
        let effect = ledger.effect(&entry.idempotency_token).unwrap();
        assert_eq!(effect.applied_at, Timestamp(10));
        assert_eq!(effect.payload, b"hi".to_vec());
    }
}
