use stockledger_core::UserId;

/// Acting user for a request.
///
/// Authentication happens upstream; by the time a request reaches the ledger
/// routes the auth layer has resolved the user and forwarded its id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor_id: UserId,
}

impl ActorContext {
    pub fn new(actor_id: UserId) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }
}
