use crate::NodeInfo;

/// The owner announced by the most recent ring reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnerHint {
    pub owner: NodeInfo,
    pub predecessor_id: u16,
}

/// Single-slot, last-write-wins cell for ring replies.
///
/// Any reply overwrites the slot, whichever lookup it answers, and the next
/// request whose owner is unknown consumes it. This is a routing hint only: a
/// stale or unrelated reply can produce a wrong redirect, which the client
/// sees as a 303 to a node that then redirects or defers again.
#[derive(Debug, Default)]
pub struct ReplyMailbox {
    slot: Option<OwnerHint>,
}

impl ReplyMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, hint: OwnerHint) {
        self.slot = Some(hint);
    }

    pub fn take(&mut self) -> Option<OwnerHint> {
        self.slot.take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
