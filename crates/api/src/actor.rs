use uuid::Uuid;

/// Request header carrying the authenticated actor id.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Opaque reference to whoever asked for a change.
///
/// Authentication happens upstream; the pipeline only records the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self::new)
    }
}
