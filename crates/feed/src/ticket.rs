/// Identity of one open-panel lifetime.
///
/// Bumped on every open/close so responses issued under an earlier lifetime can be told
/// apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelGeneration(pub u64);

impl PanelGeneration {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Stamp carried by every outbound request and checked when its response lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub generation: PanelGeneration,
    pub sequence: u64,
}

impl Ticket {
    pub const fn new(generation: PanelGeneration, sequence: u64) -> Self {
        Self {
            generation,
            sequence,
        }
    }
}

/// Result of feeding a response back into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    Applied(T),
    /// The response belongs to a superseded request and was dropped.
    Stale,
}

impl<T> Completion<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Stale => None,
        }
    }
}
