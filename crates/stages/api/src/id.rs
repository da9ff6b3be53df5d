use std::fmt::Display;

/// Stage IDs for all known stages.
///
/// The ID doubles as the key under which the stage's progress is persisted, so renaming a variant's
/// string breaks existing databases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageId {
    /// Header download and validation.
    Headers,
    /// Canonical hash to number index.
    BlockHashes,
    /// Body download.
    Bodies,
    /// Sender recovery.
    Senders,
    /// Transaction execution.
    Execution,
    /// Hashed state.
    HashState,
    /// State root computation and verification.
    IntermediateHashes,
    /// Account history index.
    AccountHistoryIndex,
    /// Transaction lookup index.
    TxLookup,
    /// Final marker stage.
    Finish,
    /// Mining: assemble a block template.
    MiningCreateBlock,
    /// Mining: execute the template speculatively.
    MiningExecution,
    /// Mining: seal and publish the block.
    MiningFinish,
    /// Other custom stage with a provided string identifier.
    Other(&'static str),
}

impl StageId {
    /// All supported sync stages, in forward order.
    pub const ALL: [Self; 10] = [
        Self::Headers,
        Self::BlockHashes,
        Self::Bodies,
        Self::Senders,
        Self::Execution,
        Self::HashState,
        Self::IntermediateHashes,
        Self::AccountHistoryIndex,
        Self::TxLookup,
        Self::Finish,
    ];

    /// Block assembly stages, in forward order.
    pub const MINING: [Self; 3] =
        [Self::MiningCreateBlock, Self::MiningExecution, Self::MiningFinish];

    /// Return stage id formatted as string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Headers => "Headers",
            Self::BlockHashes => "BlockHashes",
            Self::Bodies => "Bodies",
            Self::Senders => "Senders",
            Self::Execution => "Execution",
            Self::HashState => "HashState",
            Self::IntermediateHashes => "IntermediateHashes",
            Self::AccountHistoryIndex => "AccountHistoryIndex",
            Self::TxLookup => "TxLookup",
            Self::Finish => "Finish",
            Self::MiningCreateBlock => "MiningCreateBlock",
            Self::MiningExecution => "MiningExecution",
            Self::MiningFinish => "MiningFinish",
            Self::Other(s) => s,
        }
    }

    /// Returns true if it's a downloading stage [`StageId::Headers`] or [`StageId::Bodies`]
    pub const fn is_downloading_stage(&self) -> bool {
        matches!(self, Self::Headers | Self::Bodies)
    }

    /// Returns `true` if it's the finish stage [`StageId::Finish`]
    pub const fn is_finish(&self) -> bool {
        matches!(self, Self::Finish)
    }

    /// Returns `true` for block assembly stages.
    pub const fn is_mining(&self) -> bool {
        matches!(self, Self::MiningCreateBlock | Self::MiningExecution | Self::MiningFinish)
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
