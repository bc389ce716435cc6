pub mod chain;
pub mod reporter;
pub mod upstream;

use config::Network;

/// Separator between canonicalized event strings inside a block.
pub const EVENT_SEPARATOR: &str = "|";

/// How many recent block anchors are compared against the upstream when looking for a reorg common ancestor. The upstream
/// does not retain deeper reorgs.
pub const REORG_WINDOW: usize = 10;

/// The metaprotocols this indexer family understands. Each protocol owns its own database, digest chain and version marker;
/// the replay engine is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Brc20,
    Bitmap,
    Sns,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Brc20 => "brc20",
            Protocol::Bitmap => "bitmap",
            Protocol::Sns => "sns",
        }
    }

    pub fn indexer_version(&self) -> &'static str {
        match self {
            Protocol::Brc20 => "metaord-brc20-index v1.0.2",
            Protocol::Bitmap => "metaord-bitmap-index v1.0.2",
            Protocol::Sns => "metaord-sns-index v1.0.2",
        }
    }

    pub fn db_version(&self) -> i32 {
        match self {
            Protocol::Brc20 => 5,
            Protocol::Bitmap => 3,
            Protocol::Sns => 3,
        }
    }

    /// Older db versions the current binary can still upgrade in place. Anything else requires a `db reset`.
    pub fn recoverable_db_versions(&self) -> &'static [i32] {
        &[]
    }

    /// BRC-20 digests carry an event hash version because v1 event strings omitted `original_tick`, `is_self_mint` and
    /// `parent_id`. There is no cross-version equivalence.
    pub fn event_hash_version(&self) -> Option<i32> {
        match self {
            Protocol::Brc20 => Some(crate::meta_protocols::brc20::EVENT_HASH_VERSION),
            _ => None,
        }
    }

    /// Minimum `max_transfer_cnt` the upstream must have been indexed with. BRC-20 needs the transfer-inscribe plus the
    /// transfer-transfer of the same inscription.
    pub fn min_transfer_count(&self) -> i32 {
        match self {
            Protocol::Brc20 => 2,
            Protocol::Bitmap => 1,
            Protocol::Sns => 1,
        }
    }

    pub fn block_hashes_table(&self) -> &'static str {
        match self {
            Protocol::Brc20 => "brc20_block_hashes",
            Protocol::Bitmap => "bitmap_block_hashes",
            Protocol::Sns => "sns_block_hashes",
        }
    }

    pub fn event_hashes_table(&self) -> &'static str {
        match self {
            Protocol::Brc20 => "brc20_cumulative_event_hashes",
            Protocol::Bitmap => "bitmap_cumulative_event_hashes",
            Protocol::Sns => "sns_names_cumulative_event_hashes",
        }
    }

    pub fn version_table(&self) -> &'static str {
        match self {
            Protocol::Brc20 => "brc20_indexer_version",
            Protocol::Bitmap => "bitmap_indexer_version",
            Protocol::Sns => "sns_names_indexer_version",
        }
    }
}

/// Height of the first inscription on each network. Nothing earlier can carry protocol activity, so indexing starts here.
pub fn first_inscription_height(network: &Network) -> u32 {
    match network {
        Network::Mainnet => 767430,
        Network::Testnet => 2413343,
        Network::Testnet4 => 0,
        Network::Signet => 112402,
        Network::Regtest => 0,
    }
}
