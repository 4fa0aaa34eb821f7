// Transaction sync for the node: receive batches from peers, forward them
// along the routing tree, and import them into the pending pool.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod import;
pub mod metrics;
pub mod peers;
pub mod pool;
pub mod queue;
pub mod router;
pub mod simulation;
pub mod sync;
pub mod transaction;
pub mod verify;

pub use codec::SignatureCheck;
pub use crypto::{Address, NodeId, TxHash};
pub use error::{CodecError, ConfigError, PoolError, SyncError, TxError};
pub use peers::{MessageKind, PeerMessenger, PeerRoster, TxsMessage};
pub use pool::{ImportResult, MemoryPool, RejectReason, TxPool};
pub use queue::{DownloadQueue, ImportSummary, QueueDrainer, TxShard};
pub use router::TreeRouter;
pub use transaction::{Transaction, TxBody};
