//! Live measurement pipeline: broadcast broker, store-interval gate,
//! keyset pagination and the retention sweeper.

pub mod bootstrap;
pub mod broker;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod gate;
pub mod ingest;
pub mod pagination;
pub mod retention;
pub mod settings;

pub use bootstrap::Engine;
pub use broker::{Broker, BrokerConfig, BrokerLoop, CloseReason, SubscriberId, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, IngestConfig};
pub use error::{CursorError, EngineError, IngestError, PageError, SettingsError, SweepError};
pub use gate::{StoreGate, ThrottleScope};
pub use ingest::{IngestOutcome, IngestRequest, Ingestor, SkipReason};
pub use pagination::{DEFAULT_LIMIT, MAX_LIMIT, Page, PageRequest, fetch_page, parse_limit};
pub use retention::{RetentionConfig, Sweeper};
pub use settings::Settings;
