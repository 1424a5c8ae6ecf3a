pub mod metrics;
pub mod store;

pub use metrics::{init_metrics, serve_metrics};
pub use store::{
    open_store, read_records, resolve_location, AppendLog, StoreError, StoreKind,
    TransactionalStore,
};
