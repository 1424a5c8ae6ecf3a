pub mod hub;
pub mod lifecycle;
pub mod message;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod signal;
pub mod sink;
pub mod timebase;

pub use hub::{BatchSink, Drain, Hub, HubConfig, HubError, HubPort, HubStats, MessagePort};
pub use lifecycle::{
    CancelToken, Lifecycle, LifecycleConfig, LifecycleState, StartOutcome, StopOutcome,
};
pub use message::{DeviceStatus, Message, MessageKind, Reading};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, PipelineError};
pub use producer::{Producer, ProducerStats};
pub use registry::{DeviceRegistry, RegistryError, N_MAX_SENSORS};
pub use signal::{Sample, SignalConfig, SignalError, SignalGenerator, SignalState};
pub use sink::{Persist, PersistError, Sink, SinkConfig, SinkInbox, SinkStats};
pub use timebase::{format_posix_us, posix_timestamp, unix_us};
