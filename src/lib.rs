//! Style-isolated UI cards on a headless host document.
//!
//! A card renders author markup inside an isolation boundary and keeps it
//! fitted to a target width through a debounced resize/scale engine. All
//! card work runs cooperatively on a virtual clock, so drivers (tests,
//! benches, embedding applications) control time explicitly and every
//! interleaving is reproducible.

pub mod boundary;
pub mod card;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod events;
pub mod geometry;
pub mod images;
pub mod logging;
pub mod measure;
pub mod metrics;
pub mod runtime;
pub mod sanitize;
pub mod style;

pub use boundary::{Boundary, ClickTarget, HIDDEN_CLASS, IMG_FAILED_CLASS};
pub use card::{Card, CardId};
pub use config::{CardOptions, HostConfig, ResizeBounds, validate_options};
pub use dom::{Document, ImageState, NodeId};
pub use engine::EnginePhase;
pub use error::{CardError, Result};
pub use events::{EventPayload, EventType, Handler, ListenerRegistry};
pub use geometry::{MAX_SCALE, MIN_SCALE, Size, fit_scale};
pub use images::{SettlementReport, SettlementTracker, SettlementWait};
pub use logging::{
    FileSink, LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult,
    MemorySink,
};
pub use measure::natural_size;
pub use metrics::{MetricSnapshot, RuntimeMetrics};
pub use runtime::CardRuntime;
pub use sanitize::AllowList;
pub use style::BASE_STYLESHEET;
