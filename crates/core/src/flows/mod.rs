pub mod engine;
pub mod states;
pub mod tables;

pub use engine::{
    LifecycleEngine, LifecycleEntity, LifecycleStatus, TransitionError, TransitionTable,
};
pub use states::{
    EntityKind, LifecycleEffect, Requirement, ShippingInfo, StatusTimestamps, TimestampField,
    TransitionOutcome, TransitionPayload,
};
pub use tables::{BULK_QUOTE_TABLE, ORDER_TABLE, QUOTE_TABLE};
