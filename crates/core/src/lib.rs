pub mod audit;
pub mod cache;
pub mod commission;
pub mod config;
pub mod domain;
pub mod errors;
pub mod estimate;
pub mod flows;
pub mod matcher;
pub mod pricing;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use cache::{CatalogCache, CatalogSnapshot};
pub use commission::{compute_commission, CommissionBasis};
pub use config::AppConfig;
pub use domain::bulk_quote::{BulkQuote, BulkQuoteDetail, BulkQuoteId, DeviceLine, MatchConfidence};
pub use domain::device::{CategoryId, Device, DeviceId};
pub use domain::grade::Grade;
pub use domain::quote::{Quote, QuoteId, QuoteStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError, SideEffectFailure};
pub use estimate::{build_estimate, EstimateResult, ManifestRow, RateContext};
pub use flows::{LifecycleEngine, LifecycleEntity, TransitionError, TransitionPayload};
pub use matcher::{DeviceMatcher, MatchCandidate, MatchOutcome, MatchThresholds};
pub use pricing::{PriceAdjustment, PricingResolver, PricingSettings, RoundingRule};
