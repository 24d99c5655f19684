pub mod build_log;
pub mod orchestrator;
pub mod registrar;

pub use build_log::{LogSlice, ParsedBuildLog};
pub use orchestrator::{
    BuildJob, BuildOrchestrator, BuildOutcome, ProgressReporter, ScriptedOrchestrator,
    UnconfiguredOrchestrator,
};
pub use registrar::Registrar;

use chrono::Utc;
use uuid::Uuid;

/// Allocate a registration identifier: `{epoch-ms}_{unique suffix}`. The
/// timestamp prefix doubles as the attempt's creation time; the suffix keeps
/// concurrent attempts within the same millisecond distinct.
pub fn new_registration_id() -> String {
    format!("{}_{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
}

/// Creation time encoded in a registration id.
pub fn registration_timestamp(registration_id: &str) -> Option<i64> {
    registration_id.split('_').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_ids_carry_a_timestamp_and_are_unique() {
        let a = new_registration_id();
        let b = new_registration_id();
        assert_ne!(a, b);
        let ts = registration_timestamp(&a).unwrap();
        assert!(ts > 1_600_000_000_000);
        assert_eq!(registration_timestamp("nonsense"), None);
    }
}
