// Module Registry - versioned module tracking with a dev/beta/release
// promotion pipeline and CAS-serialized registration.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod methods;
pub mod registration;
pub mod registry;
pub mod release;
pub mod resolver;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use auth::AuthContext;
pub use error::{RegistryError, Result};
pub use methods::{CatalogEvent, MethodCatalog, NoopMethodCatalog, RecordingMethodCatalog};
pub use registration::{
    BuildJob, BuildOrchestrator, BuildOutcome, LogSlice, ParsedBuildLog, ProgressReporter,
    Registrar, ScriptedOrchestrator, UnconfiguredOrchestrator,
};
pub use registry::{GetVersionOptions, ModuleInfo, Registry, VersionDetails};
pub use release::{ReleaseDecision, ReleaseWorkflow};
pub use resolver::{find_version_info, resolve_version, ResolveConstraints};
pub use store::{
    BasicModuleInfo, BuildFilter, BuildLog, BuildLogLine, BuildLogSummary, CasOutcome,
    CurrentVersions, InMemoryStore, Module, ModuleListFilter, ModuleSelector, ModuleState,
    ModuleVersion, RegistrationState, RegistryStore, ReleaseApproval, RequestedRelease,
    StoreError, Tag, VersionRef,
};
pub use telemetry::init_telemetry;
