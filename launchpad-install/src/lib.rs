pub mod activation;
pub mod engine;
pub mod env_cache;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod paths;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod store;

pub use engine::{InstallEngine, InstallOptions, InstallOutcome};
pub use env_cache::EnvCache;
pub use error::InstallError;
pub use fingerprint::Fingerprint;
pub use manifest::{Constraint, Manifest, ServiceDecl};
pub use paths::Layout;
pub use platform::{Arch, Os, Platform};
pub use registry::{
    ArtifactRef, DepKind, DepSpec, HttpRegistry, PackageInfo, PackageRegistry, StaticPackage,
    StaticRegistry,
};
pub use resolver::{Resolution, ResolvedPackage, ResolverOptions};
pub use store::{PackageStore, StoreEntry, StoreMetadata};
