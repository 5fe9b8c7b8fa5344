pub mod syndesis;

pub use syndesis::{
    APPLICATION_URL_ANNOTATION, AddonSpec, ComponentsSpec, DatabaseResources,
    DatabaseSpec, Syndesis, SyndesisPhase, SyndesisSpec, SyndesisStatus,
    SyndesisStatusReason,
};
