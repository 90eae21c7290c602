//! Build-numbered artifact names and the build records that list them.

pub mod name;
pub mod record;

pub use name::{ArtifactName, ArtifactNameError, DIFF_QUALIFIER};
pub use record::{BuildRecord, BuildStatus, StoredArtifact};
