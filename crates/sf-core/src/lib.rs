pub mod bundle;
pub mod checksum;
pub mod envelope;
pub mod error;
pub mod model;
pub mod validator;
pub mod value;

pub use bundle::*;
pub use error::{map_json, map_store_io, StoryForgeError};
pub use model::*;
pub use validator::{
    describe, validate_bundle, validate_bytes, BundleErrorCode, BundleIssue, IssueDescription,
    ValidationResult,
};
pub use value::StoryValue;
