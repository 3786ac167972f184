//! Domain models
//!
//! Upload policy (what may be uploaded) and intake outcomes (what was stored
//! or why the request was refused).

pub mod intake;
pub mod policy;

pub use intake::{AcceptedUpload, FormField, IntakeResult, Rejection, RejectionKind, StoredFile};
pub use policy::{mime_essence, FieldPolicy, IntakeLimits, UploadPolicy};
