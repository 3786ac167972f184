//! Intake Processing Library
//!
//! Streaming `multipart/form-data` parsing and the intake pipeline that
//! applies an [`UploadPolicy`](intake_core::UploadPolicy) to each part while
//! copying accepted file bytes to storage.

pub mod multipart;
pub mod naming;
pub mod pipeline;

pub use multipart::{parse_boundary, MultipartError, MultipartStream, PartHeader};
pub use naming::{safe_extension, stored_name};
pub use pipeline::IntakePipeline;
