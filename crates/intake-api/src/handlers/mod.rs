pub mod submit;
pub mod upload_form;
