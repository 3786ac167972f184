use std::sync::Arc;

use anyhow::Context;
use intake_core::Config;
use intake_processing::IntakePipeline;
use intake_storage::Storage;
use minijinja::Environment;

pub const UPLOAD_FORM_TEMPLATE: &str = "upload_form.html";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: IntakePipeline,
    pub storage: Arc<dyn Storage>,
    pub templates: Arc<Environment<'static>>,
}

impl AppState {
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        let policy = Arc::new(config.upload_policy().clone());
        let pipeline = IntakePipeline::new(policy, storage.clone());

        let mut templates = Environment::new();
        templates
            .add_template(
                UPLOAD_FORM_TEMPLATE,
                include_str!("../templates/upload_form.html"),
            )
            .context("Failed to load upload form template")?;

        Ok(Self {
            config,
            pipeline,
            storage,
            templates: Arc::new(templates),
        })
    }
}
