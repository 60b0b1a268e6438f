//! View rendering with minijinja.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::Environment;
use perch_core::{BoxError, ViewRenderer};
use serde_json::Value;

/// A [`ViewRenderer`] resolving views to templates of a minijinja
/// [`Environment`].
///
/// View `user/profile` with extension `html` loads the template
/// `user/profile.html`. Views that already carry the extension are used as-is.
#[derive(Clone)]
pub struct MiniJinjaRenderer {
    env: Arc<Environment<'static>>,
    extension: String,
}

impl MiniJinjaRenderer {
    /// Loads templates lazily from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(dir));
        Self::from_env(env, extension)
    }

    /// Wraps a preconfigured environment.
    pub fn from_env(env: Environment<'static>, extension: impl Into<String>) -> Self {
        Self {
            env: Arc::new(env),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    fn template_name(&self, view: &str) -> String {
        let view = view.trim_start_matches('/');
        let suffix = format!(".{}", self.extension);
        if self.extension.is_empty() || view.ends_with(&suffix) {
            view.to_string()
        } else {
            format!("{view}{suffix}")
        }
    }
}

#[async_trait]
impl ViewRenderer for MiniJinjaRenderer {
    async fn render(&self, view: &str, params: Option<&Value>) -> Result<String, BoxError> {
        let template = self.env.get_template(&self.template_name(view))?;
        let html = match params {
            Some(params) => template.render(params)?,
            None => template.render(minijinja::context! {})?,
        };
        Ok(html)
    }
}

impl std::fmt::Debug for MiniJinjaRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniJinjaRenderer")
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}
