//! Message templating: an in-memory namespace for runtime-registered
//! templates and an optional file-backed namespace for template directories.
//! Memory templates shadow file templates of the same name.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use omni_common::GatewayErrorKind;
use parking_lot::RwLock;
use serde_json::Value;

pub struct TemplateEngine {
    memory: RwLock<Handlebars<'static>>,
    memory_names: RwLock<Vec<String>>,
    file_dir: Option<PathBuf>,
    files: Option<RwLock<Handlebars<'static>>>,
}

impl TemplateEngine {
    pub fn new(template_dir: Option<&Path>) -> Self {
        let mut memory_hb = Handlebars::new();
        memory_hb.register_escape_fn(handlebars::no_escape);

        let (file_dir, files) = match template_dir {
            Some(dir) if dir.is_dir() => {
                let mut hb = Handlebars::new();
                hb.register_escape_fn(handlebars::no_escape);
                if let Err(e) = hb.register_templates_directory(dir, Default::default()) {
                    tracing::warn!(error = %e, dir = %dir.display(), "failed to load template directory");
                }
                (Some(dir.to_path_buf()), Some(RwLock::new(hb)))
            }
            _ => (None, None),
        };

        TemplateEngine {
            memory: RwLock::new(memory_hb),
            memory_names: RwLock::new(Vec::new()),
            file_dir,
            files,
        }
    }

    pub fn register(&self, name: &str, template_str: &str) -> Result<(), GatewayErrorKind> {
        self.memory
            .write()
            .register_template_string(name, template_str)
            .map_err(|e| GatewayErrorKind::TemplateRenderFailed(e.to_string()))?;
        let mut names = self.memory_names.write();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let had = self.memory.read().has_template(name);
        if had {
            self.memory.write().unregister_template(name);
            self.memory_names.write().retain(|n| n != name);
        }
        had
    }

    pub fn list_templates(&self) -> (Vec<String>, Vec<String>) {
        let memory = self.memory_names.read().clone();
        let files = self
            .files
            .as_ref()
            .map(|hb| hb.read().get_templates().keys().cloned().collect())
            .unwrap_or_default();
        (memory, files)
    }

    pub fn render(&self, template_name: &str, variables: &Value) -> Result<String, GatewayErrorKind> {
        if self.memory.read().has_template(template_name) {
            return self
                .memory
                .read()
                .render(template_name, variables)
                .map_err(|e| GatewayErrorKind::TemplateRenderFailed(e.to_string()));
        }

        if let Some(files) = &self.files {
            if files.read().has_template(template_name) {
                return files
                    .read()
                    .render(template_name, variables)
                    .map_err(|e| GatewayErrorKind::TemplateRenderFailed(e.to_string()));
            }
        }

        Err(GatewayErrorKind::TemplateNotFound(template_name.to_string()))
    }

    pub fn render_string(&self, template_str: &str, variables: &Value) -> Result<String, GatewayErrorKind> {
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        hb.render_template(template_str, variables)
            .map_err(|e| GatewayErrorKind::TemplateRenderFailed(e.to_string()))
    }

    pub fn has_template(&self, name: &str) -> bool {
        if self.memory.read().has_template(name) {
            return true;
        }
        self.files
            .as_ref()
            .map(|hb| hb.read().has_template(name))
            .unwrap_or(false)
    }

    pub fn template_dir(&self) -> Option<&Path> {
        self.file_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_template_renders_and_shadows_missing_file_namespace() {
        let engine = TemplateEngine::new(None);
        engine.register("greet", "Hello {{name}}!").unwrap();
        let out = engine.render("greet", &json!({"name": "Ada"})).unwrap();
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn missing_template_is_template_not_found() {
        let engine = TemplateEngine::new(None);
        let err = engine.render("nope", &json!({})).unwrap_err();
        assert_eq!(err.token(), "template_not_found");
    }

    #[test]
    fn render_string_does_not_require_registration() {
        let engine = TemplateEngine::new(None);
        let out = engine.render_string("{{a}}-{{b}}", &json!({"a": "x", "b": "y"})).unwrap();
        assert_eq!(out, "x-y");
    }

    #[test]
    fn unregister_removes_from_memory_listing() {
        let engine = TemplateEngine::new(None);
        engine.register("t1", "hi").unwrap();
        assert!(engine.unregister("t1"));
        assert!(!engine.has_template("t1"));
    }

    #[test]
    fn file_templates_are_discovered_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("welcome.hbs"), "Welcome {{name}}").unwrap();
        let engine = TemplateEngine::new(Some(dir.path()));
        let out = engine.render("welcome", &json!({"name": "Grace"})).unwrap();
        assert_eq!(out, "Welcome Grace");
    }
}
