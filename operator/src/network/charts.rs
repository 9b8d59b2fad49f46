//! Chart renderer collaborator.
//!
//! The operator only produces the value tree; turning it into manifests is
//! plain templating. The template files ship with the deployment, outside
//! this repository.

use std::path::Path;

use tera::Tera;

/// Renders the chart values into the manifest applied to the shoot.
pub trait ChartRenderer: Send + Sync {
    /// Render all templates with the given values into one multi-document
    /// YAML manifest.
    fn render(
        &self,
        release: &str,
        namespace: &str,
        values: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Directory-based tera renderer.
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    /// Load every YAML template below the given chart directory.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let pattern = format!("{}/**/*.yaml", dir.display());
        let tera = Tera::new(&pattern)?;
        Ok(Self { tera })
    }

    /// Build a renderer from in-memory templates.
    pub fn from_templates(templates: &[(&str, &str)]) -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(templates.to_vec())?;
        Ok(Self { tera })
    }
}

impl ChartRenderer for TeraRenderer {
    fn render(
        &self,
        release: &str,
        namespace: &str,
        values: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>> {
        let mut context = tera::Context::from_serialize(values)?;
        context.insert(
            "release",
            &serde_json::json!({ "name": release, "namespace": namespace }),
        );

        // stable template order keeps the manifest deterministic
        let mut names: Vec<&str> = self.tera.get_template_names().collect();
        names.sort_unstable();

        let mut documents = Vec::with_capacity(names.len());
        for name in names {
            let rendered = self.tera.render(name, &context)?;
            if !rendered.trim().is_empty() {
                documents.push(rendered);
            }
        }
        Ok(documents.join("\n---\n").into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_values_into_documents() {
        let renderer = TeraRenderer::from_templates(&[
            (
                "configmap.yaml",
                "kind: ConfigMap\nmetadata:\n  name: {{ release.name }}-config\ndata:\n  backend: {{ config.backend }}\n",
            ),
            ("empty.yaml", "{% if config.multus.enabled %}kind: Skipped{% endif %}"),
        ])
        .unwrap();

        let values = serde_json::json!({
            "config": { "backend": "bird", "multus": { "enabled": false } },
        });
        let manifest = renderer.render("calico", "kube-system", &values).unwrap();
        let manifest = String::from_utf8(manifest).unwrap();
        assert!(manifest.contains("name: calico-config"));
        assert!(manifest.contains("backend: bird"));
        // empty documents are dropped
        assert!(!manifest.contains("---"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let templates = [
            ("b.yaml", "kind: B"),
            ("a.yaml", "kind: A"),
        ];
        let renderer = TeraRenderer::from_templates(&templates).unwrap();
        let values = serde_json::json!({});
        let first = renderer.render("calico", "kube-system", &values).unwrap();
        let second = renderer.render("calico", "kube-system", &values).unwrap();
        assert_eq!(first, second);
        assert!(String::from_utf8(first).unwrap().starts_with("kind: A"));
    }
}
