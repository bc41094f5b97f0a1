use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

use crate::settings::Settings;

const VIEWER_TEMPLATE: &str = include_str!("templates/viewer.html.tera");

pub(crate) fn render_viewer_html(settings: &Settings) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("title", "Manga translations");
    let default_dir = settings.output_dir.display().to_string();
    context.insert("default_dir_json", &serde_json::to_string(&default_dir)?);
    Tera::one_off(VIEWER_TEMPLATE, &context, true).with_context(|| "failed to render viewer template")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn viewer_embeds_default_dir_as_json() {
        let settings = Settings {
            output_dir: PathBuf::from("/books/\"vol1\""),
            ..Settings::default()
        };
        let html = render_viewer_html(&settings).expect("render");
        assert!(html.contains(r#"const defaultDir = "/books/\"vol1\"";"#));
        assert!(html.contains("/api/pairs"));
        assert!(html.contains("<title>Manga translations</title>"));
    }
}
