use serde::Serialize;

use crate::parse::TranslationPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Original,
    Translation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub kind: RowKind,
    pub text: String,
}

/// What a viewer currently shows: paired rows, or raw text when nothing
/// structured was recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBuffer {
    rows: Vec<Row>,
    raw: Option<String>,
}

impl RowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.raw = None;
    }

    /// Replaces the content with one original row and one translation row per
    /// pair. A side with no text emits no row.
    pub fn render(&mut self, pairs: &[TranslationPair]) {
        self.clear();
        for pair in pairs {
            if !pair.original.is_empty() {
                self.rows.push(Row {
                    kind: RowKind::Original,
                    text: pair.original.clone(),
                });
            }
            if !pair.translation.is_empty() {
                self.rows.push(Row {
                    kind: RowKind::Translation,
                    text: pair.translation.clone(),
                });
            }
        }
    }

    pub fn show_raw(&mut self, text: &str) {
        self.clear();
        self.raw = Some(text.to_string());
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Terminal rendering: originals flush left, translations indented.
    pub fn to_text(&self) -> String {
        if let Some(raw) = self.raw.as_deref() {
            return raw.to_string();
        }
        self.rows
            .iter()
            .map(|row| match row.kind {
                RowKind::Original => row.text.clone(),
                RowKind::Translation => format!("  → {}", row.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_response;
    use insta::assert_json_snapshot;

    #[test]
    fn rows_alternate_in_record_order() {
        let mut buffer = RowBuffer::new();
        buffer.render(&[
            TranslationPair::new("右上", "右上方"),
            TranslationPair::new("左下", "左下方"),
        ]);
        assert_json_snapshot!(buffer.rows(), @r###"
        [
          {
            "kind": "original",
            "text": "右上"
          },
          {
            "kind": "translation",
            "text": "右上方"
          },
          {
            "kind": "original",
            "text": "左下"
          },
          {
            "kind": "translation",
            "text": "左下方"
          }
        ]
        "###);
    }

    #[test]
    fn recovered_record_without_translation_renders_only_original() {
        let pairs = parse_response("[\n{\n\"original\": \"ドキッ\",\n},\n").expect("pairs");
        let mut buffer = RowBuffer::new();
        buffer.render(&pairs);
        assert_eq!(
            buffer.rows(),
            &[Row {
                kind: RowKind::Original,
                text: "ドキッ".to_string()
            }]
        );
        assert_eq!(buffer.to_text(), "ドキッ");
    }

    #[test]
    fn render_clears_previous_content() {
        let mut buffer = RowBuffer::new();
        buffer.show_raw("model said something");
        assert_eq!(buffer.to_text(), "model said something");

        buffer.render(&[TranslationPair::new("a", "b")]);
        assert!(buffer.raw().is_none());
        assert_eq!(buffer.to_text(), "a\n  → b");

        buffer.render(&[TranslationPair::new("c", "d")]);
        assert_eq!(buffer.rows().len(), 2);
        assert_eq!(buffer.rows()[0].text, "c");
    }
}
