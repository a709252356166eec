use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read face templates from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("face template file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("student {0} has an empty face template")]
    EmptyTemplate(String),
}

/// A student's enrolled face: a single embedding or several captures.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplateEntry {
    One(Vec<f32>),
    Many(Vec<Vec<f32>>),
}

/// Precomputed face embeddings keyed by student id. Iteration is ordered by
/// student id so nearest-neighbour ties resolve the same way on every run.
#[derive(Debug, Default, Clone)]
pub struct EmbeddingStore {
    templates: BTreeMap<String, Vec<Vec<f32>>>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, TemplateError> {
        let parsed: BTreeMap<String, TemplateEntry> = serde_json::from_str(raw)?;
        let mut store = Self::new();
        for (student_id, entry) in parsed {
            let list = match entry {
                TemplateEntry::One(v) => vec![v],
                TemplateEntry::Many(vs) => vs,
            };
            if list.is_empty() || list.iter().any(|v| v.is_empty()) {
                return Err(TemplateError::EmptyTemplate(student_id));
            }
            store.templates.insert(student_id, list);
        }
        Ok(store)
    }

    pub fn insert(&mut self, student_id: impl Into<String>, embedding: Vec<f32>) {
        self.templates.entry(student_id.into()).or_default().push(embedding);
    }

    /// Every (student id, template) pair in student-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.templates
            .iter()
            .flat_map(|(id, list)| list.iter().map(move |t| (id.as_str(), t.as_slice())))
    }

    pub fn students(&self) -> usize {
        self.templates.len()
    }

    pub fn len(&self) -> usize {
        self.templates.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_single_and_multi_template_entries() {
        let store = EmbeddingStore::from_json(r#"{"SV002": [[0.0, 1.0], [1.0, 0.0]], "SV001": [0.6, 0.8]}"#).unwrap();
        assert_eq!(store.students(), 2);
        assert_eq!(store.len(), 3);
        let ids: Vec<&str> = store.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["SV001", "SV002", "SV002"]);
    }

    #[test]
    fn rejects_empty_templates() {
        let err = EmbeddingStore::from_json(r#"{"SV001": []}"#).unwrap_err();
        assert!(matches!(err, TemplateError::EmptyTemplate(id) if id == "SV001"));
        let err = EmbeddingStore::from_json(r#"{"SV001": [[0.1], []]}"#).unwrap_err();
        assert!(matches!(err, TemplateError::EmptyTemplate(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(EmbeddingStore::from_json("[1, 2, 3]"), Err(TemplateError::Parse(_))));
        assert!(matches!(EmbeddingStore::from_json(r#"{"SV001": "abc"}"#), Err(TemplateError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EmbeddingStore::load(Path::new("/no/such/embeddings.json")).unwrap_err();
        assert!(err.to_string().contains("/no/such/embeddings.json"));
    }
}
