use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Position in the corpus; doubles as the vector index row.
    pub id: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap<String, JsonValue>>,
}

impl Passage {
    /// A human-readable origin for the passage, taken from the `source`,
    /// `title` or `file_path` metadata field in that order.
    pub fn source(&self) -> Option<&str> {
        let metadata = self.metadata.as_ref()?;
        ["source", "title", "file_path"]
            .iter()
            .find_map(|key| {
                metadata
                    .get(*key)
                    .and_then(JsonValue::as_str)
                    .filter(|s| !s.trim().is_empty())
            })
    }
}

/// Read-only passage lookup by corpus position.
#[derive(Debug, Clone, Default)]
pub struct PassageStore {
    passages: Vec<Passage>,
}

impl PassageStore {
    /// Ids are assigned from position, whatever the input carried.
    pub fn new(passages: impl IntoIterator<Item = (String, Option<JsonMap<String, JsonValue>>)>) -> Self {
        let passages = passages
            .into_iter()
            .enumerate()
            .map(|(id, (text, metadata))| Passage { id, text, metadata })
            .collect();
        Self { passages }
    }

    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| (t.into(), None)))
    }

    pub fn get(&self, id: usize) -> Result<&Passage> {
        self.passages.get(id).ok_or(Error::NotFound {
            id,
            size: self.passages.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Passage> {
        self.passages.iter()
    }
}
