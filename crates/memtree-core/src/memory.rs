use serde::{Deserialize, Serialize};

/// One conversational exchange as returned by a recall.
///
/// Built fresh from store results for each request. Long-term memories form a
/// tree through `children`; the root of each tree has `depth == 0`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub prompt: String,
    pub response: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_distance: Option<f32>,
    #[serde(default)]
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Memory>,
}

impl Memory {
    pub fn new(id: impl Into<String>, prompt: &str, response: &str, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.to_string(),
            response: response.to_string(),
            timestamp,
            ..Default::default()
        }
    }

    /// Embedding used to look for this memory's descendants: the response
    /// side when present, the prompt side otherwise.
    pub fn outbound_embedding(&self) -> Option<&[f32]> {
        self.response_embedding
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.prompt_embedding.as_deref().filter(|v| !v.is_empty()))
    }

    /// Visit this memory and every descendant, depth first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Memory)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Memory::subtree_len).sum::<usize>()
    }

    /// Drop both embeddings from this memory and all descendants.
    pub fn strip_embeddings(&mut self) {
        self.prompt_embedding = None;
        self.response_embedding = None;
        for child in &mut self.children {
            child.strip_embeddings();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Memory {
        let mut root = Memory::new("root", "q", "a", 1);
        let mut mid = Memory::new("mid", "q", "a", 2);
        mid.children.push(Memory::new("leaf", "q", "a", 3));
        root.children.push(mid);
        root.children.push(Memory::new("other", "q", "a", 4));
        root
    }

    #[test]
    fn test_outbound_prefers_response() {
        let mut m = Memory::new("m", "", "", 0);
        assert!(m.outbound_embedding().is_none());

        m.prompt_embedding = Some(vec![1.0, 0.0]);
        assert_eq!(m.outbound_embedding(), Some(&[1.0, 0.0][..]));

        m.response_embedding = Some(vec![0.0, 1.0]);
        assert_eq!(m.outbound_embedding(), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn test_outbound_ignores_empty_response() {
        let mut m = Memory::new("m", "", "", 0);
        m.response_embedding = Some(Vec::new());
        m.prompt_embedding = Some(vec![0.5]);
        assert_eq!(m.outbound_embedding(), Some(&[0.5][..]));
    }

    #[test]
    fn test_walk_order() {
        let root = tree();
        let mut ids = Vec::new();
        root.walk(&mut |m| ids.push(m.id.as_str()));
        assert_eq!(ids, ["root", "mid", "leaf", "other"]);
        assert_eq!(root.subtree_len(), 4);
    }

    #[test]
    fn test_serialize_skips_empty_fields() {
        let json = serde_json::to_value(Memory::new("m", "hi", "there", 7)).unwrap();
        assert_eq!(json["id"], "m");
        assert_eq!(json["depth"], 0);
        assert!(json.get("children").is_none());
        assert!(json.get("promptEmbedding").is_none());
        assert!(json.get("matchDistance").is_none());
    }

    #[test]
    fn test_strip_embeddings_recurses() {
        let mut root = tree();
        root.children[0].children[0].prompt_embedding = Some(vec![1.0]);
        root.strip_embeddings();
        assert!(root.children[0].children[0].prompt_embedding.is_none());
    }
}
