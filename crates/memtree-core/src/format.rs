//! Per-record post-processing applied to every memory placed in a response.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::{RecallError, Result};
use crate::memory::Memory;
use crate::store::FileStorage;

/// Markdown image: `![alt](ref)` or `![alt](ref "title")`.
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"!\[([^\]]*)\]\(\s*([^)\s]+)(\s+"[^"]*")?\s*\)"#).unwrap());
static TRAILING_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+\n").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Tidy presentation text: no trailing whitespace on lines, at most one blank
/// line in a row, no leading or trailing blank space.
pub fn format_response(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = TRAILING_WS.replace_all(&text, "\n");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Remove every markdown image reference from `text`.
pub fn strip_images(text: &str) -> String {
    let stripped = IMAGE.replace_all(text, "");
    format_response(&stripped)
}

fn is_local_ref(r: &str) -> bool {
    !(r.starts_with("http://") || r.starts_with("https://") || r.starts_with("data:"))
}

/// Rewrite every local image ref in `text` to a presigned URL.
pub async fn presign_images(
    text: &str,
    user_id: &str,
    storage: &dyn FileStorage,
) -> Result<String> {
    // (target start, target end, image end) for each local ref
    let spans: Vec<(usize, usize, usize)> = IMAGE
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(0)?, caps.get(2)?)))
        .filter(|(_, target)| is_local_ref(target.as_str()))
        .map(|(whole, target)| (target.start(), target.end(), whole.end()))
        .collect();
    if spans.is_empty() {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end, image_end) in spans {
        let image_ref = &text[start..end];
        let url = storage
            .presign(user_id, image_ref)
            .await
            .map_err(|source| RecallError::Presign {
                image_ref: image_ref.to_string(),
                source,
            })?;

        out.push_str(&text[last..start]);
        out.push_str(&url);
        out.push_str(&text[end..image_end]);
        last = image_end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Applies the request's formatting policy to each memory.
#[derive(Clone)]
pub struct MemoryFormatter {
    storage: Arc<dyn FileStorage>,
    user_id: Arc<str>,
    strip: bool,
}

impl MemoryFormatter {
    pub fn new(storage: Arc<dyn FileStorage>, user_id: &str, strip_images: bool) -> Self {
        Self {
            storage,
            user_id: Arc::from(user_id),
            strip: strip_images,
        }
    }

    /// Format `memory` in place. Presign failures are fatal.
    pub async fn apply(&self, memory: &mut Memory) -> Result<()> {
        memory.prompt = format_response(&memory.prompt);
        memory.response = format_response(&memory.response);
        if self.strip {
            memory.prompt = strip_images(&memory.prompt);
            memory.response = strip_images(&memory.response);
        } else {
            let storage = self.storage.as_ref();
            memory.prompt = presign_images(&memory.prompt, &self.user_id, storage).await?;
            memory.response = presign_images(&memory.response, &self.user_id, storage).await?;
        }
        Ok(())
    }

    pub async fn apply_all(&self, memories: &mut [Memory]) -> Result<()> {
        for memory in memories {
            self.apply(memory).await?;
        }
        Ok(())
    }
}
