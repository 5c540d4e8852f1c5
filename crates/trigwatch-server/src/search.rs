//! Trigger search: the index interface, a process-local index and the
//! helpers turning search query parameters into [`SearchOptions`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use trigwatch_common::types::Trigger;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search: index unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Every tag must be present on a hit.
    pub tags: Vec<String>,
    /// Lowercased free text; empty matches everything.
    pub text: String,
    pub only_problems: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub trigger_id: String,
    pub name: String,
}

/// Full-text trigger index. Results are ordered by trigger name.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, options: &SearchOptions) -> Result<Vec<SearchHit>, SearchError>;

    /// Insert or replace the document of `trigger`.
    async fn index(&self, trigger: &Trigger, has_problems: bool) -> Result<(), SearchError>;

    async fn remove(&self, trigger_id: &str) -> Result<(), SearchError>;
}

#[derive(Debug, Clone)]
struct Document {
    name: String,
    tags: Vec<String>,
    /// Lowercased name, description and targets joined by newlines.
    text: String,
    has_problems: bool,
}

/// In-process [`Searcher`].
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Searcher for MemorySearchIndex {
    async fn search(&self, options: &SearchOptions) -> Result<Vec<SearchHit>, SearchError> {
        let documents = self
            .documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut hits: Vec<SearchHit> = documents
            .iter()
            .filter(|(_, doc)| options.tags.iter().all(|t| doc.tags.contains(t)))
            .filter(|(_, doc)| !options.only_problems || doc.has_problems)
            .filter(|(_, doc)| options.text.is_empty() || doc.text.contains(&options.text))
            .map(|(id, doc)| SearchHit {
                trigger_id: id.clone(),
                name: doc.name.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.trigger_id.cmp(&b.trigger_id)));
        Ok(hits)
    }

    async fn index(&self, trigger: &Trigger, has_problems: bool) -> Result<(), SearchError> {
        let mut text = trigger.name.to_lowercase();
        for part in trigger.desc.iter().chain(trigger.targets.iter()) {
            text.push('\n');
            text.push_str(&part.to_lowercase());
        }
        let document = Document {
            name: trigger.name.clone(),
            tags: trigger.tags.clone(),
            text,
            has_problems,
        };
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(trigger.id.clone(), document);
        Ok(())
    }

    async fn remove(&self, trigger_id: &str) -> Result<(), SearchError> {
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(trigger_id);
        Ok(())
    }
}

/// Collect `tags[0]`, `tags[1]`, ... stopping at the first index that is
/// missing or empty.
///
/// # Examples
///
/// ```
/// use trigwatch_server::search::request_tags;
///
/// let query = vec![
///     ("tags[1]".to_string(), "web".to_string()),
///     ("tags[0]".to_string(), "prod".to_string()),
///     ("tags[3]".to_string(), "skipped".to_string()),
/// ];
/// assert_eq!(request_tags(&query), vec!["prod", "web"]);
/// ```
pub fn request_tags(query: &[(String, String)]) -> Vec<String> {
    let mut tags = Vec::new();
    loop {
        let key = format!("tags[{}]", tags.len());
        match query.iter().find(|(k, _)| *k == key) {
            Some((_, value)) if !value.is_empty() => tags.push(value.clone()),
            _ => return tags,
        }
    }
}

/// Boolean query flag with the usual `1/t/true` and `0/f/false` spellings.
/// Anything else, including absence, is `false`.
pub fn parse_bool_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("1" | "t" | "T" | "true" | "TRUE" | "True"))
}

/// Lowercase then percent-decode the search text. A malformed escape (`%`
/// not followed by two hex digits) empties the text, so the search matches
/// everything. Decoded bytes that are not UTF-8 are replaced.
///
/// # Examples
///
/// ```
/// use trigwatch_server::search::search_text;
///
/// assert_eq!(search_text(Some("CPU%20High")), "cpu high");
/// assert_eq!(search_text(Some("%zz")), "");
/// assert_eq!(search_text(Some("50%")), "");
/// assert_eq!(search_text(None), "");
/// ```
pub fn search_text(raw: Option<&str>) -> String {
    let lowered = raw.unwrap_or_default().to_lowercase();
    if !has_valid_escapes(&lowered) {
        return String::new();
    }
    String::from_utf8_lossy(&urlencoding::decode_binary(lowered.as_bytes())).into_owned()
}

fn has_valid_escapes(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let escape = bytes.get(idx + 1..idx + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            idx += 3;
        } else {
            idx += 1;
        }
    }
    true
}
