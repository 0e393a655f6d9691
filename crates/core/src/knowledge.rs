//! Knowledge base — categorized short text facts injected into the system prompt.
//!
//! Persisted layout:
//! ```json
//! {"general": ["..."], "categories": {"name": ["..."]}}
//! ```
//! Category buckets keep their insertion order, both in memory and on disk.

use async_trait::async_trait;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KnowledgeError;

/// Lead-in line placed before the numbered excerpt.
pub const EXCERPT_LEAD_IN: &str = "Here is important information you should know:";

/// Bucket name used in ids for uncategorized entries.
pub const GENERAL_BUCKET: &str = "general";

/// Append-only knowledge collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub general: Vec<String>,

    #[serde(default)]
    pub categories: Categories,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `content` to `category` (or `general`) and return its id,
    /// `<bucket>_<index>`.
    pub fn add(&mut self, content: impl Into<String>, category: Option<&str>) -> String {
        match category.filter(|c| !c.is_empty()) {
            Some(name) => {
                let bucket = self.categories.bucket_mut(name);
                bucket.push(content.into());
                format!("{name}_{}", bucket.len() - 1)
            }
            None => {
                self.general.push(content.into());
                format!("{GENERAL_BUCKET}_{}", self.general.len() - 1)
            }
        }
    }

    /// Undo the most recent `add` into the given bucket.
    pub fn remove_last(&mut self, category: Option<&str>) {
        match category.filter(|c| !c.is_empty()) {
            Some(name) => {
                if let Some(bucket) = self.categories.get_mut(name) {
                    bucket.pop();
                    if bucket.is_empty() {
                        self.categories.remove(name);
                    }
                }
            }
            None => {
                self.general.pop();
            }
        }
    }

    /// Entries for `category`, or every entry (`general` first, then buckets in
    /// insertion order) when no category is given. Unknown categories yield an
    /// empty list.
    pub fn get(&self, category: Option<&str>) -> Vec<String> {
        match category.filter(|c| !c.is_empty()) {
            Some(name) => self.categories.get(name).map(<[String]>::to_vec).unwrap_or_default(),
            None => {
                let mut all = self.general.clone();
                for (_, entries) in self.categories.iter() {
                    all.extend(entries.iter().cloned());
                }
                all
            }
        }
    }

    /// Numbered excerpt of the first `max_items` entries, or an empty string
    /// when there is nothing to show.
    pub fn format_excerpt(&self, category: Option<&str>, max_items: usize) -> String {
        let items = self.get(category);
        if items.is_empty() || max_items == 0 {
            return String::new();
        }

        let mut formatted = format!("{EXCERPT_LEAD_IN}\n\n");
        for (i, item) in items.iter().take(max_items).enumerate() {
            formatted.push_str(&format!("{}. {}\n", i + 1, item));
        }
        formatted
    }

    pub fn len(&self) -> usize {
        self.general.len() + self.categories.iter().map(|(_, e)| e.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Category buckets in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categories(Vec<(String, Vec<String>)>);

impl Categories {
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.as_slice())
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        self.0
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries)
    }

    fn bucket_mut(&mut self, name: &str) -> &mut Vec<String> {
        let idx = match self.0.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.0.push((name.to_string(), Vec::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[idx].1
    }

    fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| n != name);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(n, e)| (n.as_str(), e.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Categories {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, entries) in &self.0 {
            map.serialize_entry(name, entries)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Categories {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CategoriesVisitor;

        impl<'de> Visitor<'de> for CategoriesVisitor {
            type Value = Categories;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of category name to list of entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Categories, A::Error> {
                let mut categories = Categories::default();
                while let Some((name, entries)) = access.next_entry::<String, Vec<String>>()? {
                    categories.bucket_mut(&name).extend(entries);
                }
                Ok(categories)
            }
        }

        deserializer.deserialize_map(CategoriesVisitor)
    }
}

/// Persistence collaborator for the knowledge base.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// A human-readable name for this store (e.g. "json_file", "in_memory").
    fn name(&self) -> &str;

    /// Load the whole knowledge base.
    async fn load(&self) -> Result<KnowledgeBase, KnowledgeError>;

    /// Replace the persisted knowledge base.
    async fn save(&self, knowledge: &KnowledgeBase) -> Result<(), KnowledgeError>;
}
