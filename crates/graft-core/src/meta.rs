//! Meta-annotations attached to corpora and documents

use serde::{Deserialize, Serialize};

/// Qualified name of a meta-annotation: optional namespace plus name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}::{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A single `(namespace, name) -> value` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaAnnotation {
    #[serde(flatten)]
    pub qname: QName,
    pub value: String,
}

impl MetaAnnotation {
    pub fn new(namespace: Option<&str>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            qname: QName::new(namespace, name),
            value: value.into(),
        }
    }
}

/// Insertion-ordered set of meta-annotations, unique by qualified name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaAnnotations {
    entries: Vec<MetaAnnotation>,
}

impl MetaAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, qname: &QName) -> Option<&str> {
        self.entries
            .iter()
            .find(|m| &m.qname == qname)
            .map(|m| m.value.as_str())
    }

    pub fn contains(&self, qname: &QName) -> bool {
        self.get(qname).is_some()
    }

    /// Insert or overwrite, returning the previous value
    pub fn insert(&mut self, annotation: MetaAnnotation) -> Option<String> {
        match self.entries.iter_mut().find(|m| m.qname == annotation.qname) {
            Some(existing) => Some(std::mem::replace(&mut existing.value, annotation.value)),
            None => {
                self.entries.push(annotation);
                None
            }
        }
    }

    /// Insert only when the key is not present yet
    pub fn insert_if_absent(&mut self, annotation: MetaAnnotation) -> bool {
        if self.contains(&annotation.qname) {
            return false;
        }
        self.entries.push(annotation);
        true
    }

    /// Move every annotation of `source` whose key is missing here.
    ///
    /// Annotations whose key already exists stay in `source`, existing
    /// values are never overwritten. Returns the number moved.
    pub fn absorb(&mut self, source: &mut MetaAnnotations) -> usize {
        let mut moved = 0;
        let mut kept = Vec::new();
        for annotation in source.entries.drain(..) {
            if self.contains(&annotation.qname) {
                kept.push(annotation);
            } else {
                self.entries.push(annotation);
                moved += 1;
            }
        }
        source.entries = kept;
        moved
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaAnnotation> {
        self.entries.iter()
    }
}

impl FromIterator<MetaAnnotation> for MetaAnnotations {
    fn from_iter<I: IntoIterator<Item = MetaAnnotation>>(iter: I) -> Self {
        let mut meta = MetaAnnotations::new();
        for annotation in iter {
            meta.insert(annotation);
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let mut meta = MetaAnnotations::new();
        assert!(meta.insert(MetaAnnotation::new(None, "lang", "de")).is_none());
        assert_eq!(
            meta.insert(MetaAnnotation::new(None, "lang", "en")).as_deref(),
            Some("de")
        );
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn test_namespace_is_part_of_key() {
        let mut meta = MetaAnnotations::new();
        meta.insert(MetaAnnotation::new(Some("a"), "k", "1"));
        meta.insert(MetaAnnotation::new(Some("b"), "k", "2"));
        meta.insert(MetaAnnotation::new(None, "k", "3"));

        assert_eq!(meta.len(), 3);
        assert_eq!(meta.get(&QName::new(Some("b"), "k")), Some("2"));
    }

    #[test]
    fn test_absorb_first_wins() {
        let mut target = MetaAnnotations::new();
        target.insert(MetaAnnotation::new(Some("ns"), "k", "A"));

        let mut source = MetaAnnotations::new();
        source.insert(MetaAnnotation::new(Some("ns"), "k", "B"));
        source.insert(MetaAnnotation::new(Some("ns"), "other", "C"));

        assert_eq!(target.absorb(&mut source), 1);
        assert_eq!(target.get(&QName::new(Some("ns"), "k")), Some("A"));
        assert_eq!(target.get(&QName::new(Some("ns"), "other")), Some("C"));

        // the conflicting annotation stays with its owner
        assert_eq!(source.len(), 1);
        assert_eq!(source.get(&QName::new(Some("ns"), "k")), Some("B"));
    }
}
