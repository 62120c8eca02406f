// ============================================================
// Layer 3 — Stream Identity and Registry
// ============================================================
// Every named input of the reader is a "stream":
//
//   Real      → acoustic feature frames, `dim` floats per frame
//   Category  → label indices, expanded to `dim`-wide columns
//               (one-hot, or a mapped target vector)
//
// Names are resolved ONCE into a StreamId (kind + index within
// that kind) when the loop starts. The hot copy path then works
// on plain indices and never touches a string map again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{ReaderError, ReaderResult};
use crate::domain::label_map::LabelTargetMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Real,
    Category,
}

/// Stable identity of one stream: its kind plus its position
/// among the streams of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub kind:  StreamKind,
    pub index: usize,
}

impl StreamId {
    pub fn feature(index: usize) -> Self {
        Self { kind: StreamKind::Real, index }
    }

    pub fn label(index: usize) -> Self {
        Self { kind: StreamKind::Category, index }
    }
}

/// Everything the packer needs to know about one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub name:       String,
    pub id:         StreamId,
    /// Values per frame in the produced tensors
    pub dim:        usize,
    /// Category streams only: label → target vectors
    pub target_map: Option<LabelTargetMap>,
}

impl StreamInfo {
    /// Number of distinct label indices this stream accepts.
    pub fn label_count(&self) -> usize {
        match &self.target_map {
            Some(map) => map.label_count(),
            None      => self.dim,
        }
    }
}

/// A stream requested by the caller, resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedStream {
    pub name: String,
    pub id:   StreamId,
    pub dim:  usize,
}

// ─── StreamRegistry ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRegistry {
    features: Vec<StreamInfo>,
    labels:   Vec<StreamInfo>,
    by_name:  HashMap<String, StreamId>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a real-valued feature stream.
    pub fn add_feature(&mut self, name: impl Into<String>, dim: usize) -> ReaderResult<StreamId> {
        let id = StreamId::feature(self.features.len());
        let info = StreamInfo { name: name.into(), id, dim, target_map: None };
        self.insert(info)
    }

    /// Register a category stream, optionally with a label→target map.
    /// With a map the stream width is the map's target width.
    pub fn add_label(
        &mut self,
        name:       impl Into<String>,
        dim:        usize,
        target_map: Option<LabelTargetMap>,
    ) -> ReaderResult<StreamId> {
        let name = name.into();
        if let Some(map) = &target_map {
            if map.target_dim() != dim {
                return Err(ReaderError::LabelMapping(format!(
                    "stream '{}' declares dim {} but its targets are {} wide",
                    name,
                    dim,
                    map.target_dim()
                )));
            }
        }
        let id = StreamId::label(self.labels.len());
        self.insert(StreamInfo { name, id, dim, target_map })
    }

    fn insert(&mut self, info: StreamInfo) -> ReaderResult<StreamId> {
        if info.dim == 0 {
            return Err(ReaderError::Config(format!("stream '{}' has zero dimension", info.name)));
        }
        if self.by_name.contains_key(&info.name) {
            return Err(ReaderError::Config(format!("stream '{}' is declared twice", info.name)));
        }
        let id = info.id;
        self.by_name.insert(info.name.clone(), id);
        match id.kind {
            StreamKind::Real     => self.features.push(info),
            StreamKind::Category => self.labels.push(info),
        }
        Ok(id)
    }

    pub fn features(&self) -> &[StreamInfo] {
        &self.features
    }

    pub fn labels(&self) -> &[StreamInfo] {
        &self.labels
    }

    pub fn info(&self, id: StreamId) -> &StreamInfo {
        match id.kind {
            StreamKind::Real     => &self.features[id.index],
            StreamKind::Category => &self.labels[id.index],
        }
    }

    pub fn lookup(&self, name: &str) -> ReaderResult<StreamId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ReaderError::UnknownStream(name.to_string()))
    }

    /// Resolve a set of caller-supplied names, in the given order.
    pub fn resolve<'a, I>(&self, names: I) -> ReaderResult<Vec<RequestedStream>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .map(|name| {
                let id = self.lookup(name)?;
                Ok(RequestedStream { name: name.clone(), id, dim: self.info(id).dim })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StreamRegistry {
        let mut r = StreamRegistry::new();
        r.add_feature("features", 4).unwrap();
        r.add_label("labels", 3, None).unwrap();
        r
    }

    #[test]
    fn test_ids_are_per_kind() {
        let mut r = registry();
        let second = r.add_feature("pitch", 1).unwrap();
        assert_eq!(second, StreamId::feature(1));
        assert_eq!(r.lookup("labels").unwrap(), StreamId::label(0));
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let r = registry();
        assert_eq!(
            r.lookup("ivector").unwrap_err(),
            ReaderError::UnknownStream("ivector".into())
        );
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut r = registry();
        assert!(r.add_label("features", 2, None).is_err());
    }

    #[test]
    fn test_resolve_keeps_dims() {
        let r = registry();
        let names = vec!["labels".to_string(), "features".to_string()];
        let resolved = r.resolve(&names).unwrap();
        assert_eq!(resolved[0].dim, 3);
        assert_eq!(resolved[1].id, StreamId::feature(0));
    }

    #[test]
    fn test_target_map_width_must_match_dim() {
        let mut r = StreamRegistry::new();
        let map = LabelTargetMap::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!(r.add_label("targets", 3, Some(map.clone())).is_err());
        let id = r.add_label("targets", 2, Some(map)).unwrap();
        assert_eq!(r.info(id).label_count(), 2);
    }
}
