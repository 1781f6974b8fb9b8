// Logical stream name resolution against the upstream catalog

use std::sync::Arc;

use crate::stream::types::{StreamDescription, StreamName};
use crate::stream::{CatalogSource, StreamResult};

/// Resolves logical stream names to their current remote descriptions
///
/// A thin, cache-free view over the catalog collaborator: every call reflects
/// the latest upstream state, and the multiplexer keeps whatever history it
/// needs for change detection.
#[derive(Clone)]
pub struct StreamDirectory {
    source: Arc<dyn CatalogSource>,
}

impl StreamDirectory {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self { source }
    }

    /// Resolve `name` to its current description, `None` when the catalog
    /// does not currently offer it
    pub async fn resolve(&self, name: &str) -> StreamResult<Option<StreamDescription>> {
        let streams = self.source.streams().await?;
        Ok(streams.into_iter().find(|stream| stream.name == name))
    }

    /// Names of all streams the catalog currently offers
    pub async fn names(&self) -> StreamResult<Vec<StreamName>> {
        let streams = self.source.streams().await?;
        Ok(streams.into_iter().map(|stream| stream.name).collect())
    }

    /// Whether two resolutions of the same name differ materially
    ///
    /// Deep structural comparison: endpoint identity, signalling parameters
    /// and the path allow-list all take part.
    pub fn changed(old: &StreamDescription, new: &StreamDescription) -> bool {
        old != new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::SignallingConfig;
    use async_trait::async_trait;

    struct FixedCatalog {
        streams: Vec<StreamDescription>,
    }

    #[async_trait]
    impl CatalogSource for FixedCatalog {
        async fn streams(&self) -> StreamResult<Vec<StreamDescription>> {
            Ok(self.streams.clone())
        }
    }

    fn description(name: &str) -> StreamDescription {
        StreamDescription {
            id: format!("{name}-endpoint"),
            name: name.to_string(),
            signalling: SignallingConfig {
                uri: "ws://vehicle.local:6021".to_string(),
                ice_servers: Vec::new(),
            },
            allowed_paths: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_resolve_finds_by_name() {
        let directory = StreamDirectory::new(Arc::new(FixedCatalog {
            streams: vec![description("front-camera"), description("down-camera")],
        }));

        let resolved = directory.resolve("down-camera").await.unwrap();
        assert_eq!(resolved.unwrap().name, "down-camera");
        assert!(directory.resolve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_names_reflects_catalog() {
        let directory = StreamDirectory::new(Arc::new(FixedCatalog {
            streams: vec![description("front-camera"), description("down-camera")],
        }));

        let names = directory.names().await.unwrap();
        assert_eq!(names, vec!["front-camera", "down-camera"]);
    }

    #[test]
    fn test_changed_is_structural() {
        let old = description("front-camera");
        let mut new = old.clone();
        assert!(!StreamDirectory::changed(&old, &new));

        new.signalling.uri = "ws://vehicle.local:7000".to_string();
        assert!(StreamDirectory::changed(&old, &new));
    }
}
