use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PixelSource, TypedBuffer};
use crate::dims::Selection;
use crate::error::SourceError;
use crate::manifest::ImageManifest;
use crate::stats::{buffer_stats_parallel, ChannelStats};

/// An opened multi-resolution image.
///
/// Level 0 is full resolution; each following level halves both spatial
/// axes. The pyramid owns every cache and file handle of its sources; they
/// are released when it is dropped.
#[derive(Clone)]
pub struct Pyramid {
    levels: Vec<Arc<dyn PixelSource>>,
    manifest: Option<Arc<ImageManifest>>,
}

impl Pyramid {
    /// Assemble a pyramid; at least one level is required.
    pub fn new(
        levels: Vec<Arc<dyn PixelSource>>,
        manifest: Option<ImageManifest>,
    ) -> Result<Self, SourceError> {
        if levels.is_empty() {
            return Err(SourceError::MalformedMetadata(
                "pyramid has no resolution levels".to_string(),
            ));
        }
        Ok(Self {
            levels,
            manifest: manifest.map(Arc::new),
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[Arc<dyn PixelSource>] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> Result<&Arc<dyn PixelSource>, SourceError> {
        self.levels.get(level).ok_or(SourceError::LevelOutOfRange {
            level,
            count: self.levels.len(),
        })
    }

    /// Full-resolution level.
    pub fn base(&self) -> &Arc<dyn PixelSource> {
        &self.levels[0]
    }

    /// Smallest level.
    pub fn lowest(&self) -> &Arc<dyn PixelSource> {
        &self.levels[self.levels.len() - 1]
    }

    pub fn manifest(&self) -> Option<&ImageManifest> {
        self.manifest.as_deref()
    }

    /// Statistics of one plane per selection, read from the lowest level.
    ///
    /// Planes are fetched concurrently; statistics run on the blocking pool,
    /// one rayon task per channel.
    pub async fn channel_stats(
        &self,
        selections: &[Selection],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelStats>, SourceError> {
        let source = Arc::clone(self.lowest());
        debug!(
            planes = selections.len(),
            width = source.width(),
            height = source.height(),
            "computing channel statistics"
        );

        let mut tasks = JoinSet::new();
        for (i, selection) in selections.iter().enumerate() {
            let source = Arc::clone(&source);
            let selection = selection.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let raster = source.get_raster(&selection, &cancel).await?;
                Ok::<_, SourceError>((i, raster.data))
            });
        }

        let mut buffers: Vec<Option<TypedBuffer>> = vec![None; selections.len()];
        while let Some(joined) = tasks.join_next().await {
            let (i, data) = joined.map_err(|e| SourceError::Task(e.to_string()))??;
            buffers[i] = Some(data);
        }
        let mut buffers: Vec<TypedBuffer> = buffers.into_iter().flatten().collect();

        let results = tokio::task::spawn_blocking(move || buffer_stats_parallel(&mut buffers))
            .await
            .map_err(|e| SourceError::Task(e.to_string()))?;

        results
            .into_iter()
            .map(|r| r.map_err(SourceError::from))
            .collect()
    }
}

impl std::fmt::Debug for Pyramid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pyramid")
            .field("levels", &self.levels.len())
            .field("base_shape", &self.base().shape())
            .finish()
    }
}
