use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot::{self, error::TryRecvError};

use super::{LevelData, NavMesh};
use crate::assets::{AssetError, AssetSource, ModelDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Idle,
    LoadingTerrain,
    BuildingNavMesh,
    LoadingModels,
    Attaching,
    Ready,
    Failed,
}

impl LoadStage {
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            Self::LoadingTerrain | Self::BuildingNavMesh | Self::LoadingModels | Self::Attaching
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("loader worker for {0:?} stopped without a result")]
    WorkerLost(LoadStage),
    #[error("level '{0}' is still loading")]
    Busy(String),
}

#[derive(Debug, Clone)]
pub struct LoadedLevel {
    pub name: String,
    pub data: LevelData,
    pub navmesh: NavMesh,
    pub models: BTreeMap<String, ModelDesc>,
}

#[derive(Debug)]
pub enum LoaderEvent {
    StageChanged(LoadStage),
    /// All background stages finished; attach on the tick thread, then call
    /// [`LevelLoader::attached`].
    Attach(LoadedLevel),
    Failed(LoadError),
    /// A deferred unload took effect; the caller closes its level.
    Unloaded,
}

enum StageOutput {
    Terrain(Result<LevelData, AssetError>),
    NavMesh(NavMesh),
    Models(Result<BTreeMap<String, ModelDesc>, AssetError>),
}

/// Staged level loading. Each stage runs on a worker thread and hands its
/// result back through a oneshot channel that [`LevelLoader::poll`] checks.
pub struct LevelLoader {
    assets: Arc<dyn AssetSource>,
    stage: LoadStage,
    level: Option<String>,
    preload: Vec<String>,
    pending: Option<oneshot::Receiver<StageOutput>>,
    data: Option<LevelData>,
    navmesh: Option<NavMesh>,
    unload_requested: bool,
}

impl LevelLoader {
    pub fn new(assets: Arc<dyn AssetSource>) -> Self {
        Self {
            assets,
            stage: LoadStage::Idle,
            level: None,
            preload: Vec::new(),
            pending: None,
            data: None,
            navmesh: None,
            unload_requested: false,
        }
    }

    pub fn with_preload(mut self, models: &[&str]) -> Self {
        self.preload = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.stage == LoadStage::Ready
    }

    pub fn start(&mut self, level: &str) -> Result<(), LoadError> {
        if self.stage.is_loading() {
            let current = self.level.clone().unwrap_or_default();
            return Err(LoadError::Busy(current));
        }

        log::info!("Loading level '{}'", level);
        self.level = Some(level.to_string());
        self.data = None;
        self.navmesh = None;
        self.unload_requested = false;

        let assets = Arc::clone(&self.assets);
        let id = level.to_string();
        self.spawn_stage(LoadStage::LoadingTerrain, move || {
            StageOutput::Terrain(assets.load_level(&id))
        });
        Ok(())
    }

    /// Returns `true` when the unload happened now, `false` when it was
    /// deferred until the running load completes.
    pub fn request_unload(&mut self) -> bool {
        if self.stage.is_loading() {
            log::info!("Deferring level unload until loading completes");
            self.unload_requested = true;
            return false;
        }
        self.reset();
        true
    }

    pub fn attached(&mut self) {
        if self.stage == LoadStage::Attaching {
            self.stage = LoadStage::Ready;
            log::info!("Level '{}' ready", self.level.as_deref().unwrap_or(""));
        }
    }

    pub fn poll(&mut self) -> Option<LoaderEvent> {
        let rx = self.pending.as_mut()?;
        let output = match rx.try_recv() {
            Ok(output) => output,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => {
                let stage = self.stage;
                return Some(self.fail(LoadError::WorkerLost(stage)));
            }
        };
        self.pending = None;

        match output {
            StageOutput::Terrain(Err(e)) | StageOutput::Models(Err(e)) => Some(self.fail(e.into())),
            StageOutput::Terrain(Ok(data)) => {
                let for_navmesh = data.clone();
                self.data = Some(data);
                self.spawn_stage(LoadStage::BuildingNavMesh, move || {
                    StageOutput::NavMesh(NavMesh::build(&for_navmesh))
                });
                Some(LoaderEvent::StageChanged(self.stage))
            }
            StageOutput::NavMesh(navmesh) => {
                log::debug!("Nav mesh built with {} regions", navmesh.region_count());
                self.navmesh = Some(navmesh);

                let mut ids: Vec<String> = self.preload.clone();
                if let Some(data) = &self.data {
                    ids.extend(data.props.iter().map(|p| p.model.clone()));
                }
                ids.sort();
                ids.dedup();

                let assets = Arc::clone(&self.assets);
                self.spawn_stage(LoadStage::LoadingModels, move || {
                    let models = ids
                        .into_iter()
                        .map(|id| assets.load_model(&id).map(|desc| (id, desc)))
                        .collect();
                    StageOutput::Models(models)
                });
                Some(LoaderEvent::StageChanged(self.stage))
            }
            StageOutput::Models(Ok(models)) => {
                if self.unload_requested {
                    self.reset();
                    return Some(LoaderEvent::Unloaded);
                }

                self.stage = LoadStage::Attaching;
                Some(LoaderEvent::Attach(LoadedLevel {
                    name: self.level.clone().unwrap_or_default(),
                    data: self.data.take().unwrap_or_default(),
                    navmesh: self.navmesh.take().unwrap_or_default(),
                    models,
                }))
            }
        }
    }

    fn spawn_stage<F>(&mut self, stage: LoadStage, work: F)
    where
        F: FnOnce() -> StageOutput + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        thread::spawn(move || {
            // The loader may have been dropped; nothing to report to then.
            let _ = tx.send(work());
        });
        self.pending = Some(rx);
        self.stage = stage;
    }

    fn fail(&mut self, error: LoadError) -> LoaderEvent {
        log::error!(
            "Loading level '{}' failed: {}",
            self.level.as_deref().unwrap_or(""),
            error
        );
        self.pending = None;
        self.data = None;
        self.navmesh = None;
        self.stage = LoadStage::Failed;
        if self.unload_requested {
            self.reset();
            return LoaderEvent::Unloaded;
        }
        LoaderEvent::Failed(error)
    }

    fn reset(&mut self) {
        self.pending = None;
        self.data = None;
        self.navmesh = None;
        self.level = None;
        self.unload_requested = false;
        self.stage = LoadStage::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::assets::AssetCatalog;

    fn drive(loader: &mut LevelLoader) -> Vec<LoaderEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            match loader.poll() {
                Some(event) => {
                    let done = !matches!(event, LoaderEvent::StageChanged(_));
                    events.push(event);
                    if done {
                        break;
                    }
                }
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        events
    }

    #[test]
    fn loads_through_all_stages() {
        let mut loader = LevelLoader::new(Arc::new(AssetCatalog::builtin()))
            .with_preload(&["soldier.model"]);
        loader.start("arena").unwrap();
        assert_eq!(loader.stage(), LoadStage::LoadingTerrain);

        let events = drive(&mut loader);
        let stages: Vec<LoadStage> = events
            .iter()
            .filter_map(|e| match e {
                LoaderEvent::StageChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![LoadStage::BuildingNavMesh, LoadStage::LoadingModels]
        );

        let Some(LoaderEvent::Attach(level)) = events.last() else {
            panic!("expected attach, got {events:?}");
        };
        assert_eq!(level.name, "arena");
        assert!(level.models.contains_key("soldier.model"));
        assert!(level.models.contains_key("buggy.model"));
        assert!(!level.navmesh.is_empty());

        assert_eq!(loader.stage(), LoadStage::Attaching);
        loader.attached();
        assert!(loader.is_ready());
    }

    #[test]
    fn missing_level_fails_without_later_stages() {
        let mut loader = LevelLoader::new(Arc::new(AssetCatalog::builtin()));
        loader.start("nowhere").unwrap();

        let events = drive(&mut loader);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            LoaderEvent::Failed(LoadError::Asset(AssetError::UnknownLevel(_)))
        ));
        assert_eq!(loader.stage(), LoadStage::Failed);
    }

    #[test]
    fn unload_during_load_is_deferred() {
        let mut loader = LevelLoader::new(Arc::new(AssetCatalog::builtin()));
        loader.start("arena").unwrap();

        assert!(!loader.request_unload());
        assert!(matches!(loader.start("arena"), Err(LoadError::Busy(_))));

        let events = drive(&mut loader);
        assert!(matches!(events.last(), Some(LoaderEvent::Unloaded)));
        assert_eq!(loader.stage(), LoadStage::Idle);
        assert!(loader.request_unload());
    }
}
