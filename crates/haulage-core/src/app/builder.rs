//! DepotBuilder - デポの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast 設計）
//! - 設定を `validate()` してから組み立てる
//! - 外部サービス（セッション・資格）が未設定なら BuildError
//! - ストアにスナップショットがあれば復元、なければ新しい掲示板で起動
//!
//! # 使用例
//! ```ignore
//! let app = DepotBuilder::new(config)
//!     .sessions(sessions)
//!     .requirements(requirements)
//!     .build()
//!     .await?;
//! let loops = app.start_loops();
//! ```

use std::sync::Arc;

use thiserror::Error;

use super::admin::Admin;
use super::handle::LoopGroup;
use super::publisher_loop::PublisherLoop;
use super::sweep_loop::SweepLoop;
use crate::config::{ConfigError, HaulageConfig};
use crate::depot::{Collaborators, Depot};
use crate::domain::catalog::Catalog;
use crate::domain::errors::HaulError;
use crate::impls::{JsonFileStore, RegionPopulation, TracingSink};
use crate::ports::{
    Clock, IdGenerator, NotificationSink, PopulationSignal, ReconciledClock, ReputationAdjuster,
    RequirementChecker, SessionProvider, StateStore, StoreError, UlidGenerator,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot read saved state: {0}")]
    Store(#[from] StoreError),

    #[error("saved state is inconsistent: {0}")]
    Restore(HaulError),
}

pub struct DepotBuilder {
    config: HaulageConfig,
    catalog: Catalog,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sessions: Option<Arc<dyn SessionProvider>>,
    requirements: Option<Arc<dyn RequirementChecker>>,
    population: Option<Arc<dyn PopulationSignal>>,
    store: Option<Arc<dyn StateStore>>,
    reputation: Option<Arc<dyn ReputationAdjuster>>,
    notifications: Option<Arc<dyn NotificationSink>>,
}

impl DepotBuilder {
    pub fn new(config: HaulageConfig) -> Self {
        Self {
            config,
            catalog: Catalog::standard(),
            clock: None,
            ids: None,
            sessions: None,
            requirements: None,
            population: None,
            store: None,
            reputation: None,
            notifications: None,
        }
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Defaults to a [`ReconciledClock`] seeded from the saved snapshot.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn requirements(mut self, requirements: Arc<dyn RequirementChecker>) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn population(mut self, population: Arc<dyn PopulationSignal>) -> Self {
        self.population = Some(population);
        self
    }

    /// Defaults to a JSON file when `persistence.state_file` is set.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reputation(mut self, reputation: Arc<dyn ReputationAdjuster>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;
        let sessions = self
            .sessions
            .ok_or(BuildError::MissingCollaborator("sessions"))?;
        let requirements = self
            .requirements
            .ok_or(BuildError::MissingCollaborator("requirements"))?;

        let store = self.store.or_else(|| {
            self.config
                .persistence
                .state_file
                .as_ref()
                .map(|path| Arc::new(JsonFileStore::new(path.clone())) as Arc<dyn StateStore>)
        });
        let saved = match &store {
            Some(store) => store.load().await?,
            None => None,
        };

        let clock = self.clock.unwrap_or_else(|| {
            Arc::new(ReconciledClock::new(
                saved.as_ref().map(|s| s.clock_reference),
            ))
        });
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let collab = Collaborators {
            clock,
            ids,
            sessions,
            requirements,
            population: self
                .population
                .unwrap_or_else(|| Arc::new(RegionPopulation::new())),
            store,
        };

        let depot = match saved {
            Some(snapshot) => Depot::restore(self.config, self.catalog, collab, snapshot)
                .map_err(BuildError::Restore)?,
            None => Depot::new(self.config, self.catalog, collab),
        };
        let depot = Arc::new(depot);

        Ok(App {
            admin: Admin::new(depot.clone()),
            depot,
            reputation: self.reputation.unwrap_or_else(|| Arc::new(TracingSink)),
            notifications: self.notifications.unwrap_or_else(|| Arc::new(TracingSink)),
        })
    }
}

/// A wired depot plus what its background loops need.
pub struct App {
    pub depot: Arc<Depot>,
    pub admin: Admin,
    reputation: Arc<dyn ReputationAdjuster>,
    notifications: Arc<dyn NotificationSink>,
}

impl App {
    pub fn sweep_loop(&self) -> SweepLoop {
        SweepLoop::from_config(self.depot.clone())
    }

    pub fn publisher_loop(&self) -> PublisherLoop {
        PublisherLoop::new(
            self.depot.clone(),
            self.reputation.clone(),
            self.notifications.clone(),
        )
    }

    /// Spawn the sweep and publisher loops.
    pub fn start_loops(&self) -> LoopGroup {
        let mut group = LoopGroup::new();
        let sweep = self.sweep_loop();
        group.spawn(move |rx| sweep.run(rx));
        let publisher = self.publisher_loop();
        group.spawn(move |rx| publisher.run(rx));
        group
    }
}
