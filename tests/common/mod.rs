//! Shared wiring for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bson::oid::ObjectId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mies::acting::{Coordinator, EnergyConfig, LifecycleConfig, RandomActionChooser, Stores};
use mies::cache::{BuildingMirror, CacheBackend, CacheConfig, ContentCache};
use mies::db::schemas::{BuildingDoc, ResidentDoc};
use mies::dispatch::MockDispatcher;
use mies::life::{FloorNavigator, LifeCycle};
use mies::smell::SmellPropagator;
use mies::stats::MemoryFloorStats;
use mies::store::{
    BuildingStore, MemoryBuildingStore, MemoryResidentStore, ResidentStore, ResidentUpdate,
};
use mies::{MiesError, Result};

/// Cache backend that refuses every call
pub struct BrokenCache;

#[async_trait]
impl CacheBackend for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(MiesError::Cache("cache unavailable".into()))
    }

    async fn set(&self, _key: &str, _data: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(MiesError::Cache("cache unavailable".into()))
    }
}

/// Records every smell notification
#[derive(Default)]
pub struct RecordingSmell {
    pub events: std::sync::Mutex<Vec<(String, f64)>>,
}

#[async_trait]
impl SmellPropagator for RecordingSmell {
    async fn propagate(&self, address: &str, energy: f64) {
        self.events
            .lock()
            .unwrap()
            .push((address.to_string(), energy));
    }
}

/// Resident store that can be told to fail the next energy credit
pub struct FlakyResidents {
    inner: Arc<MemoryResidentStore>,
    fail_next_credit: AtomicBool,
}

impl FlakyResidents {
    pub fn new(inner: Arc<MemoryResidentStore>) -> Self {
        Self {
            inner,
            fail_next_credit: AtomicBool::new(false),
        }
    }

    pub fn fail_next_credit(&self) {
        self.fail_next_credit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResidentStore for FlakyResidents {
    async fn get(&self, id: &ObjectId) -> Result<Option<ResidentDoc>> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &ObjectId, update: ResidentUpdate) -> Result<bool> {
        if update.energy_delta.is_some() && self.fail_next_credit.swap(false, Ordering::SeqCst) {
            return Err(MiesError::Database("connection reset".into()));
        }
        self.inner.update(id, update).await
    }

    async fn insert(&self, resident: ResidentDoc) -> Result<ObjectId> {
        self.inner.insert(resident).await
    }

    async fn list(&self) -> Result<Vec<ResidentDoc>> {
        self.inner.list().await
    }
}

pub struct World {
    pub buildings: Arc<MemoryBuildingStore>,
    pub residents: Arc<MemoryResidentStore>,
    /// What the coordinator writes residents through
    pub flaky_residents: Arc<FlakyResidents>,
    pub stats: Arc<MemoryFloorStats>,
    pub cache: Arc<ContentCache>,
    pub dispatcher: Arc<MockDispatcher>,
    pub smell: Arc<RecordingSmell>,
    pub coordinator: Arc<Coordinator>,
    pub life: LifeCycle,
}

impl World {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// World whose mirror backend fails every call
    pub fn with_broken_cache() -> Self {
        Self::build(Some(Arc::new(BrokenCache)))
    }

    fn build(backend: Option<Arc<dyn CacheBackend>>) -> Self {
        let buildings = Arc::new(MemoryBuildingStore::new());
        let residents = Arc::new(MemoryResidentStore::new());
        let flaky_residents = Arc::new(FlakyResidents::new(residents.clone()));
        let stats = Arc::new(MemoryFloorStats::new());
        let cache = Arc::new(ContentCache::with_defaults());
        let dispatcher = Arc::new(MockDispatcher::new());
        let smell = Arc::new(RecordingSmell::default());

        let backend: Arc<dyn CacheBackend> = match backend {
            Some(backend) => backend,
            None => cache.clone(),
        };
        let mirror = Arc::new(BuildingMirror::new(backend, &CacheConfig::default()));

        let coordinator = Arc::new(Coordinator::new(
            Stores {
                buildings: buildings.clone(),
                residents: flaky_residents.clone(),
                stats: stats.clone(),
                mirror,
            },
            dispatcher.clone(),
            smell.clone(),
            LifecycleConfig {
                poll_wait: Duration::from_millis(5),
                ..Default::default()
            },
            EnergyConfig::default(),
        ));

        let life = LifeCycle::new(
            coordinator.clone(),
            Arc::new(FloorNavigator::new(buildings.clone())),
            Arc::new(RandomActionChooser::default()),
        );

        Self {
            buildings,
            residents,
            flaky_residents,
            stats,
            cache,
            dispatcher,
            smell,
            coordinator,
            life,
        }
    }

    pub async fn add_resident(&self, floor: &str) -> ResidentDoc {
        let resident = ResidentDoc::new(floor);
        self.residents.insert(resident.clone()).await.unwrap();
        resident
    }

    pub async fn register(&self, building: BuildingDoc) -> BuildingDoc {
        self.coordinator.register_building(building).await.unwrap()
    }

    pub async fn building(&self, building: &BuildingDoc) -> BuildingDoc {
        self.buildings.get(&building.id).await.unwrap().unwrap()
    }

    pub async fn resident(&self, resident: &ResidentDoc) -> ResidentDoc {
        self.residents.get(&resident.id).await.unwrap().unwrap()
    }
}
