use std::io;
use std::sync::Arc;

use crate::availability::AvailabilityChecker;
use crate::catalog::SpaceCatalog;
use crate::config::Config;
use crate::engine::Engine;
use crate::notify::{FallbackMailer, HttpMailProvider, MailProvider, Mailer, SimulatedMailProvider};
use crate::reaper::{self, CashReaper};
use crate::stats::ClientStatsCache;
use crate::store::ReservationStore;

/// Wires the store, checker, stats cache, mailer and reaper together. One per process.
#[derive(Clone)]
pub struct AppRegistry {
    engine: Arc<Engine>,
    catalog: Arc<SpaceCatalog>,
    checker: Arc<AvailabilityChecker>,
    stats: Arc<ClientStatsCache>,
    mailer: Arc<dyn Mailer>,
    reaper: Arc<CashReaper>,
}

impl AppRegistry {
    /// Replay the journal and build every service. Must run inside a Tokio runtime.
    pub fn new(config: &Config) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let catalog = Arc::new(SpaceCatalog::new(
            config.coworking_capacity,
            config.office_capacity,
            config.domiciliation_capacity,
        ));
        let engine = Arc::new(Engine::new(config.wal_path(), catalog.clone())?);

        let mut providers: Vec<Arc<dyn MailProvider>> = Vec::new();
        if let Some(p) = &config.mail_primary {
            providers.push(Arc::new(HttpMailProvider::new("primary", &p.url, &p.api_key)));
        }
        if let Some(p) = &config.mail_secondary {
            providers.push(Arc::new(HttpMailProvider::new("secondary", &p.url, &p.api_key)));
        }
        providers.push(Arc::new(SimulatedMailProvider::default()));
        let mailer: Arc<dyn Mailer> = Arc::new(FallbackMailer::new(&config.mail_from, providers));

        Ok(Self::from_parts(engine, catalog, mailer))
    }

    pub fn from_parts(
        engine: Arc<Engine>,
        catalog: Arc<SpaceCatalog>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let store: Arc<dyn ReservationStore> = engine.clone();
        let checker = Arc::new(AvailabilityChecker::new(store.clone(), catalog.clone()));
        let stats = Arc::new(ClientStatsCache::new(store.clone()));
        let reaper = Arc::new(CashReaper::new(store, stats.clone(), mailer.clone()));
        Self {
            engine,
            catalog,
            checker,
            stats,
            mailer,
            reaper,
        }
    }

    /// Start the lifecycle, reaper and compaction loops.
    pub fn spawn_background(&self, config: &Config) {
        tokio::spawn(reaper::run_lifecycle(
            self.store(),
            config.lifecycle_interval,
        ));
        tokio::spawn(reaper::run_reaper(self.reaper.clone(), config.reaper_interval));
        tokio::spawn(reaper::run_compactor(
            self.engine.clone(),
            config.compact_threshold,
        ));
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    pub fn store(&self) -> Arc<dyn ReservationStore> {
        self.engine.clone()
    }

    pub fn catalog(&self) -> Arc<SpaceCatalog> {
        self.catalog.clone()
    }

    pub fn checker(&self) -> Arc<AvailabilityChecker> {
        self.checker.clone()
    }

    pub fn stats(&self) -> Arc<ClientStatsCache> {
        self.stats.clone()
    }

    pub fn mailer(&self) -> Arc<dyn Mailer> {
        self.mailer.clone()
    }

    pub fn reaper(&self) -> Arc<CashReaper> {
        self.reaper.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::SpaceType;

    #[tokio::test]
    async fn registry_shares_one_store() {
        let dir = std::env::temp_dir().join("reservd_test_registry");
        let _ = std::fs::remove_dir_all(&dir);
        let config = Config {
            data_dir: dir,
            office_capacity: 2,
            ..Config::default()
        };
        let registry = AppRegistry::new(&config).unwrap();
        assert_eq!(registry.catalog().max_concurrent(SpaceType::PrivateOffice), 2);

        registry
            .store()
            .insert(new_reservation(SpaceType::PrivateOffice, "2024-04-01", "2024-04-03"))
            .await
            .unwrap();
        let result = registry
            .checker()
            .check_availability("bureau-prive", day("2024-04-02"), day("2024-04-04"))
            .await;
        assert!(result.is_available);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(registry.engine().reservation_count(), 1);
    }
}
