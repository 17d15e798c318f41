use std::ops::Deref;
use std::sync::Arc;

use abi::{Config, StorageBackend};
use sqlx_db_tester::TestDb;

#[derive(Clone)]
pub struct TestConfig {
    #[allow(dead_code)]
    tdb: Option<Arc<TestDb>>,
    pub config: Arc<Config>,
}

impl Deref for TestConfig {
    type Target = Config;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

impl TestConfig {
    pub fn new(filename: &str) -> Self {
        let config = Config::load(filename).unwrap();
        Self {
            tdb: None,
            config: Arc::new(config),
        }
    }

    /// Same fixture, backed by a fresh migrated database that is dropped with the config.
    #[allow(dead_code)]
    pub fn with_db(filename: &str) -> Self {
        let mut config = Config::load(filename).unwrap();
        let tdb = TestDb::new(
            &config.db.host,
            config.db.port,
            &config.db.user,
            &config.db.password,
            "../migrations",
        );
        config.db.dbname = tdb.dbname.clone();
        config.storage = StorageBackend::Postgres;
        Self {
            tdb: Some(Arc::new(tdb)),
            config: Arc::new(config),
        }
    }

    #[allow(dead_code)]
    pub fn with_server_port(port: u16) -> Self {
        let mut config = Config::load("fixtures/config.yml").unwrap();
        config.server.port = port;
        Self {
            tdb: None,
            config: Arc::new(config),
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new("fixtures/config.yml")
    }
}
