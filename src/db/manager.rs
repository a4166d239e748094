//! Named driver registry.
//!
//! The manager owns every configured driver. Lookups and liveness checks are
//! shared-reader operations; the registry map itself only changes at
//! construction, on `close`, and through driver-internal pool swaps during
//! reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::model::{DatabaseDescriptor, EngineKind};
use crate::db::sqlite::SqliteDriver;
use crate::db::sqlserver::SqlServerDriver;
use crate::db::Driver;
use crate::errors::{GatewayError, Result};

pub struct DbManager {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DbManager {
    /// Builds a driver per descriptor, sequentially. If any connect fails,
    /// every previously-built driver is closed before the error returns.
    pub async fn connect(descriptors: &[DatabaseDescriptor]) -> Result<Self> {
        let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();

        for descriptor in descriptors {
            let built: Result<Arc<dyn Driver>> = match descriptor.kind {
                EngineKind::Sqlite => SqliteDriver::connect(descriptor.clone())
                    .await
                    .map(|d| Arc::new(d) as Arc<dyn Driver>),
                EngineKind::Sqlserver => SqlServerDriver::connect(descriptor.clone())
                    .await
                    .map(|d| Arc::new(d) as Arc<dyn Driver>),
            };

            match built {
                Ok(driver) => {
                    info!(database = %descriptor.name, kind = descriptor.kind.as_str(), "database connected");
                    drivers.insert(descriptor.name.clone(), driver);
                }
                Err(e) => {
                    for (name, driver) in drivers {
                        if let Err(close_err) = driver.close().await {
                            warn!(database = %name, "close during rollback failed: {close_err}");
                        }
                    }
                    return Err(GatewayError::DriverConnect(format!(
                        "database '{}': {e}",
                        descriptor.name
                    )));
                }
            }
        }

        Ok(Self {
            drivers: RwLock::new(drivers),
        })
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn read_only(&self, name: &str) -> Option<bool> {
        self.drivers
            .read()
            .await
            .get(name)
            .map(|d| d.read_only())
    }

    /// Pings every driver concurrently. The result maps each name to `None`
    /// when healthy or the failure message otherwise.
    pub async fn ping(&self) -> HashMap<String, Option<String>> {
        let drivers: Vec<(String, Arc<dyn Driver>)> = self
            .drivers
            .read()
            .await
            .iter()
            .map(|(name, driver)| (name.clone(), Arc::clone(driver)))
            .collect();

        let checks = drivers.into_iter().map(|(name, driver)| async move {
            let failure = driver.ping().await.err().map(|e| e.to_string());
            (name, failure)
        });

        join_all(checks).await.into_iter().collect()
    }

    pub async fn ping_all(&self) -> bool {
        self.ping().await.values().all(Option::is_none)
    }

    /// Delegates to the driver's own reconnect, which swaps its pool only
    /// after the replacement is live.
    pub async fn reconnect(&self, name: &str) -> Result<()> {
        let driver = self.get(name).await.ok_or_else(|| {
            GatewayError::DriverReconnect(format!("unknown database '{name}'"))
        })?;
        driver.reconnect().await
    }

    pub async fn reconnect_all(&self) -> Result<()> {
        let mut first_error = None;
        for name in self.names().await {
            if let Err(e) = self.reconnect(&name).await {
                warn!(database = %name, "reconnect failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes every driver and empties the registry. Every driver is
    /// attempted; the first error is returned.
    pub async fn close(&self) -> Result<()> {
        let mut drivers = self.drivers.write().await;
        let mut first_error = None;

        for (name, driver) in drivers.drain() {
            if let Err(e) = driver.close().await {
                warn!(database = %name, "close failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
