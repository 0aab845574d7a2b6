use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::w1;

/// Latest temperature per 1-Wire device id.
#[derive(Clone)]
pub struct Monitor {
    dir: Arc<PathBuf>,
    values: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl Monitor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Arc::new(dir.into()),
            values: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Reads every device once. A device that fails keeps its previous
    /// value.
    pub async fn update(&self) {
        let ids = match w1::list_sensors(&self.dir).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!("{err}");
                return;
            }
        };

        for id in ids {
            match w1::read_temperature(&self.dir, &id).await {
                Ok(celsius) => {
                    debug!(sensor = %id, celsius, "sampled");
                    self.values.lock().await.insert(id, celsius);
                }
                Err(err) => warn!(sensor = %id, "{err}"),
            }
        }
    }

    pub async fn value(&self, id: &str) -> Option<f64> {
        self.values.lock().await.get(id).copied()
    }
}
