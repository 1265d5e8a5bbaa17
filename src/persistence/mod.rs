use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::types::SignalRow;

/// On-disk envelope for one pending signal. The names are duplicated out
/// of the row so a restore can reject state written by a different
/// configuration without trusting the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSignal {
    strategy_name: String,
    exchange_name: String,
    signal: SignalRow,
}

/// Live-mode crash recovery store: one small JSON file per
/// (strategy, symbol), replaced atomically via temp-file-then-rename so a
/// startup read never observes a partial write.
pub struct SignalStore {
    dir: PathBuf,
}

impl SignalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, strategy_name: &str, symbol: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", sanitize(strategy_name), sanitize(symbol)))
    }

    /// Write the pending signal for its (strategy, symbol) slot.
    pub async fn save(&self, row: &SignalRow) -> Result<(), EngineError> {
        let record = PersistedSignal {
            strategy_name: row.strategy_name.clone(),
            exchange_name: row.exchange_name.clone(),
            signal: row.clone(),
        };
        let payload = serde_json::to_vec_pretty(&record)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        let path = self.file_path(&row.strategy_name, &row.symbol);
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, &payload)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        debug!(path = %path.display(), signal_id = %row.id, "pending signal persisted");
        Ok(())
    }

    /// Read the slot back. Returns `None` when nothing was persisted, the
    /// record belongs to another configuration, or the file is unreadable
    /// (stale state is discarded, never trusted).
    pub async fn load(
        &self,
        strategy_name: &str,
        symbol: &str,
        exchange_name: &str,
    ) -> Result<Option<SignalRow>, EngineError> {
        let path = self.file_path(strategy_name, symbol);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::Persistence(e.to_string())),
        };

        let record: PersistedSignal = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable signal state");
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if record.strategy_name != strategy_name || record.exchange_name != exchange_name {
            debug!(
                path = %path.display(),
                stored_strategy = %record.strategy_name,
                stored_exchange = %record.exchange_name,
                "discarding signal state from another configuration"
            );
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(record.signal))
    }

    /// Drop the slot. Missing files are fine: close after restart may race
    /// a never-written slot.
    pub async fn delete(&self, strategy_name: &str, symbol: &str) -> Result<(), EngineError> {
        let path = self.file_path(strategy_name, symbol);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "pending signal state removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Persistence(e.to_string())),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;
    use rust_decimal_macros::dec;

    fn temp_store() -> SignalStore {
        SignalStore::new(std::env::temp_dir().join(format!("signal-store-{}", Uuid::new_v4())))
    }

    fn row() -> SignalRow {
        SignalRow {
            id: "sig-1".to_string(),
            symbol: "BTC/USDT".to_string(),
            strategy_name: "demo".to_string(),
            exchange_name: "replay".to_string(),
            side: TradeSide::Long,
            price_open: dec!(50000),
            price_take_profit: dec!(51000),
            price_stop_loss: dec!(49000),
            minute_estimated_time: 60,
            note: Some("persisted".to_string()),
            timestamp: 1_000_000,
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = temp_store();
        let row = row();
        store.save(&row).await.unwrap();

        let loaded = store
            .load("demo", "BTC/USDT", "replay")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, row);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = temp_store();
        assert!(store.load("demo", "BTCUSDT", "replay").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatched_names_are_discarded() {
        let store = temp_store();
        store.save(&row()).await.unwrap();

        assert!(store
            .load("demo", "BTC/USDT", "other-exchange")
            .await
            .unwrap()
            .is_none());
        // The stale record is gone for good.
        assert!(store
            .load("demo", "BTC/USDT", "replay")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_discarded() {
        let store = temp_store();
        fs::create_dir_all(store.dir()).await.unwrap();
        let path = store.file_path("demo", "BTC/USDT");
        fs::write(&path, b"{not json").await.unwrap();

        assert!(store.load("demo", "BTC/USDT", "replay").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = temp_store();
        store.save(&row()).await.unwrap();
        store.delete("demo", "BTC/USDT").await.unwrap();
        store.delete("demo", "BTC/USDT").await.unwrap();
        assert!(store.load("demo", "BTC/USDT", "replay").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_slot() {
        let store = temp_store();
        let first = row();
        store.save(&first).await.unwrap();

        let second = SignalRow {
            id: "sig-2".to_string(),
            price_open: dec!(52000),
            price_take_profit: dec!(53000),
            price_stop_loss: dec!(51000),
            ..first
        };
        store.save(&second).await.unwrap();

        let loaded = store
            .load("demo", "BTC/USDT", "replay")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, "sig-2");
    }
}
