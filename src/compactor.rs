use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("WAL compacted after crossing {threshold} appends");
        }
    }
}

/// Compact when the append count has reached `threshold`. Returns whether it
/// did.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    use crate::model::Stay;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2031, 3, d).unwrap()
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();

        engine.create_room(1, Decimal::new(9000, 2), 2).await.unwrap();
        let user = engine
            .register_user("churn", "churn@example.com", "pw")
            .await
            .unwrap();
        for _ in 0..5 {
            let r = engine
                .create_reservation(1, user.id, Stay::new(day(1), day(3)))
                .await
                .unwrap();
            engine.cancel_reservation(r.id, user.id).await.unwrap();
        }

        assert!(!compact_if_due(&engine, 1000).await);
        assert_eq!(engine.wal_appends_since_compact().await, 12);

        let before = std::fs::metadata(&path).unwrap().len();
        assert!(compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} >= {before}");
    }
}
