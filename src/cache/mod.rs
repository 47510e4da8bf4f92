use crate::{database::Database, models::Bus, redis_client::RedisClient, services::local_now};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

pub mod buses;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
    bus_ttl_seconds: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database, bus_ttl_seconds: u64) -> Self {
        Self { redis, db, bus_ttl_seconds }
    }

    // Warm the cache with every bus that still has a journey ahead
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        let today = local_now().date();
        let ids: Vec<Uuid> = match Bus::list_upcoming(&self.db.pool, today).await {
            Ok(buses) => buses.into_iter().map(|bus| bus.id).collect(),
            Err(e) => {
                warn!("Cache warmup skipped: {:?}", e);
                return;
            }
        };

        // Versions first, rows second, same as a read-through miss
        let mut seen = HashMap::with_capacity(ids.len());
        for id in &ids {
            if let Some(version) = self.cache_version(*id).await {
                seen.insert(*id, version);
            }
        }

        match Bus::find_by_ids(&self.db.pool, &ids).await {
            Ok(buses) => {
                let mut stored = 0;
                for bus in &buses {
                    if let Some(version) = seen.get(&bus.id) {
                        if let Ok(true) = self.store_bus_if_current(bus, version).await {
                            stored += 1;
                        }
                    }
                }
                info!("Cached {} of {} upcoming buses", stored, buses.len());
            }
            Err(e) => warn!("Cache warmup skipped: {:?}", e),
        }

        info!("Cache warmup done");
    }
}
