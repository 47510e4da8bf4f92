use crate::cache::CacheService;
use crate::models::Bus;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

// Version keys outlive any in-flight read by a wide margin
const VERSION_TTL_SECONDS: i64 = 86_400;

// Store the bus only if no writer bumped the version since the reader looked
const STORE_IF_CURRENT: &str = r#"
    local current = redis.call('GET', KEYS[2]) or '0'
    if current ~= ARGV[1] then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
"#;

fn bus_key(id: Uuid) -> String {
    format!("bus:{}", id)
}

fn version_key(id: Uuid) -> String {
    format!("bus:{}:version", id)
}

impl CacheService {
    /// Read-through lookup: Redis first, Postgres on a miss or when Redis is down.
    pub async fn get_bus(&self, id: Uuid) -> Result<Option<Bus>, sqlx::Error> {
        if let Ok(Some(bus)) = self.get_bus_from_cache(id).await {
            debug!("bus {} served from cache", id);
            return Ok(Some(bus));
        }

        // Taken before the row is read so a write landing in between is detected
        let seen = self.cache_version(id).await;

        let bus = Bus::find_by_id(&self.db.pool, id).await?;
        if let (Some(bus), Some(seen)) = (&bus, seen) {
            let _ = self.store_bus_if_current(bus, &seen).await;
        }
        Ok(bus)
    }

    /// Current write version of a bus entry, `None` when Redis is unreachable.
    pub async fn cache_version(&self, id: Uuid) -> Option<String> {
        let mut conn = self.redis.conn.clone();
        let version: Result<Option<String>, _> = conn.get(version_key(id)).await;
        match version {
            Ok(version) => Some(version.unwrap_or_else(|| "0".to_string())),
            Err(e) => {
                warn!("failed to read cache version for bus {}: {:?}", id, e);
                None
            }
        }
    }

    /// Caches `bus` unless it was invalidated after `seen` was read. Returns whether it was stored.
    pub async fn store_bus_if_current(
        &self,
        bus: &Bus,
        seen: &str,
    ) -> Result<bool, redis::RedisError> {
        let data = serde_json::to_string(bus).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        let stored: i32 = redis::Script::new(STORE_IF_CURRENT)
            .key(bus_key(bus.id))
            .key(version_key(bus.id))
            .arg(seen)
            .arg(data)
            .arg(self.bus_ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .inspect_err(|e| warn!("failed to cache bus {}: {:?}", bus.id, e))?;

        if stored == 0 {
            debug!("bus {} changed while loading, not cached", bus.id);
        }
        Ok(stored == 1)
    }

    // Drop the cached copy after any write to the bus row
    pub async fn invalidate_bus(&self, id: Uuid) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = redis::pipe()
            .atomic()
            .incr(version_key(id), 1)
            .ignore()
            .expire(version_key(id), VERSION_TTL_SECONDS)
            .ignore()
            .del(bus_key(id))
            .ignore()
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => debug!("Invalidated cache for bus {}", id),
            Err(e) => warn!("failed to invalidate bus {}: {:?}", id, e),
        }
    }

    pub async fn get_bus_from_cache(&self, id: Uuid) -> Result<Option<Bus>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(bus_key(id)).await?;
        match data {
            Some(data) => {
                let bus = serde_json::from_str(&data).map_err(|_| {
                    redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
                })?;
                Ok(Some(bus))
            }
            None => Ok(None),
        }
    }
}
