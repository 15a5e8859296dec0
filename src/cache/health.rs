//! Cache reachability tracking

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Reachability of the replicated cache as seen from this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheHealthStatus {
    /// Last operation succeeded
    Healthy = 0,
    /// Connection is being (re)established
    Reconnecting = 1,
    /// Last operation failed because the cache could not be reached
    Unavailable = 2,
}

impl CacheHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheHealthStatus::Healthy => "healthy",
            CacheHealthStatus::Reconnecting => "reconnecting",
            CacheHealthStatus::Unavailable => "unavailable",
        }
    }
}

impl From<u8> for CacheHealthStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => CacheHealthStatus::Healthy,
            1 => CacheHealthStatus::Reconnecting,
            _ => CacheHealthStatus::Unavailable,
        }
    }
}

pub struct CacheHealth {
    status: AtomicU8,
    last_success_ms: AtomicI64,
    last_failure_ms: AtomicI64,
    total_failures: AtomicU64,
    total_reconnections: AtomicU64,
}

impl CacheHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(CacheHealthStatus::Healthy as u8),
            last_success_ms: AtomicI64::new(0),
            last_failure_ms: AtomicI64::new(0),
            total_failures: AtomicU64::new(0),
            total_reconnections: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        self.status
            .store(CacheHealthStatus::Healthy as u8, Ordering::Release);
        self.last_success_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn record_failure(&self) {
        self.status
            .store(CacheHealthStatus::Unavailable as u8, Ordering::Release);
        self.last_failure_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
        self.total_failures.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(CacheHealthStatus::Reconnecting as u8, Ordering::Release);
        self.total_reconnections.fetch_add(1, Ordering::AcqRel);
    }

    pub fn status(&self) -> CacheHealthStatus {
        CacheHealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == CacheHealthStatus::Healthy
    }

    pub fn stats(&self) -> CacheHealthStats {
        CacheHealthStats {
            status: self.status(),
            last_success_ms: self.last_success_ms.load(Ordering::Acquire),
            last_failure_ms: self.last_failure_ms.load(Ordering::Acquire),
            total_failures: self.total_failures.load(Ordering::Acquire),
            total_reconnections: self.total_reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for CacheHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CacheHealthStats {
    pub status: CacheHealthStatus,
    pub last_success_ms: i64,
    pub last_failure_ms: i64,
    pub total_failures: u64,
    pub total_reconnections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_transitions() {
        let health = CacheHealth::new();
        assert!(health.is_healthy());

        health.record_failure();
        assert_eq!(health.status(), CacheHealthStatus::Unavailable);

        health.set_reconnecting();
        assert_eq!(health.status(), CacheHealthStatus::Reconnecting);

        health.record_success();
        assert!(health.is_healthy());

        let stats = health.stats();
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.total_reconnections, 1);
        assert!(stats.last_success_ms >= stats.last_failure_ms);
    }
}
