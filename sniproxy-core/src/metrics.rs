//! Prometheus gauges for the handful of values an operator actually wants
//! to watch on this stack: QPACK dynamic table size, blocked-stream count,
//! and the number of QUIC sessions currently open.

use prometheus::{Gauge, Registry};

/// Registered against a `prometheus::Registry` (typically the one
/// `sniproxy-bin`'s metrics HTTP endpoint serves) and updated by whatever
/// owns the `Encoder`/session registry being observed.
pub struct SessionMetrics {
    dynamic_table_size: Gauge,
    blocked_streams: Gauge,
    active_sessions: Gauge,
}

impl SessionMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let dynamic_table_size = Gauge::new(
            "qpack_dynamic_table_size_bytes",
            "Current QPACK dynamic table size in bytes",
        )?;
        let blocked_streams = Gauge::new(
            "qpack_blocked_streams",
            "Streams currently blocked on unacknowledged QPACK insertions",
        )?;
        let active_sessions = Gauge::new("quic_active_sessions", "QUIC sessions currently open")?;

        registry.register(Box::new(dynamic_table_size.clone()))?;
        registry.register(Box::new(blocked_streams.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self { dynamic_table_size, blocked_streams, active_sessions })
    }

    pub fn set_dynamic_table_size(&self, bytes: usize) {
        self.dynamic_table_size.set(bytes as f64);
    }

    pub fn set_blocked_streams(&self, count: u16) {
        self.blocked_streams.set(count as f64);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_register_and_report_set_values() {
        let registry = Registry::new();
        let metrics = SessionMetrics::new(&registry).unwrap();
        metrics.set_dynamic_table_size(2048);
        metrics.set_blocked_streams(1);
        metrics.set_active_sessions(3);

        let families = registry.gather();
        assert_eq!(families.len(), 3);
    }
}
