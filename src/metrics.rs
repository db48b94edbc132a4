use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder, opts};

/// Prometheus metrics registry and collectors for the Keymaster daemon
pub struct KdcMetrics {
    registry: Registry,

    // DNS plane
    queries_total: IntCounterVec,
    notify_received: IntCounter,
    malformed_packets: IntCounter,

    // Distribution engine
    distributions_started: IntCounter,
    distributions_completed: IntCounter,
    confirmations_observed: IntCounter,
    notify_sent: IntCounter,
    notify_failed: IntCounter,
    pending_distributions: IntGauge,
}

impl KdcMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = IntCounterVec::new(
            opts!("keymaster_queries_total", "DNS queries by KDC record type"),
            &["qtype"],
        )?;
        let notify_received = IntCounter::with_opts(opts!(
            "keymaster_notify_received_total",
            "Inbound NOTIFY messages"
        ))?;
        let malformed_packets = IntCounter::with_opts(opts!(
            "keymaster_malformed_packets_total",
            "DNS packets that failed to parse"
        ))?;
        let distributions_started = IntCounter::with_opts(opts!(
            "keymaster_distributions_started_total",
            "Key distributions started"
        ))?;
        let distributions_completed = IntCounter::with_opts(opts!(
            "keymaster_distributions_completed_total",
            "Key distributions that reached quorum"
        ))?;
        let confirmations_observed = IntCounter::with_opts(opts!(
            "keymaster_confirmations_observed_total",
            "Distribution confirmations recorded"
        ))?;
        let notify_sent = IntCounter::with_opts(opts!(
            "keymaster_notify_sent_total",
            "Outbound NOTIFY messages sent"
        ))?;
        let notify_failed = IntCounter::with_opts(opts!(
            "keymaster_notify_failed_total",
            "Outbound NOTIFY messages that failed"
        ))?;
        let pending_distributions = IntGauge::with_opts(opts!(
            "keymaster_pending_distributions",
            "Distribution records awaiting confirmation"
        ))?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(notify_received.clone()))?;
        registry.register(Box::new(malformed_packets.clone()))?;
        registry.register(Box::new(distributions_started.clone()))?;
        registry.register(Box::new(distributions_completed.clone()))?;
        registry.register(Box::new(confirmations_observed.clone()))?;
        registry.register(Box::new(notify_sent.clone()))?;
        registry.register(Box::new(notify_failed.clone()))?;
        registry.register(Box::new(pending_distributions.clone()))?;

        Ok(KdcMetrics {
            registry,
            queries_total,
            notify_received,
            malformed_packets,
            distributions_started,
            distributions_completed,
            confirmations_observed,
            notify_sent,
            notify_failed,
            pending_distributions,
        })
    }

    pub fn record_query(&self, qtype: &str) {
        self.queries_total.with_label_values(&[qtype]).inc();
    }

    pub fn record_notify_received(&self) {
        self.notify_received.inc();
    }

    pub fn record_malformed(&self) {
        self.malformed_packets.inc();
    }

    pub fn record_distribution_started(&self, targets: usize) {
        self.distributions_started.inc();
        self.pending_distributions.add(targets as i64);
    }

    pub fn record_distribution_completed(&self, targets: usize) {
        self.distributions_completed.inc();
        self.pending_distributions.sub(targets as i64);
    }

    pub fn record_confirmation(&self) {
        self.confirmations_observed.inc();
    }

    pub fn record_notify_sent(&self) {
        self.notify_sent.inc();
    }

    pub fn record_notify_failed(&self) {
        self.notify_failed.inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
