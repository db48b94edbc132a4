//! Distribution engine: seals key material for every target node, tracks
//! per-node confirmations and advances the key state when every target
//! has confirmed.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto;
use crate::dns::{DNSHeader, DNSPacket, DNSQuestion, OPCODE_NOTIFY, wire::name_to_labels};
use crate::error::{KdcError, Result};
use crate::keys::{KeyState, KeyType, check_transition, distribution_id_for_tag, generate_key};
use crate::metrics::KdcMetrics;
use crate::records::chunk::split_chunks;
use crate::records::{KmChunk, KmManifest, RecordCodes};
use crate::storage::{DnssecKey, Storage};
use crate::topology;

/// Manifest plus ordered chunks for one (node, distribution), memoized
/// until the distribution is deleted.
#[derive(Clone, Debug)]
pub struct PreparedChunks {
    pub manifest: KmManifest,
    pub chunks: Vec<KmChunk>,
    pub checksum: String,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct DistributeOutcome {
    pub node_id: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct DistributeResult {
    pub dist_id: String,
    pub key_id: String,
    pub state: KeyState,
    pub outcomes: Vec<DistributeOutcome>,
}

#[derive(serde::Serialize)]
struct ZoneListDocument {
    content: &'static str,
    zones: Vec<String>,
}

pub struct DistributionEngine {
    storage: Storage,
    config: Arc<Config>,
    codes: RecordCodes,
    metrics: Arc<KdcMetrics>,
    chunk_cache: RwLock<HashMap<(String, String), Arc<PreparedChunks>>>,
}

impl DistributionEngine {
    pub fn new(storage: Storage, config: Arc<Config>, metrics: Arc<KdcMetrics>) -> Self {
        let codes = config.record_codes();
        DistributionEngine {
            storage,
            config,
            codes,
            metrics,
            chunk_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Seal the key for every node serving the zone, persist one pending
    /// record per node and advance the key state. Per-node failures are
    /// collected, never fatal; a state transition failure is.
    pub async fn distribute(&self, zone: &str, key_id: &str) -> Result<DistributeResult> {
        let zone_row = self.storage.get_zone(zone).await?;
        let mode = self.storage.zone_signing_mode(zone).await?;
        if !mode.allows_distribution() {
            return Err(KdcError::PreconditionFailed(format!(
                "zone {} signing mode {} does not take distributed keys",
                zone,
                mode.as_str()
            )));
        }

        let key = self.storage.get_key(zone, key_id).await?;
        let to_state = match key.key_type {
            KeyType::Zsk | KeyType::Csk => KeyState::Distributed,
            KeyType::Ksk => {
                if !mode.allows_ksk_distribution() {
                    return Err(KdcError::PreconditionFailed(format!(
                        "KSK distribution requires full edge signing, zone {} is {}",
                        zone,
                        mode.as_str()
                    )));
                }
                KeyState::ActiveDist
            }
        };
        check_transition(key.state, to_state)?;

        let targets = topology::nodes_serving_zone(&self.storage, zone).await?;
        let dist_id = distribution_id_for_tag(key.key_tag);

        let mut outcomes = Vec::with_capacity(targets.len());
        let mut packages = Vec::with_capacity(targets.len());
        for node_id in &targets {
            match self.seal_for_node(node_id, &key).await {
                Ok((container, ephemeral_key)) => {
                    packages.push((node_id.clone(), container, ephemeral_key));
                    outcomes.push(DistributeOutcome {
                        node_id: node_id.clone(),
                        ok: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("sealing key {} for node {} failed: {}", key.id, node_id, e);
                    outcomes.push(DistributeOutcome {
                        node_id: node_id.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.storage
            .insert_pending_distributions(zone, &key.id, &dist_id, &packages)
            .await?;
        if to_state.is_edge_live() {
            self.storage
                .advance_to_live_state(&key.id, zone, key.key_type, key.state, to_state)
                .await?;
        } else {
            self.storage.set_key_state(&key.id, to_state).await?;
        }
        self.metrics.record_distribution_started(packages.len());
        info!(
            "distribution {} for key {} of {} targets {} nodes",
            dist_id,
            key.id,
            zone,
            packages.len()
        );

        if !zone_row.active {
            debug!("zone {} is inactive, skipping NOTIFY", zone);
        } else {
            self.notify_nodes(&dist_id, &packages).await;
        }

        Ok(DistributeResult {
            dist_id,
            key_id: key.id,
            state: to_state,
            outcomes,
        })
    }

    async fn seal_for_node(
        &self,
        node_id: &str,
        key: &DnssecKey,
    ) -> Result<(Vec<u8>, [u8; 32])> {
        let node = self.storage.get_node(node_id).await?;
        let sealed = crypto::seal(&node.public_key, &key.private_key)?;
        Ok((sealed.container, sealed.ephemeral_key))
    }

    /// NOTIFY(KMCTRL) to each node's notify address. Sequential; failures
    /// are logged, never surfaced.
    async fn notify_nodes(&self, dist_id: &str, packages: &[(String, Vec<u8>, [u8; 32])]) {
        for (node_id, _, _) in packages {
            let node = match self.storage.get_node(node_id).await {
                Ok(node) => node,
                Err(e) => {
                    warn!("NOTIFY target {} vanished: {}", node_id, e);
                    continue;
                }
            };
            let Some(addr) = node.notify_addr.clone() else {
                debug!("node {} has no notify address", node_id);
                continue;
            };
            match self.send_notify(&addr).await {
                Ok(()) => {
                    self.metrics.record_notify_sent();
                    debug!("NOTIFY for distribution {} sent to {}", dist_id, addr);
                }
                Err(e) => {
                    self.metrics.record_notify_failed();
                    warn!("NOTIFY to {} failed: {}", addr, e);
                }
            }
        }
    }

    async fn send_notify(&self, addr: &str) -> Result<()> {
        let mut packet = DNSPacket {
            header: DNSHeader {
                id: rand::random::<u16>(),
                qr: false,
                opcode: OPCODE_NOTIFY,
                aa: true,
                ..Default::default()
            },
            ..Default::default()
        };
        packet.questions.push(DNSQuestion::with_raw_qtype(
            name_to_labels(&self.config.kdc.control_zone),
            self.codes.kmctrl,
        ));
        packet.update_counts();
        let bytes = packet
            .serialize()
            .map_err(|e| KdcError::NotifySend(e.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| KdcError::NotifySend(e.to_string()))?;
        socket
            .send_to(&bytes, addr)
            .await
            .map_err(|e| KdcError::NotifySend(format!("{}: {}", addr, e)))?;

        // Wait briefly for the acknowledgment; a silent peer is not fatal.
        let mut buf = [0u8; 512];
        match timeout(self.config.server.notify_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(KdcError::NotifySend(e.to_string())),
            Err(_) => Err(KdcError::Timeout),
        }
    }

    /// Distribute the first standby ZSK of each zone.
    pub async fn distribute_many(&self, zones: &[String]) -> Vec<(String, Result<DistributeResult>)> {
        let mut results = Vec::with_capacity(zones.len());
        for zone in zones {
            let result = self.distribute_standby_zsk(zone).await;
            results.push((zone.clone(), result));
        }
        results
    }

    pub async fn distribute_standby_zsk(&self, zone: &str) -> Result<DistributeResult> {
        let standby = self
            .storage
            .keys_in_state(zone, KeyType::Zsk, KeyState::Standby)
            .await?;
        let key = standby.first().ok_or_else(|| {
            KdcError::PreconditionFailed(format!("zone {} has no standby ZSK", zone))
        })?;
        self.distribute(zone, &key.id).await
    }

    /// Build (or reuse) the manifest and chunks a node fetches for a
    /// distribution. Idempotent and memoized; double fills produce
    /// identical content.
    pub async fn prepare_chunks(
        &self,
        node_id: &str,
        dist_id: &str,
    ) -> Result<Arc<PreparedChunks>> {
        let cache_key = (node_id.to_string(), dist_id.to_string());
        if let Some(prepared) = self.chunk_cache.read().get(&cache_key) {
            return Ok(prepared.clone());
        }

        // The distribution must exist for this node before we serve it.
        self.storage.get_distribution(dist_id, node_id).await?;

        let mut zones = topology::zones_served_by_node(&self.storage, node_id).await?;
        zones.sort();
        let zone_count = zones.len();
        let document = ZoneListDocument {
            content: "zonelist",
            zones,
        };
        let json = serde_json::to_vec(&document)?;
        let encoded = BASE64.encode(&json);
        let digest = Sha256::digest(encoded.as_bytes());
        let checksum = format!("sha256:{}", hex::encode(digest));

        let chunk_size = self.config.kdc.jsonchunk_max_size;
        let chunks = split_chunks(encoded.as_bytes(), chunk_size);

        let mut manifest = KmManifest {
            chunk_count: chunks.len() as u16,
            chunk_size: chunk_size as u32,
            checksum: checksum.clone(),
            options: Default::default(),
        };
        manifest
            .options
            .insert("content".to_string(), "zonelist".to_string());
        manifest
            .options
            .insert("distribution_id".to_string(), dist_id.to_string());
        manifest
            .options
            .insert("node_id".to_string(), node_id.to_string());
        manifest
            .options
            .insert("zone_count".to_string(), zone_count.to_string());

        let prepared = Arc::new(PreparedChunks {
            manifest,
            chunks,
            checksum,
        });

        let mut cache = self.chunk_cache.write();
        let entry = cache.entry(cache_key).or_insert_with(|| prepared.clone());
        Ok(entry.clone())
    }

    /// Record a node's confirmation, idempotently, and run the completion
    /// check for its distribution.
    pub async fn observe_confirmation(&self, dist_id: &str, node_id: &str) -> Result<()> {
        let records = self.storage.list_distributions(dist_id).await?;
        let record = records
            .first()
            .ok_or_else(|| KdcError::DistributionNotFound(dist_id.to_string()))?;
        let zone = record.zone.clone();
        let key_id = record.key_id.clone();

        let node = self.storage.get_node(node_id).await?;
        let inserted = self
            .storage
            .insert_confirmation(dist_id, &zone, &key_id, &node.id)
            .await?;
        if inserted {
            self.metrics.record_confirmation();
            info!(
                "confirmation from {} for distribution {} ({})",
                node.id, dist_id, zone
            );
        } else {
            debug!(
                "duplicate confirmation from {} for distribution {}",
                node.id, dist_id
            );
        }

        self.check_completion(dist_id, &key_id).await
    }

    /// When every target node of the distribution has confirmed, move the
    /// key to edge_signer, retire live siblings and mark the records
    /// completed, all in one transaction.
    pub async fn check_completion(&self, dist_id: &str, key_id: &str) -> Result<()> {
        let key = self.storage.get_key_by_id(key_id).await?;
        if !matches!(key.state, KeyState::Distributed | KeyState::ActiveDist) {
            return Ok(());
        }

        let targets = self.storage.distribution_targets(dist_id).await?;
        let confirmed = self.storage.confirmed_nodes(dist_id).await?;
        let outstanding: Vec<&String> =
            targets.iter().filter(|t| !confirmed.contains(t)).collect();
        if !outstanding.is_empty() {
            debug!(
                "distribution {} waiting on {} of {} nodes",
                dist_id,
                outstanding.len(),
                targets.len()
            );
            return Ok(());
        }

        self.storage
            .complete_distribution(dist_id, &key.id, &key.zone, key.key_type, key.state)
            .await?;
        self.metrics.record_distribution_completed(targets.len());
        info!(
            "distribution {} complete, key {} is now edge signer for {}",
            dist_id, key.id, key.zone
        );
        Ok(())
    }

    /// Completion check over every key still waiting on confirmations.
    /// Picks up zero-target distributions, whose quorum is trivially
    /// satisfied without a single confirmation arriving.
    pub async fn observation_pass(&self) -> Result<()> {
        for key in self.storage.list_all_keys().await? {
            if matches!(key.state, KeyState::Distributed | KeyState::ActiveDist) {
                let dist_id = distribution_id_for_tag(key.key_tag);
                if let Err(e) = self.check_completion(&dist_id, &key.id).await {
                    warn!("completion check for {} failed: {}", dist_id, e);
                }
            }
        }
        Ok(())
    }

    /// Timer-driven lifecycle pass: published keys go standby after the
    /// publish hold, retired keys go removed after the retire hold, live
    /// keys past the rotation interval are flagged, the standby pool is
    /// topped up, and outstanding distributions get a completion check.
    pub async fn lifecycle_sweep(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let publish_hold = self.config.kdc.publish_time.as_secs() as i64;
        let retire_hold = self.config.kdc.retire_time.as_secs() as i64;
        let rotation = self.config.kdc.key_rotation_interval.as_secs() as i64;

        for key in self.storage.list_all_keys().await? {
            match key.state {
                KeyState::Published => {
                    if let Some(published_at) = key.published_at {
                        if published_at + publish_hold <= now {
                            self.storage.set_key_state(&key.id, KeyState::Standby).await?;
                            info!("key {} published hold elapsed, now standby", key.id);
                        }
                    }
                }
                KeyState::Retired => {
                    if let Some(retired_at) = key.retired_at {
                        if retired_at + retire_hold <= now {
                            self.storage.set_key_state(&key.id, KeyState::Removed).await?;
                            info!("key {} retire hold elapsed, now removed", key.id);
                        }
                    }
                }
                KeyState::Active | KeyState::EdgeSigner => {
                    if let Some(activated_at) = key.activated_at {
                        if rotation > 0 && activated_at + rotation <= now {
                            warn!(
                                "key {} for {} exceeded the rotation interval, roll it",
                                key.id, key.zone
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        self.maintain_standby_pool().await?;
        self.observation_pass().await
    }

    /// Keep `standby_key_count` upcoming ZSKs per edge-signed zone. New
    /// keys are generated and published; the publish hold walks them to
    /// standby.
    async fn maintain_standby_pool(&self) -> Result<()> {
        let want = self.config.kdc.standby_key_count as usize;
        if want == 0 {
            return Ok(());
        }
        for zone in self.storage.list_zones().await? {
            if !zone.active {
                continue;
            }
            let mode = self.storage.zone_signing_mode(&zone.name).await?;
            if !mode.allows_distribution() {
                continue;
            }
            let mut upcoming = 0;
            for state in [KeyState::Created, KeyState::Published, KeyState::Standby] {
                upcoming += self
                    .storage
                    .keys_in_state(&zone.name, KeyType::Zsk, state)
                    .await?
                    .len();
            }
            while upcoming < want {
                let generated = match generate_key(
                    &zone.name,
                    KeyType::Zsk,
                    self.config.kdc.default_algorithm,
                ) {
                    Ok(generated) => generated,
                    Err(e) => {
                        warn!("standby key generation for {} failed: {}", zone.name, e);
                        break;
                    }
                };
                let key = self
                    .storage
                    .add_key(&zone.name, KeyType::Zsk, &generated)
                    .await?;
                self.storage.set_key_state(&key.id, KeyState::Published).await?;
                info!(
                    "generated standby ZSK {} (tag {}) for {}",
                    key.id, key.key_tag, zone.name
                );
                upcoming += 1;
            }
        }
        Ok(())
    }

    pub async fn purge_completed(&self) -> Result<usize> {
        let dist_ids = self.storage.purge_completed().await?;
        self.evict_chunks(&dist_ids);
        Ok(dist_ids.len())
    }

    pub async fn gc_completed(&self, older_than: i64) -> Result<usize> {
        let dist_ids = self.storage.gc_completed(older_than).await?;
        self.evict_chunks(&dist_ids);
        Ok(dist_ids.len())
    }

    fn evict_chunks(&self, dist_ids: &[String]) {
        if dist_ids.is_empty() {
            return;
        }
        let mut cache = self.chunk_cache.write();
        cache.retain(|(_, dist_id), _| !dist_ids.contains(dist_id));
    }
}
