//! DNS query plane for the KDC record types. Ordinary record types are the
//! authoritative engine's business; anything that is not KMCTRL, KMREQ,
//! MANIFEST or CHUNK is answered NOTIMPL here.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::distribution::DistributionEngine;
use crate::dns::wire::labels_to_name;
use crate::dns::{
    DNSPacket, DNSResource, DNSResourceType, OPCODE_NOTIFY, OPCODE_QUERY, ResponseCode,
};
use crate::error::{KdcError, Result};
use crate::keys::{KeyState, KeyType};
use crate::metrics::KdcMetrics;
use crate::records::qname::{
    canonical_name, parse_chunk_qname, parse_kmreq_qname, parse_manifest_qname,
};
use crate::records::{KDC_RECORD_TTL, KdcRecordType, KmCtrl, KmPkg, RecordCodes};
use crate::crypto;
use crate::storage::Storage;

/// Maximum UDP response size before truncation kicks in.
const MAX_UDP_RESPONSE: usize = 1232;

/// How a confirming or requesting node is identified. The default matches
/// the source address against node notify addresses, falling back to the
/// distribution's recorded targets; a SIG(0)-based implementation can be
/// swapped in here.
#[async_trait]
pub trait NodeIdentifier: Send + Sync {
    async fn identify(
        &self,
        storage: &Storage,
        src: SocketAddr,
        dist_id: &str,
    ) -> Result<Option<String>>;
}

pub struct SourceAddressIdentifier;

#[async_trait]
impl NodeIdentifier for SourceAddressIdentifier {
    async fn identify(
        &self,
        storage: &Storage,
        src: SocketAddr,
        dist_id: &str,
    ) -> Result<Option<String>> {
        let host = src.ip().to_string();
        if let Some(node) = storage.node_by_notify_host(&host).await? {
            return Ok(Some(node.id));
        }
        // Fall back to the node recorded in any distribution record.
        let records = storage.list_distributions(dist_id).await?;
        Ok(records.first().map(|r| r.node_id.clone()))
    }
}

pub struct DnsServer {
    storage: Storage,
    engine: Arc<DistributionEngine>,
    config: Arc<Config>,
    codes: RecordCodes,
    metrics: Arc<KdcMetrics>,
    identifier: Arc<dyn NodeIdentifier>,
}

impl DnsServer {
    pub fn new(
        storage: Storage,
        engine: Arc<DistributionEngine>,
        config: Arc<Config>,
        metrics: Arc<KdcMetrics>,
    ) -> Self {
        let codes = config.record_codes();
        DnsServer {
            storage,
            engine,
            config,
            codes,
            metrics,
            identifier: Arc::new(SourceAddressIdentifier),
        }
    }

    pub fn with_identifier(mut self, identifier: Arc<dyn NodeIdentifier>) -> Self {
        self.identifier = identifier;
        self
    }

    pub async fn run_udp(self: Arc<Self>, socket: Arc<UdpSocket>) -> Result<()> {
        info!("DNS/UDP listening on {}", socket.local_addr()?);
        let mut buf = vec![0u8; 4096];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let server = self.clone();
                    let socket = socket.clone();
                    let data = buf[..len].to_vec();
                    tokio::spawn(async move {
                        if let Some(response) = server.handle_datagram(&data, addr, true).await {
                            if let Err(e) = socket.send_to(&response, addr).await {
                                warn!("UDP send to {} failed: {}", addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("UDP socket error: {}", e);
                    return Err(KdcError::from(e));
                }
            }
        }
    }

    pub async fn run_tcp(self: Arc<Self>, listener: Arc<TcpListener>) -> Result<()> {
        info!("DNS/TCP listening on {}", listener.local_addr()?);
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_tcp_connection(stream, addr).await {
                            debug!("TCP connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("TCP accept error: {}", e);
                    return Err(KdcError::from(e));
                }
            }
        }
    }

    async fn handle_tcp_connection(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 2];
            if stream.read_exact(&mut len_buf).await.is_err() {
                return Ok(()); // peer closed
            }
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            stream.read_exact(&mut data).await?;

            if let Some(response) = self.handle_datagram(&data, addr, false).await {
                let mut framed = Vec::with_capacity(2 + response.len());
                framed.extend_from_slice(&(response.len() as u16).to_be_bytes());
                framed.extend_from_slice(&response);
                stream.write_all(&framed).await?;
            }
        }
    }

    /// Parse one DNS message and produce the response bytes, if any.
    pub async fn handle_datagram(
        &self,
        data: &[u8],
        src: SocketAddr,
        udp: bool,
    ) -> Option<Vec<u8>> {
        let packet = match DNSPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.metrics.record_malformed();
                debug!("unparseable packet from {}: {}", src, e);
                return None;
            }
        };
        if packet.header.qr {
            return None; // a response, not ours to answer
        }

        let mut response = match packet.header.opcode {
            OPCODE_QUERY => self.handle_query(&packet, src).await,
            OPCODE_NOTIFY => self.handle_notify(&packet, src).await,
            _ => rcode_response(&packet, ResponseCode::NotImpl),
        };

        response.update_counts();
        let mut bytes = match response.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("response serialization failed: {}", e);
                return None;
            }
        };
        if udp && bytes.len() > MAX_UDP_RESPONSE {
            response.header.tc = true;
            response.answers.clear();
            response.authorities.clear();
            response.additional.clear();
            response.update_counts();
            bytes = response.serialize().ok()?;
        }
        Some(bytes)
    }

    async fn handle_query(&self, packet: &DNSPacket, src: SocketAddr) -> DNSPacket {
        let Some(question) = packet.questions.first() else {
            return rcode_response(packet, ResponseCode::FormErr);
        };

        // A SIG(0) signature rides in the additional section; signer
        // extraction only, verification is a future extension.
        for rr in &packet.additional {
            if rr.rtype == DNSResourceType::SIG {
                if let Some(signer) = rr.sig_signer_name() {
                    info!("query from {} signed by {}", src, signer);
                }
            }
        }

        let Some(kdc_type) = self.codes.classify(question.raw_qtype) else {
            // Ordinary record types belong to the authoritative engine.
            return rcode_response(packet, ResponseCode::NotImpl);
        };
        self.metrics.record_query(kdc_type.mnemonic());

        let qname = labels_to_name(&question.labels);
        let result = match kdc_type {
            KdcRecordType::Ctrl => self.answer_kmctrl(packet).await,
            KdcRecordType::Req => self.answer_kmreq(packet, &qname, src).await,
            KdcRecordType::Manifest => self.answer_manifest(packet, &qname).await,
            KdcRecordType::Chunk => self.answer_chunk(packet, &qname).await,
            KdcRecordType::Pkg => Ok(rcode_response(packet, ResponseCode::NotImpl)),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                let rcode = rcode_for_error(&e);
                debug!("KDC query {} failed: {} -> {:?}", qname, e, rcode);
                rcode_response(packet, rcode)
            }
        }
    }

    /// KMCTRL: advertise every distributed ZSK of every zone, with the
    /// control zone's SOA in the authority section.
    async fn answer_kmctrl(&self, packet: &DNSPacket) -> Result<DNSPacket> {
        let mut response = packet.create_response();
        let now = chrono::Utc::now().timestamp() as u64;
        let control_zone = canonical_name(&self.config.kdc.control_zone);

        for zone in self.storage.list_zones().await? {
            let keys = self
                .storage
                .keys_in_state(&zone.name, KeyType::Zsk, KeyState::Distributed)
                .await?;
            for key in keys {
                let record = KmCtrl {
                    dist_id: crate::keys::distribution_id_for_tag(key.key_tag),
                    key_id: key.key_tag,
                    state: KeyState::Distributed.as_str().to_string(),
                    timestamp: now,
                    zone: zone.name.clone(),
                };
                response.answers.push(DNSResource::private(
                    &control_zone,
                    self.codes.kmctrl,
                    KDC_RECORD_TTL,
                    record.pack()?,
                ));
            }
        }

        response.authorities.push(control_zone_soa(&control_zone)?);
        Ok(response)
    }

    /// KMREQ: seal every published or active ZSK of the zone for the
    /// requesting node and answer with KMPKG records.
    async fn answer_kmreq(
        &self,
        packet: &DNSPacket,
        qname: &str,
        src: SocketAddr,
    ) -> Result<DNSPacket> {
        let (dist_id, zone_name) = parse_kmreq_qname(qname, &self.config.kdc.control_zone)?;
        let zone = self.storage.get_zone(&zone_name).await?;
        if !zone.active {
            return Ok(rcode_response(packet, ResponseCode::Refused));
        }

        let node_id = self
            .identifier
            .identify(&self.storage, src, &dist_id)
            .await?
            .ok_or_else(|| {
                KdcError::NodeNotFound(format!("no node identified for KMREQ from {}", src))
            })?;
        let node = self.storage.get_node(&node_id).await?;

        let mut keys = self
            .storage
            .keys_in_state(&zone.name, KeyType::Zsk, KeyState::Published)
            .await?;
        keys.extend(
            self.storage
                .keys_in_state(&zone.name, KeyType::Zsk, KeyState::Active)
                .await?,
        );

        let mut response = packet.create_response();
        for key in keys {
            let sealed = crypto::seal(&node.public_key, &key.private_key)?;
            let pkg = KmPkg::single(sealed.container);
            response.answers.push(DNSResource::private(
                qname,
                self.codes.kmpkg,
                KDC_RECORD_TTL,
                pkg.pack()?,
            ));
        }
        Ok(response)
    }

    async fn answer_manifest(&self, packet: &DNSPacket, qname: &str) -> Result<DNSPacket> {
        let (node_id, dist_id) = parse_manifest_qname(qname, &self.config.kdc.control_zone)?;
        let prepared = self.engine.prepare_chunks(&node_id, &dist_id).await?;
        let mut response = packet.create_response();
        response.answers.push(DNSResource::private(
            qname,
            self.codes.manifest,
            KDC_RECORD_TTL,
            prepared.manifest.pack()?,
        ));
        Ok(response)
    }

    async fn answer_chunk(&self, packet: &DNSPacket, qname: &str) -> Result<DNSPacket> {
        let (seq, node_id, dist_id) = parse_chunk_qname(qname, &self.config.kdc.control_zone)?;
        let prepared = self.engine.prepare_chunks(&node_id, &dist_id).await?;
        let Some(chunk) = prepared.chunks.get(seq as usize) else {
            return Ok(rcode_response(packet, ResponseCode::NxDomain));
        };
        let mut response = packet.create_response();
        response.answers.push(DNSResource::private(
            qname,
            self.codes.chunk,
            KDC_RECORD_TTL,
            chunk.pack()?,
        ));
        Ok(response)
    }

    /// Inbound NOTIFY(MANIFEST): a node confirming receipt. The QNAME is
    /// `<distribution-id>.<control-zone>`.
    async fn handle_notify(&self, packet: &DNSPacket, src: SocketAddr) -> DNSPacket {
        self.metrics.record_notify_received();
        let Some(question) = packet.questions.first() else {
            return rcode_response(packet, ResponseCode::FormErr);
        };
        if self.codes.classify(question.raw_qtype) != Some(KdcRecordType::Manifest) {
            return rcode_response(packet, ResponseCode::Refused);
        }

        let qname = labels_to_name(&question.labels);
        let dist_id = match parse_notify_qname(&qname, &self.config.kdc.control_zone) {
            Ok(dist_id) => dist_id,
            Err(e) => {
                debug!("NOTIFY from {} with bad qname {}: {}", src, qname, e);
                return rcode_response(packet, ResponseCode::FormErr);
            }
        };

        let node_id = match self.identifier.identify(&self.storage, src, &dist_id).await {
            Ok(Some(node_id)) => node_id,
            Ok(None) => {
                warn!("NOTIFY from {} matches no node", src);
                return rcode_response(packet, ResponseCode::NotAuth);
            }
            Err(e) => {
                error!("node identification failed: {}", e);
                return rcode_response(packet, ResponseCode::ServFail);
            }
        };

        match self.engine.observe_confirmation(&dist_id, &node_id).await {
            Ok(()) => {
                let mut response = packet.create_response();
                response.header.opcode = OPCODE_NOTIFY;
                response
            }
            Err(e) if e.is_not_found() => rcode_response(packet, ResponseCode::NotAuth),
            Err(e) => {
                error!("confirmation for {} failed: {}", dist_id, e);
                rcode_response(packet, ResponseCode::ServFail)
            }
        }
    }
}

/// NOTIFY confirmations name `<distribution-id>.<control-zone>`.
fn parse_notify_qname(qname: &str, control_zone: &str) -> Result<String> {
    let canonical = canonical_name(qname);
    let suffix = canonical_name(control_zone);
    let head = canonical
        .strip_suffix(&suffix)
        .ok_or_else(|| KdcError::UnparseableQname(qname.to_string()))?
        .trim_end_matches('.');
    if head.is_empty() || head.contains('.') || !head.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KdcError::UnparseableQname(qname.to_string()));
    }
    Ok(head.to_string())
}

fn control_zone_soa(control_zone: &str) -> Result<DNSResource> {
    let serial = chrono::Utc::now().timestamp() as u32;
    Ok(DNSResource::soa(
        control_zone,
        control_zone,
        &format!("hostmaster.{}", control_zone.trim_start_matches('.')),
        serial,
        7200,
        1800,
        1_209_600,
        300,
    )?)
}

fn rcode_response(packet: &DNSPacket, rcode: ResponseCode) -> DNSPacket {
    let mut response = packet.create_response();
    response.header.rcode = rcode.into();
    response
}

fn rcode_for_error(err: &KdcError) -> ResponseCode {
    match err {
        KdcError::UnparseableQname(_) => ResponseCode::FormErr,
        e if e.is_not_found() => ResponseCode::NxDomain,
        KdcError::PreconditionFailed(_) => ResponseCode::Refused,
        _ => ResponseCode::ServFail,
    }
}
