//! QNAME composition and parsing for the KDC query types.
//!
//! KMREQ:    <distribution-id>.<zone>.<control-zone>
//! MANIFEST: <node-id with distribution-id appended to its last label>.<control-zone>
//! CHUNK:    <decimal seq>.<manifest form>

use crate::error::{KdcError, Result};

use super::is_hex;

/// Canonical name form: lowercase, trailing dot.
pub fn canonical_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{}.", lower)
    }
}

fn split_labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Strip the control-zone labels off the end of a canonical qname,
/// returning the remaining leading labels.
fn strip_control_suffix(qname: &str, control_zone: &str) -> Result<Vec<String>> {
    let qlabels = split_labels(&canonical_name(qname));
    let ctrl = split_labels(&canonical_name(control_zone));
    if qlabels.len() <= ctrl.len() {
        return Err(KdcError::UnparseableQname(format!(
            "{} has too few labels under {}",
            qname, control_zone
        )));
    }
    let split = qlabels.len() - ctrl.len();
    if qlabels[split..] != ctrl[..] {
        return Err(KdcError::UnparseableQname(format!(
            "{} is not under control zone {}",
            qname, control_zone
        )));
    }
    Ok(qlabels[..split].to_vec())
}

pub fn kmreq_qname(dist_id: &str, zone: &str, control_zone: &str) -> String {
    format!(
        "{}.{}{}",
        dist_id,
        canonical_name(zone),
        canonical_name(control_zone)
    )
}

/// Split a KMREQ qname into (distribution id, zone).
pub fn parse_kmreq_qname(qname: &str, control_zone: &str) -> Result<(String, String)> {
    let rest = strip_control_suffix(qname, control_zone)?;
    if rest.len() < 2 {
        return Err(KdcError::UnparseableQname(format!(
            "KMREQ qname {} lacks a zone",
            qname
        )));
    }
    let dist_id = rest[0].clone();
    if !is_hex(&dist_id) {
        return Err(KdcError::UnparseableQname(format!(
            "KMREQ distribution id is not hex: {}",
            dist_id
        )));
    }
    let zone = format!("{}.", rest[1..].join("."));
    Ok((dist_id, zone))
}

pub fn manifest_qname(node_id: &str, dist_id: &str, control_zone: &str) -> String {
    let mut labels = split_labels(&canonical_name(node_id));
    if let Some(last) = labels.last_mut() {
        last.push_str(dist_id);
    }
    format!("{}.{}", labels.join("."), canonical_name(control_zone))
}

/// Split a MANIFEST qname into (node id, distribution id). The distribution
/// id is a hex suffix of the node id's trailing label; suffix lengths 4
/// through 8 are tried until one parses as hex.
pub fn parse_manifest_qname(qname: &str, control_zone: &str) -> Result<(String, String)> {
    let rest = strip_control_suffix(qname, control_zone)?;
    parse_node_dist_labels(&rest)
        .ok_or_else(|| KdcError::UnparseableQname(format!("no distribution id in {}", qname)))
}

fn parse_node_dist_labels(labels: &[String]) -> Option<(String, String)> {
    let last = labels.last()?;
    for suffix_len in 4..=8usize {
        if last.len() <= suffix_len {
            break;
        }
        let split = last.len() - suffix_len;
        let (head, suffix) = last.split_at(split);
        if is_hex(suffix) {
            let mut node_labels = labels[..labels.len() - 1].to_vec();
            node_labels.push(head.to_string());
            let node_id = format!("{}.", node_labels.join("."));
            return Some((node_id, suffix.to_ascii_lowercase()));
        }
    }
    None
}

pub fn chunk_qname(seq: u16, node_id: &str, dist_id: &str, control_zone: &str) -> String {
    format!("{}.{}", seq, manifest_qname(node_id, dist_id, control_zone))
}

/// Split a CHUNK qname into (chunk sequence, node id, distribution id).
pub fn parse_chunk_qname(qname: &str, control_zone: &str) -> Result<(u16, String, String)> {
    let rest = strip_control_suffix(qname, control_zone)?;
    if rest.len() < 2 {
        return Err(KdcError::UnparseableQname(format!(
            "CHUNK qname {} lacks a node",
            qname
        )));
    }
    let seq = rest[0]
        .parse::<u16>()
        .map_err(|_| KdcError::UnparseableQname(format!("bad chunk sequence: {}", rest[0])))?;
    let (node_id, dist_id) = parse_node_dist_labels(&rest[1..])
        .ok_or_else(|| KdcError::UnparseableQname(format!("no distribution id in {}", qname)))?;
    Ok((seq, node_id, dist_id))
}
