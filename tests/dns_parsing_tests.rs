use keymaster::dns::wire::{WireReader, labels_to_name, name_to_labels, write_name};
use keymaster::dns::{
    DNSHeader, DNSPacket, DNSQuestion, DNSResource, DNSResourceClass, DNSResourceType,
    OPCODE_QUERY,
};

#[test]
fn test_header_roundtrip() {
    let original = DNSHeader {
        id: 0x1234,
        qr: false,
        opcode: OPCODE_QUERY,
        aa: false,
        tc: false,
        rd: true,
        ra: false,
        z: 0,
        rcode: 0,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };

    let mut buffer = Vec::new();
    original.write(&mut buffer);
    assert_eq!(buffer.len(), 12);

    let mut reader = WireReader::new(&buffer);
    let parsed = DNSHeader::read(&mut reader).expect("read header");
    assert_eq!(parsed, original);
}

#[test]
fn test_header_flags_word() {
    let header = DNSHeader {
        id: 1,
        qr: true,
        opcode: 4,
        aa: true,
        rcode: 5,
        ..Default::default()
    };
    let mut buffer = Vec::new();
    header.write(&mut buffer);

    // QR | opcode 4 | AA | RCODE 5
    assert_eq!(&buffer[2..4], &[0xA4, 0x05]);
    let mut reader = WireReader::new(&buffer);
    let parsed = DNSHeader::read(&mut reader).expect("read header");
    assert_eq!(parsed, header);
}

#[test]
fn test_question_roundtrip_with_private_type() {
    let original =
        DNSQuestion::with_raw_qtype(name_to_labels("beef.example.com.kdc.example.net."), 65031);

    let mut buffer = Vec::new();
    original.write(&mut buffer).expect("write question");

    let mut reader = WireReader::new(&buffer);
    let parsed = DNSQuestion::read(&mut reader).expect("read question");

    assert_eq!(parsed.labels, original.labels);
    assert_eq!(parsed.raw_qtype, 65031);
    assert_eq!(parsed.qtype, DNSResourceType::Unknown);
}

#[test]
fn test_resource_roundtrip_with_private_type() {
    let original = DNSResource::private("kdc.example.net.", 65030, 300, vec![1, 2, 3, 4]);

    let mut buffer = Vec::new();
    original.write(&mut buffer).expect("write resource");

    let mut reader = WireReader::new(&buffer);
    let parsed = DNSResource::read(&mut reader).expect("read resource");

    assert_eq!(parsed.labels, original.labels);
    assert_eq!(parsed.raw_rtype, Some(65030));
    assert_eq!(parsed.rdata, vec![1, 2, 3, 4]);
    assert_eq!(parsed.ttl, 300);
}

#[test]
fn test_packet_roundtrip() {
    let mut packet = DNSPacket::default();
    packet.header.id = 42;
    packet.header.rd = true;
    packet.questions.push(DNSQuestion::new(
        name_to_labels("example.com."),
        DNSResourceType::SOA,
        DNSResourceClass::IN,
    ));
    packet.answers.push(DNSResource::private(
        "example.com.",
        65032,
        300,
        vec![0, 1, 0, 1, 0, 2, 0xAB, 0xCD],
    ));
    packet.update_counts();

    let bytes = packet.serialize().expect("serialize");
    let parsed = DNSPacket::parse(&bytes).expect("parse");

    assert_eq!(parsed.header.id, 42);
    assert_eq!(parsed.questions.len(), 1);
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.questions[0].labels, packet.questions[0].labels);
    assert_eq!(parsed.answers[0].rdata, packet.answers[0].rdata);
}

#[test]
fn test_compressed_name_follows_pointer() {
    // Hand-built message: one question for example.com., one answer whose
    // owner name is a pointer back to the question's name at offset 12.
    let mut buf = Vec::new();
    DNSHeader {
        id: 9,
        qdcount: 1,
        ancount: 1,
        ..Default::default()
    }
    .write(&mut buf);
    write_name(&mut buf, &name_to_labels("example.com.")).expect("question name");
    buf.extend_from_slice(&1u16.to_be_bytes()); // A
    buf.extend_from_slice(&1u16.to_be_bytes()); // IN
    buf.extend_from_slice(&[0xC0, 0x0C]); // pointer to offset 12
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&300u32.to_be_bytes());
    buf.extend_from_slice(&4u16.to_be_bytes());
    buf.extend_from_slice(&[192, 0, 2, 1]);

    let parsed = DNSPacket::parse(&buf).expect("parse compressed");
    assert_eq!(
        labels_to_name(&parsed.answers[0].labels),
        "example.com."
    );
    assert_eq!(parsed.answers[0].rdata, vec![192, 0, 2, 1]);
}

#[test]
fn test_write_name_rejects_oversized_labels() {
    let mut out = Vec::new();
    let long_label = vec!["x".repeat(64), String::new()];
    assert!(write_name(&mut out, &long_label).is_err());
}

#[test]
fn test_labels_name_conversion() {
    let labels = name_to_labels("edge1.example.net.");
    assert_eq!(labels, vec!["edge1", "example", "net", ""]);
    assert_eq!(labels_to_name(&labels), "edge1.example.net.");

    assert_eq!(name_to_labels("."), vec![String::new()]);
    assert_eq!(labels_to_name(&[String::new()]), ".");
}

#[test]
fn test_soa_record_shape() {
    let soa = DNSResource::soa(
        "kdc.example.net.",
        "kdc.example.net.",
        "hostmaster.kdc.example.net.",
        1,
        7200,
        1800,
        1_209_600,
        300,
    )
    .expect("soa record");
    assert_eq!(soa.rtype, DNSResourceType::SOA);
    assert_eq!(&soa.rdata[soa.rdata.len() - 4..], &300u32.to_be_bytes());
}

#[test]
fn test_sig_signer_name_extraction() {
    // SIG RDATA: covered(2) alg(1) labels(1) ttl(4) exp(4) inc(4) tag(2),
    // then the signer name, then the signature bytes.
    let mut rdata = vec![0u8; 18];
    for label in ["edge1", "example", "net"] {
        rdata.push(label.len() as u8);
        rdata.extend_from_slice(label.as_bytes());
    }
    rdata.push(0);
    rdata.extend_from_slice(&[0xFF; 64]);

    let mut sig = DNSResource::private("kdc.example.net.", 24, 0, rdata);
    sig.rtype = DNSResourceType::SIG;

    assert_eq!(sig.sig_signer_name().as_deref(), Some("edge1.example.net."));
}

#[test]
fn test_malformed_packet_rejected() {
    assert!(DNSPacket::parse(&[0u8; 3]).is_err());
}
