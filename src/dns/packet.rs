use super::ParseError;
use super::header::DNSHeader;
use super::question::DNSQuestion;
use super::resource::DNSResource;
use super::wire::WireReader;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub additional: Vec<DNSResource>,
}

impl DNSPacket {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = WireReader::new(buf);
        let header = DNSHeader::read(&mut reader)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(DNSQuestion::read(&mut reader)?);
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answers.push(DNSResource::read(&mut reader)?);
        }

        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authorities.push(DNSResource::read(&mut reader)?);
        }

        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additional.push(DNSResource::read(&mut reader)?);
        }

        Ok(DNSPacket {
            header,
            questions,
            answers,
            authorities,
            additional,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut packet = self.clone();
        packet.update_counts();

        let mut out = Vec::with_capacity(512);
        packet.header.write(&mut out);
        for question in &packet.questions {
            question.write(&mut out)?;
        }
        for answer in &packet.answers {
            answer.write(&mut out)?;
        }
        for authority in &packet.authorities {
            authority.write(&mut out)?;
        }
        for resource in &packet.additional {
            resource.write(&mut out)?;
        }
        Ok(out)
    }

    pub fn update_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.additional.len() as u16;
    }

    /// Start a response packet echoing the request's id and question.
    pub fn create_response(&self) -> Self {
        DNSPacket {
            header: DNSHeader {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                aa: true,
                rd: self.header.rd,
                qdcount: self.header.qdcount,
                ..Default::default()
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }
}
