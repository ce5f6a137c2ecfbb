//! implements the DNS protocol in a transport agnostic fashion

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use derive_more::Display;

use crate::dns::buffer::{BufferError, PacketBuffer, SlicePacketBuffer, VectorPacketBuffer};

/// The only class this resolver speaks.
pub const CLASS_IN: u16 = 1;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Display)]
pub enum ProtocolError {
    #[display(fmt = "failed to encode query: {}", _0)]
    Encoding(BufferError),
    #[display(fmt = "failed to decode response: {}", _0)]
    Decoding(BufferError),
}

impl std::error::Error for ProtocolError {}

type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy)]
pub enum QueryType {
    UNKNOWN(u16),
    A,     // 1
    NS,    // 2
    CNAME, // 3
    SOA,   // 6
    WKS,   // 11
    PTR,   // 12
    HINFO, // 13
    MX,    // 15
    AAAA,  // 28
    AXFR,  // 252
    ANY,   // 255
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::UNKNOWN(x) => x,
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 3,
            QueryType::SOA => 6,
            QueryType::WKS => 11,
            QueryType::PTR => 12,
            QueryType::HINFO => 13,
            QueryType::MX => 15,
            QueryType::AAAA => 28,
            QueryType::AXFR => 252,
            QueryType::ANY => 255,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::NS,
            3 => QueryType::CNAME,
            6 => QueryType::SOA,
            11 => QueryType::WKS,
            12 => QueryType::PTR,
            13 => QueryType::HINFO,
            15 => QueryType::MX,
            28 => QueryType::AAAA,
            252 => QueryType::AXFR,
            255 => QueryType::ANY,
            _ => QueryType::UNKNOWN(num),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            QueryType::UNKNOWN(x) => write!(f, "TYPE{}", x),
            QueryType::A => write!(f, "A"),
            QueryType::NS => write!(f, "NS"),
            QueryType::CNAME => write!(f, "CNAME"),
            QueryType::SOA => write!(f, "SOA"),
            QueryType::WKS => write!(f, "WKS"),
            QueryType::PTR => write!(f, "PTR"),
            QueryType::HINFO => write!(f, "HINFO"),
            QueryType::MX => write!(f, "MX"),
            QueryType::AAAA => write!(f, "AAAA"),
            QueryType::AXFR => write!(f, "AXFR"),
            QueryType::ANY => write!(f, "ANY"),
        }
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<QueryType, String> {
        let qtype = match s.to_ascii_uppercase().as_str() {
            "A" => QueryType::A,
            "NS" => QueryType::NS,
            "CNAME" => QueryType::CNAME,
            "SOA" => QueryType::SOA,
            "WKS" => QueryType::WKS,
            "PTR" => QueryType::PTR,
            "HINFO" => QueryType::HINFO,
            "MX" => QueryType::MX,
            "AAAA" => QueryType::AAAA,
            "AXFR" => QueryType::AXFR,
            "ANY" => QueryType::ANY,
            other => match other.strip_prefix("TYPE").and_then(|x| x.parse::<u16>().ok()) {
                Some(num) => QueryType::from_num(num),
                None => return Err(format!("unknown query type `{}`", s)),
            },
        };

        Ok(qtype)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResultCode {
    NOERROR,
    FORMERR,
    SERVFAIL,
    NXDOMAIN,
    NOTIMP,
    REFUSED,
    UNKNOWN(u8),
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::NOERROR
    }
}

impl ResultCode {
    pub fn to_num(&self) -> u8 {
        match *self {
            ResultCode::NOERROR => 0,
            ResultCode::FORMERR => 1,
            ResultCode::SERVFAIL => 2,
            ResultCode::NXDOMAIN => 3,
            ResultCode::NOTIMP => 4,
            ResultCode::REFUSED => 5,
            ResultCode::UNKNOWN(x) => x,
        }
    }

    pub fn from_num(num: u8) -> ResultCode {
        match num {
            0 => ResultCode::NOERROR,
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::UNKNOWN(num),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit  RD
    pub truncated_message: bool,    // 1 bit  TC
    pub authoritative_answer: bool, // 1 bit  AA
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit  QR

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit  RA

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> std::result::Result<(), BufferError> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | ((self.opcode & 0x0F) << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode.to_num() & 0x0F)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> std::result::Result<(), BufferError> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        self.response = (flags & 0x8000) > 0;
        self.opcode = ((flags & 0x7800) >> 11) as u8;
        self.authoritative_answer = (flags & 0x0400) > 0;
        self.truncated_message = (flags & 0x0200) > 0;
        self.recursion_desired = (flags & 0x0100) > 0;

        self.recursion_available = (flags & 0x0080) > 0;
        self.z = (flags & 0x0040) > 0;
        self.authed_data = (flags & 0x0020) > 0;
        self.checking_disabled = (flags & 0x0010) > 0;
        self.rescode = ResultCode::from_num((flags & 0x000F) as u8);

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

impl fmt::Display for DnsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} qr={} opcode={} aa={} tc={} rd={} ra={} rcode={:?} qd={} an={} ns={} ar={}",
            self.id,
            self.response as u8,
            self.opcode,
            self.authoritative_answer as u8,
            self.truncated_message as u8,
            self.recursion_desired as u8,
            self.recursion_available as u8,
            self.rescode,
            self.questions,
            self.answers,
            self.authoritative_entries,
            self.resource_entries
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
}

impl DnsQuestion {
    pub fn new(name: &str, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name: name.to_string(),
            qtype,
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> std::result::Result<(), BufferError> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(CLASS_IN)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> std::result::Result<DnsQuestion, BufferError> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;
        let qtype = QueryType::from_num(buffer.read_u16()?);
        let _ = buffer.read_u16()?; // class

        Ok(DnsQuestion { name, qtype })
    }

    /// Whether this question is the echo of a query for `name` and `qtype`.
    /// Names compare case-insensitively and without the trailing dot.
    pub fn echoes(&self, name: &str, qtype: QueryType) -> bool {
        self.qtype == qtype
            && self
                .name
                .trim_end_matches('.')
                .eq_ignore_ascii_case(name.trim_matches('.'))
    }
}

/// Answer records. Only address records are decoded, everything else is
/// skipped over by its data length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DnsRecord {
    UNKNOWN {
        domain: String,
        qtype: u16,
        data_len: u16,
        ttl: u32,
    }, // 0
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: u32,
    }, // 1
    AAAA {
        domain: String,
        addr: Ipv6Addr,
        ttl: u32,
    }, // 28
}

impl DnsRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> std::result::Result<DnsRecord, BufferError> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype_num = buffer.read_u16()?;
        let class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()?;

        match (QueryType::from_num(qtype_num), class, data_len) {
            (QueryType::A, CLASS_IN, 4) => {
                let raw_addr = buffer.read_u32()?;

                Ok(DnsRecord::A {
                    domain,
                    addr: Ipv4Addr::from(raw_addr),
                    ttl,
                })
            }
            (QueryType::AAAA, CLASS_IN, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(buffer.get_range(buffer.pos(), 16)?);
                buffer.step(16)?;

                Ok(DnsRecord::AAAA {
                    domain,
                    addr: Ipv6Addr::from(octets),
                    ttl,
                })
            }
            _ => {
                buffer.step(data_len as usize)?;

                Ok(DnsRecord::UNKNOWN {
                    domain,
                    qtype: qtype_num,
                    data_len,
                    ttl,
                })
            }
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> std::result::Result<usize, BufferError> {
        let start_pos = buffer.pos();

        match *self {
            DnsRecord::A {
                ref domain,
                ref addr,
                ttl,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::A.to_num())?;
                buffer.write_u16(CLASS_IN)?;
                buffer.write_u32(ttl)?;
                buffer.write_u16(4)?;

                for octet in addr.octets().iter() {
                    buffer.write_u8(*octet)?;
                }
            }
            DnsRecord::AAAA {
                ref domain,
                ref addr,
                ttl,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::AAAA.to_num())?;
                buffer.write_u16(CLASS_IN)?;
                buffer.write_u32(ttl)?;
                buffer.write_u16(16)?;

                for segment in addr.segments().iter() {
                    buffer.write_u16(*segment)?;
                }
            }
            DnsRecord::UNKNOWN { qtype, .. } => {
                return Err(BufferError::UnsupportedRecord(qtype));
            }
        }

        Ok(buffer.pos() - start_pos)
    }

    pub fn get_domain(&self) -> &str {
        match *self {
            DnsRecord::A { ref domain, .. }
            | DnsRecord::AAAA { ref domain, .. }
            | DnsRecord::UNKNOWN { ref domain, .. } => domain,
        }
    }

    pub fn get_address(&self) -> Option<IpAddr> {
        match *self {
            DnsRecord::A { addr, .. } => Some(IpAddr::V4(addr)),
            DnsRecord::AAAA { addr, .. } => Some(IpAddr::V6(addr)),
            DnsRecord::UNKNOWN { .. } => None,
        }
    }
}

/// A DNS message. Authority and additional sections are counted in the
/// header but never decoded.
#[derive(Clone, Debug, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> std::result::Result<DnsPacket, BufferError> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            result.questions.push(DnsQuestion::read(buffer)?);
        }

        for _ in 0..result.header.answers {
            result.answers.push(DnsRecord::read(buffer)?);
        }

        Ok(result)
    }

    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T) -> std::result::Result<(), BufferError> {
        self.header.questions = self.questions.len() as u16;
        self.header.answers = self.answers.len() as u16;

        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        for answer in &self.answers {
            answer.write(buffer)?;
        }

        Ok(())
    }

    /// Addresses found in the answer section for records of type `qtype`.
    pub fn get_addresses(&self, qtype: QueryType) -> Vec<IpAddr> {
        self.answers
            .iter()
            .filter(|rec| match (rec, qtype) {
                (DnsRecord::A { .. }, QueryType::A) => true,
                (DnsRecord::AAAA { .. }, QueryType::AAAA) => true,
                _ => false,
            })
            .filter_map(DnsRecord::get_address)
            .collect()
    }
}

/// Builds a standard query for `hostname` carrying the transaction id `id`.
///
/// The header asks for recursion and holds a single question of class IN.
/// Fails when any label of `hostname` breaks the wire limits.
pub fn encode_query(id: u16, hostname: &str, qtype: QueryType) -> Result<Vec<u8>> {
    let mut packet = DnsPacket::new();
    packet.header.id = id;
    packet.header.recursion_desired = true;
    packet.questions.push(DnsQuestion::new(hostname, qtype));

    let mut buffer = VectorPacketBuffer::new();
    packet.write(&mut buffer).map_err(ProtocolError::Encoding)?;

    Ok(buffer.into_inner())
}

/// Parses a datagram into a `DnsPacket`.
pub fn decode_response(data: &[u8]) -> Result<DnsPacket> {
    let mut buffer = SlicePacketBuffer::new(data);

    DnsPacket::from_buffer(&mut buffer).map_err(ProtocolError::Decoding)
}
