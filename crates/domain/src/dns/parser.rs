use std::net::Ipv4Addr;

use super::error::DnsError;

// ── Constants ───────────────────────────────────────────────────────

/// DNS header is always 12 bytes.
const DNS_HEADER_LEN: usize = 12;
/// Maximum label length per RFC 1035.
const MAX_LABEL_LEN: usize = 63;
/// Maximum domain name length per RFC 1035.
const MAX_DOMAIN_LEN: usize = 253;
/// Maximum pointer hops to prevent compression loops.
const MAX_POINTER_HOPS: usize = 10;
/// Maximum answer records parsed per response.
const MAX_ANSWER_RECORDS: u16 = 20;
/// Maximum question entries parsed per packet.
const MAX_QUESTIONS: u16 = 10;

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// One A record from the answer section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub address: Ipv4Addr,
    pub ttl: u32,
}

// ── Public API ──────────────────────────────────────────────────────

/// Extract the IPv4 answers from a raw DNS response payload.
///
/// `payload` is the DNS message after the UDP header. Query packets yield
/// `NotAResponse`; non-A answer records are skipped.
pub fn parse_response_answers(payload: &[u8]) -> Result<Vec<DnsAnswer>, DnsError> {
    if payload.len() < DNS_HEADER_LEN {
        return Err(DnsError::TruncatedPayload {
            need: DNS_HEADER_LEN,
            got: payload.len(),
        });
    }

    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    if (flags >> 15) & 1 == 0 {
        return Err(DnsError::NotAResponse);
    }

    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    let ancount = u16::from_be_bytes([payload[6], payload[7]]);
    if qdcount > MAX_QUESTIONS {
        return Err(DnsError::TooManyRecords {
            count: qdcount,
            max: MAX_QUESTIONS,
        });
    }
    if ancount > MAX_ANSWER_RECORDS {
        return Err(DnsError::TooManyRecords {
            count: ancount,
            max: MAX_ANSWER_RECORDS,
        });
    }

    let mut offset = DNS_HEADER_LEN;

    // Skip the question section: name + qtype (2) + qclass (2).
    for _ in 0..qdcount {
        let (_, next) = parse_name(payload, offset)?;
        offset = next + 4;
        if offset > payload.len() {
            return Err(DnsError::TruncatedPayload {
                need: offset,
                got: payload.len(),
            });
        }
    }

    let mut answers = Vec::new();
    for _ in 0..ancount {
        let (name, next) = parse_name(payload, offset)?;
        offset = next;

        // type (2) + class (2) + ttl (4) + rdlength (2)
        if offset + 10 > payload.len() {
            return Err(DnsError::TruncatedPayload {
                need: offset + 10,
                got: payload.len(),
            });
        }
        let rtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        let rclass = u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]);
        let ttl = u32::from_be_bytes([
            payload[offset + 4],
            payload[offset + 5],
            payload[offset + 6],
            payload[offset + 7],
        ]);
        let rdlength = u16::from_be_bytes([payload[offset + 8], payload[offset + 9]]) as usize;
        offset += 10;

        if offset + rdlength > payload.len() {
            return Err(DnsError::TruncatedPayload {
                need: offset + rdlength,
                got: payload.len(),
            });
        }

        if rtype == TYPE_A && rclass == CLASS_IN && rdlength == 4 {
            answers.push(DnsAnswer {
                name,
                address: Ipv4Addr::new(
                    payload[offset],
                    payload[offset + 1],
                    payload[offset + 2],
                    payload[offset + 3],
                ),
                ttl,
            });
        }

        offset += rdlength;
    }

    Ok(answers)
}

// ── Name parsing ────────────────────────────────────────────────────

/// Parse a possibly compressed domain name starting at `offset`.
/// Returns the name and the offset just past it in the original stream.
fn parse_name(payload: &[u8], mut offset: usize) -> Result<(String, usize), DnsError> {
    let mut name = String::new();
    let mut hops = 0;
    // Offset to resume at in the outer record; set at the first pointer.
    let mut resume: Option<usize> = None;

    loop {
        let Some(&len) = payload.get(offset) else {
            return Err(DnsError::TruncatedPayload {
                need: offset + 1,
                got: payload.len(),
            });
        };

        // Compression pointer: two high bits set.
        if len & 0xC0 == 0xC0 {
            let Some(&low) = payload.get(offset + 1) else {
                return Err(DnsError::TruncatedPayload {
                    need: offset + 2,
                    got: payload.len(),
                });
            };
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(DnsError::MalformedPacket("pointer loop".to_string()));
            }
            if resume.is_none() {
                resume = Some(offset + 2);
            }
            offset = usize::from(len & 0x3F) << 8 | usize::from(low);
            continue;
        }

        if len == 0 {
            offset += 1;
            break;
        }

        let len = len as usize;
        if len > MAX_LABEL_LEN {
            return Err(DnsError::MalformedPacket("label too long".to_string()));
        }
        let start = offset + 1;
        let end = start + len;
        if end > payload.len() {
            return Err(DnsError::TruncatedPayload {
                need: end,
                got: payload.len(),
            });
        }

        if !name.is_empty() {
            name.push('.');
        }
        for &b in &payload[start..end] {
            name.push(char::from(b.to_ascii_lowercase()));
        }
        if name.len() > MAX_DOMAIN_LEN {
            return Err(DnsError::MalformedPacket("name too long".to_string()));
        }
        offset = end;
    }

    Ok((name, resume.unwrap_or(offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Test payload builders ─────────────────────────────────────

    fn header(response: bool, qdcount: u16, ancount: u16) -> Vec<u8> {
        let mut h = vec![0u8; 12];
        h[0] = 0x12;
        h[1] = 0x34;
        if response {
            h[2] = 0x80;
        }
        h[4..6].copy_from_slice(&qdcount.to_be_bytes());
        h[6..8].copy_from_slice(&ancount.to_be_bytes());
        h
    }

    fn encode_name(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(u8::try_from(label.len()).unwrap());
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    fn question(name: &str) -> Vec<u8> {
        let mut q = encode_name(name);
        q.extend_from_slice(&1u16.to_be_bytes()); // qtype A
        q.extend_from_slice(&1u16.to_be_bytes()); // qclass IN
        q
    }

    fn a_record(name_bytes: &[u8], ip: [u8; 4], ttl: u32) -> Vec<u8> {
        let mut r = name_bytes.to_vec();
        r.extend_from_slice(&1u16.to_be_bytes()); // type A
        r.extend_from_slice(&1u16.to_be_bytes()); // class IN
        r.extend_from_slice(&ttl.to_be_bytes());
        r.extend_from_slice(&4u16.to_be_bytes());
        r.extend_from_slice(&ip);
        r
    }

    fn response(name: &str, ips: &[[u8; 4]]) -> Vec<u8> {
        let mut payload = header(true, 1, u16::try_from(ips.len()).unwrap());
        payload.extend(question(name));
        for ip in ips {
            payload.extend(a_record(&encode_name(name), *ip, 300));
        }
        payload
    }

    // ── Parsing ───────────────────────────────────────────────────

    #[test]
    fn single_a_answer() {
        let payload = response("api.example.com", &[[10, 1, 2, 3]]);
        let answers = parse_response_answers(&payload).unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].name, "api.example.com");
        assert_eq!(answers[0].address, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(answers[0].ttl, 300);
    }

    #[test]
    fn multiple_answers() {
        let payload = response("api.example.com", &[[10, 1, 2, 3], [10, 1, 2, 4]]);
        let answers = parse_response_answers(&payload).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[1].address, Ipv4Addr::new(10, 1, 2, 4));
    }

    #[test]
    fn compressed_answer_name() {
        // Answer name is a pointer back to the question name at offset 12.
        let mut payload = header(true, 1, 1);
        payload.extend(question("api.example.com"));
        payload.extend(a_record(&[0xC0, 12], [10, 1, 2, 3], 60));

        let answers = parse_response_answers(&payload).unwrap();
        assert_eq!(answers[0].name, "api.example.com");
    }

    #[test]
    fn names_are_lowercased() {
        let payload = response("API.Example.COM", &[[10, 1, 2, 3]]);
        let answers = parse_response_answers(&payload).unwrap();
        assert_eq!(answers[0].name, "api.example.com");
    }

    #[test]
    fn non_a_records_are_skipped() {
        let mut payload = header(true, 1, 1);
        payload.extend(question("api.example.com"));
        // AAAA record (type 28, rdlength 16)
        let mut r = encode_name("api.example.com");
        r.extend_from_slice(&28u16.to_be_bytes());
        r.extend_from_slice(&1u16.to_be_bytes());
        r.extend_from_slice(&60u32.to_be_bytes());
        r.extend_from_slice(&16u16.to_be_bytes());
        r.extend_from_slice(&[0u8; 16]);
        payload.extend(r);

        let answers = parse_response_answers(&payload).unwrap();
        assert!(answers.is_empty());
    }

    // ── Rejection paths ───────────────────────────────────────────

    #[test]
    fn query_is_rejected() {
        let mut payload = header(false, 1, 0);
        payload.extend(question("api.example.com"));
        assert_eq!(
            parse_response_answers(&payload),
            Err(DnsError::NotAResponse)
        );
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(matches!(
            parse_response_answers(&[0u8; 5]),
            Err(DnsError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn truncated_answer_is_rejected() {
        let mut payload = response("api.example.com", &[[10, 1, 2, 3]]);
        payload.truncate(payload.len() - 2);
        assert!(matches!(
            parse_response_answers(&payload),
            Err(DnsError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn pointer_loop_is_rejected() {
        let mut payload = header(true, 0, 1);
        // A name that points at itself.
        let loop_offset = payload.len();
        payload.push(0xC0);
        payload.push(u8::try_from(loop_offset).unwrap());
        assert_eq!(
            parse_response_answers(&payload),
            Err(DnsError::MalformedPacket("pointer loop".to_string()))
        );
    }

    #[test]
    fn too_many_answers_rejected() {
        let payload = header(true, 0, MAX_ANSWER_RECORDS + 1);
        assert!(matches!(
            parse_response_answers(&payload),
            Err(DnsError::TooManyRecords { .. })
        ));
    }
}
