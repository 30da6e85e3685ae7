//! Text form of packet records
//!
//! One packet per line, tab separated:
//! `src_ip  src_port  dst_ip  dst_port  protocol  flags  size  arrival`.
//! Columns are padded for readability and trimmed again when parsing, so
//! `parse_packet(&format_packet(p))` gives back `p` field for field.

use crate::error::ParseError;
use crate::types::{FlowKey, PacketRecord, Timestamp};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Format a packet as one text line (no trailing newline)
pub fn format_packet(packet: &PacketRecord) -> String {
    format!(
        "{:<15}\t{:>5}\t{:<15}\t{:>5}\t{:>2}\t{}\t{:>4}\t{}",
        packet.key.src_addr().to_string(),
        packet.key.sport,
        packet.key.dst_addr().to_string(),
        packet.key.dport,
        packet.key.protocol,
        packet.flags,
        packet.size,
        packet.arrival
    )
}

/// Parse one text line produced by [`format_packet`]
pub fn parse_packet(line: &str) -> Result<PacketRecord, ParseError> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t').map(str::trim);

    let saddr: Ipv4Addr = next_field(&mut fields, "src_ip")?;
    let sport: u16 = next_field(&mut fields, "src_port")?;
    let daddr: Ipv4Addr = next_field(&mut fields, "dst_ip")?;
    let dport: u16 = next_field(&mut fields, "dst_port")?;
    let protocol: u32 = next_field(&mut fields, "protocol")?;
    let flags: u16 = next_field(&mut fields, "flags")?;
    let size: u16 = next_field(&mut fields, "size")?;
    let arrival: Timestamp = next_field(&mut fields, "arrival")?;

    if let Some(extra) = fields.find(|f| !f.is_empty()) {
        return Err(ParseError::TrailingField(extra.to_string()));
    }

    Ok(PacketRecord::new(
        FlowKey::new(saddr, daddr, sport, dport, protocol),
        flags,
        size,
        arrival,
    ))
}

fn next_field<'a, T: FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<T, ParseError> {
    let raw = fields.next().ok_or(ParseError::MissingField(name))?;
    if raw.is_empty() {
        return Err(ParseError::MissingField(name));
    }
    raw.parse().map_err(|_| ParseError::InvalidField {
        field: name,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PacketRecord {
        PacketRecord::new(
            FlowKey::new(
                Ipv4Addr::new(79, 123, 176, 238),
                Ipv4Addr::new(54, 201, 100, 251),
                80,
                443,
                6,
            ),
            0x18,
            80,
            Timestamp::new(1_400_000_000, 7),
        )
    }

    #[test]
    fn test_text_round_trip_is_exact() {
        let packet = sample();
        let line = format_packet(&packet);
        let parsed = parse_packet(&line).unwrap();

        assert_eq!(parsed.to_bytes(), packet.to_bytes());
        assert_eq!(format_packet(&parsed), line);
    }

    #[test]
    fn test_text_layout() {
        let line = format_packet(&sample());
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], "79.123.176.238 ");
        assert_eq!(fields[1], "   80");
        assert_eq!(fields[7], "1400000000.000007");
    }

    #[test]
    fn test_parse_errors_name_the_field() {
        assert_eq!(
            parse_packet("10.0.0.1\t80").err(),
            Some(ParseError::MissingField("dst_ip"))
        );
        assert_eq!(
            parse_packet("10.0.0.1\t99999\t10.0.0.2\t80\t6\t0\t60\t1.000000").err(),
            Some(ParseError::InvalidField {
                field: "src_port",
                value: "99999".to_string()
            })
        );
        assert!(matches!(
            parse_packet("10.0.0.1\t1\t10.0.0.2\t80\t6\t0\t60\t1.000000\textra"),
            Err(ParseError::TrailingField(_))
        ));
    }

    #[test]
    fn test_parse_accepts_crlf() {
        let line = format!("{}\r\n", format_packet(&sample()));
        assert!(parse_packet(&line).is_ok());
    }
}
