use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;

use crate::shared::{ParseError, Prefix, ASN};

/// One route from a decoded RIB snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    as_path: Vec<ASN>,
    prefix: Prefix,
    next_hop: IpAddr,
    collector: String,
    peer_ip: Option<IpAddr>,
    peer_asn: Option<ASN>,
}

impl PathRecord {
    pub fn new(
        as_path: Vec<ASN>,
        prefix: Prefix,
        next_hop: IpAddr,
        collector: impl Into<String>,
    ) -> Result<Self, ParseError> {
        if as_path.is_empty() {
            return Err(ParseError::new("empty AS path", prefix.to_string()));
        }
        Ok(PathRecord {
            as_path,
            prefix,
            next_hop,
            collector: collector.into(),
            peer_ip: None,
            peer_asn: None,
        })
    }

    pub fn with_peer(mut self, peer_ip: Option<IpAddr>, peer_asn: Option<ASN>) -> Self {
        self.peer_ip = peer_ip;
        self.peer_asn = peer_asn;
        self
    }

    pub fn as_path(&self) -> &[ASN] {
        &self.as_path
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn next_hop(&self) -> IpAddr {
        self.next_hop
    }

    pub fn collector(&self) -> &str {
        &self.collector
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_ip
    }

    pub fn peer_asn(&self) -> Option<ASN> {
        self.peer_asn
    }

    /// The originating AS is the last hop of the path.
    pub fn origin(&self) -> ASN {
        // as_path is never empty
        self.as_path[self.as_path.len() - 1]
    }

    pub fn contains(&self, asn: ASN) -> bool {
        self.as_path.contains(&asn)
    }

    pub fn contains_any(&self, asns: &HashSet<ASN>) -> bool {
        self.as_path.iter().any(|asn| asns.contains(asn))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Record(PathRecord),
    /// Headers, comments, non-RIB record types and IPv6 routes.
    Skip,
    Error(ParseError),
}

const FIELD_TYPE: usize = 0;
const FIELD_PEER_IP: usize = 3;
const FIELD_PEER_ASN: usize = 4;
const FIELD_PREFIX: usize = 5;
const FIELD_AS_PATH: usize = 6;
const FIELD_NEXT_HOP: usize = 8;
const MIN_FIELDS: usize = 9;

/// Parses one line of `bgpdump -m` output:
///
/// `TABLE_DUMP2|1759262400|B|202.249.2.169|2497|1.34.0.0/15|2497 3462|IGP|202.249.2.169|0|0||AG|`
///
/// The collector is not part of the line; it comes from the input file's location.
pub fn parse_line(line: &str, collector: &str) -> ParseOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return ParseOutcome::Skip;
    }

    let fields: Vec<&str> = trimmed.split('|').collect();
    if !matches!(fields[FIELD_TYPE], "TABLE_DUMP" | "TABLE_DUMP2") {
        return ParseOutcome::Skip;
    }
    if fields.len() < MIN_FIELDS {
        return ParseOutcome::Error(ParseError::new(
            format!("expected at least {} fields, found {}", MIN_FIELDS, fields.len()),
            trimmed,
        ));
    }

    let prefix_str = fields[FIELD_PREFIX].trim();
    if !prefix_str.contains('/') {
        return ParseOutcome::Error(ParseError::new("prefix is not in CIDR notation", trimmed));
    }
    let prefix = match Prefix::from_str(prefix_str) {
        Ok(prefix) => prefix,
        Err(_) => return ParseOutcome::Error(ParseError::new("invalid prefix", trimmed)),
    };
    if prefix.is_ipv6() {
        return ParseOutcome::Skip;
    }

    let next_hop = match IpAddr::from_str(fields[FIELD_NEXT_HOP].trim()) {
        Ok(ip) => ip,
        Err(_) => return ParseOutcome::Error(ParseError::new("invalid next-hop", trimmed)),
    };

    let as_path = match parse_as_path(fields[FIELD_AS_PATH]) {
        Ok(path) => path,
        Err(reason) => return ParseOutcome::Error(ParseError::new(reason, trimmed)),
    };

    let peer_ip = IpAddr::from_str(fields[FIELD_PEER_IP].trim()).ok();
    let peer_asn = fields[FIELD_PEER_ASN].trim().parse::<ASN>().ok();

    match PathRecord::new(as_path, prefix, next_hop, collector) {
        Ok(record) => ParseOutcome::Record(record.with_peer(peer_ip, peer_asn)),
        Err(e) => ParseOutcome::Error(ParseError::new(e.reason, trimmed)),
    }
}

/// Turns an AS-path field into a plain ASN sequence.
///
/// AS-SET (`{..}`) and confederation (`(..)`, `[..]`) segments are dropped
/// entirely, so their members never reach the frequency or adjacency counts.
pub fn parse_as_path(field: &str) -> Result<Vec<ASN>, String> {
    let mut path = Vec::new();
    let mut open: Vec<char> = Vec::new();
    let mut token = String::new();

    for c in field.chars().chain(std::iter::once(' ')) {
        match c {
            '{' | '(' | '[' => {
                if open.is_empty() {
                    push_token(&mut token, &mut path)?;
                }
                open.push(c);
            }
            '}' | ')' | ']' => {
                let expected = match c {
                    '}' => '{',
                    ')' => '(',
                    _ => '[',
                };
                if open.pop() != Some(expected) {
                    return Err(format!("unbalanced '{}' in AS path", c));
                }
            }
            _ if !open.is_empty() => {}
            c if c.is_whitespace() => push_token(&mut token, &mut path)?,
            c => token.push(c),
        }
    }

    if !open.is_empty() {
        return Err("unterminated AS-SET or confederation segment".to_string());
    }
    if path.is_empty() {
        return Err("empty AS path".to_string());
    }
    Ok(path)
}

fn push_token(token: &mut String, path: &mut Vec<ASN>) -> Result<(), String> {
    if token.is_empty() {
        return Ok(());
    }
    let digits = token
        .strip_prefix("AS")
        .or_else(|| token.strip_prefix("as"))
        .unwrap_or(token.as_str());
    let asn = digits
        .parse::<ASN>()
        .map_err(|_| format!("non-numeric AS path token '{}'", token))?;
    path.push(asn);
    token.clear();
    Ok(())
}
