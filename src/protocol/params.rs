//! SAT>IP transport parameter parsing.
//!
//! The recognized query keys and their value sets:
//!
//! | key | values |
//! |-----|--------|
//! | `freq=` | decimal MHz |
//! | `sr=` | integer ksym/s |
//! | `msys=` | `dvbs` `dvbs2` `dvbt` `dvbt2` `dvbc` `dvbc2` |
//! | `pol=` | `h` `v` |
//! | `src=` | DiSEqC source, 1..N |
//! | `plts=` | `on` `off` `auto` |
//! | `ro=` | `0.35` `0.25` `0.20` `auto` |
//! | `fec=` | `12` `23` `34` `35` `45` `56` `67` `78` `89` `910` `999` |
//! | `mtype=` | `qpsk` `8psk` `16qam` `64qam` `256qam` |
//! | `specinv=` | 0..2 |
//! | `bw=` | decimal MHz |
//! | `tmode=` | `1k` `2k` `4k` `8k` `16k` `32k` `auto` |
//! | `gi=` | `14` `18` `116` `132` `1128` `19128` `19256` |
//! | `plp=` `t2id=` `sm=` | integer |
//! | `pids=` `addpids=` | `all` or comma-separated PIDs |
//! | `delpids=` | comma-separated PIDs |
//!
//! Numeric scaling to the stored units (MHz → kHz, ksym/s → sym/s,
//! MHz → Hz) happens at the application site in the stream controller.

const KNOWN_KEYS: &[&str] = &[
    "freq", "sr", "msys", "pol", "src", "plts", "ro", "fec", "mtype", "specinv", "bw", "tmode",
    "gi", "plp", "t2id", "sm", "pids", "addpids", "delpids",
];

/// Iterate `key=value` pairs of a query string.
pub fn pairs(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query
        .split('&')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Value of `key` in the query string, if present.
pub fn get<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    pairs(query).find(|(k, _)| *k == key).map(|(_, v)| v)
}

/// Integer value of `key`; a malformed number counts as absent.
pub fn get_int(query: &str, key: &str) -> Option<i32> {
    get(query, key).and_then(|v| v.parse().ok())
}

/// Decimal value of `key`; a malformed number counts as absent.
pub fn get_double(query: &str, key: &str) -> Option<f64> {
    get(query, key).and_then(|v| v.parse().ok())
}

/// Whether the query carries any recognized transport parameter.
pub fn has_transport_parameters(query: &str) -> bool {
    pairs(query).any(|(k, _)| KNOWN_KEYS.contains(&k))
}

/// A parsed `pids=` / `addpids=` / `delpids=` value.
#[derive(Debug, PartialEq, Eq)]
pub enum PidList {
    /// The literal `all`: full transport stream.
    All,
    /// Individual PIDs; out-of-range or malformed entries are dropped
    /// with a warning.
    Pids(Vec<u16>),
}

impl PidList {
    pub fn parse(value: &str) -> Self {
        if value == "all" {
            return Self::All;
        }
        let mut pids = Vec::new();
        for entry in value.split(',').filter(|e| !e.is_empty()) {
            match entry.parse::<u16>() {
                Ok(pid) if pid < 8192 => pids.push(pid),
                _ => tracing::warn!(entry, "ignoring invalid PID"),
            }
        }
        Self::Pids(pids)
    }
}

/// Extract the `client_port=RTP-RTCP` pair from an RTSP `Transport`
/// header value (RFC 2326 §12.39).
pub fn client_ports(transport: &str) -> Option<(u16, u16)> {
    for part in transport.split(';') {
        if let Some(ports) = part.trim().strip_prefix("client_port=") {
            if let Some((rtp, rtcp)) = ports.split_once('-') {
                return Some((rtp.parse().ok()?, rtcp.parse().ok()?));
            }
            // single port: RTCP is conventionally one above
            let rtp: u16 = ports.parse().ok()?;
            return Some((rtp, rtp + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY: &str = "src=1&freq=11836&pol=v&msys=dvbs2&sr=27500&fec=34&pids=0,17,100";

    #[test]
    fn get_finds_values() {
        assert_eq!(get(QUERY, "pol"), Some("v"));
        assert_eq!(get(QUERY, "msys"), Some("dvbs2"));
        assert_eq!(get(QUERY, "bw"), None);
    }

    #[test]
    fn numeric_getters() {
        assert_eq!(get_int(QUERY, "src"), Some(1));
        assert_eq!(get_double(QUERY, "freq"), Some(11836.0));
        assert_eq!(get_int(QUERY, "pol"), None);
    }

    #[test]
    fn transport_parameter_detection() {
        assert!(has_transport_parameters(QUERY));
        assert!(has_transport_parameters("addpids=200"));
        assert!(!has_transport_parameters("foo=bar&baz=1"));
        assert!(!has_transport_parameters(""));
    }

    #[test]
    fn pid_list_all() {
        assert_eq!(PidList::parse("all"), PidList::All);
    }

    #[test]
    fn pid_list_entries() {
        assert_eq!(PidList::parse("0,17,100"), PidList::Pids(vec![0, 17, 100]));
    }

    #[test]
    fn pid_list_drops_invalid_entries() {
        assert_eq!(
            PidList::parse("0,bogus,9000,17"),
            PidList::Pids(vec![0, 17])
        );
    }

    #[test]
    fn client_ports_pair() {
        assert_eq!(
            client_ports("RTP/AVP;unicast;client_port=5000-5001"),
            Some((5000, 5001))
        );
    }

    #[test]
    fn client_ports_single() {
        assert_eq!(
            client_ports("RTP/AVP;unicast;client_port=5000"),
            Some((5000, 5001))
        );
    }

    #[test]
    fn client_ports_absent() {
        assert_eq!(client_ports("RTP/AVP;unicast"), None);
    }
}
