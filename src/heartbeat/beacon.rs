//! Heartbeat beacon wire format
//!
//! Beacons are deliberately a tiny ASCII text format, not a structured
//! encoding: `HEARTBEAT:<serverId>;<epochMillis>`. The parser must survive
//! receipt of arbitrary noise on the multicast group, so it locates the
//! `HEARTBEAT` token anywhere in the payload and accepts either `:` or `;`
//! as a field separator. Anything malformed is discarded, never an error.

/// Token that marks the start of a beacon payload
pub const BEACON_TOKEN: &str = "HEARTBEAT";

/// Format a beacon for the given server id and timestamp
pub fn format_beacon(server_id: &str, epoch_millis: i64) -> String {
    format!("{}:{};{}", BEACON_TOKEN, server_id, epoch_millis)
}

/// Parse a beacon payload into (server_id, epoch_millis).
///
/// Tolerates leading garbage before the token and mixed `:`/`;`
/// separators. Returns `None` for anything that is not a well-formed
/// beacon: missing token, too few fields, empty server id, non-numeric
/// timestamp.
pub fn parse_beacon(raw: &str) -> Option<(String, i64)> {
    let start = raw.find(BEACON_TOKEN)?;
    let msg = &raw[start..];

    let mut parts = msg.split(|c| c == ':' || c == ';');
    let _token = parts.next()?;
    let server_id = parts.next()?;
    let timestamp = parts.next()?;

    if server_id.is_empty() {
        return None;
    }

    let epoch_millis: i64 = timestamp.trim().parse().ok()?;
    Some((server_id.to_string(), epoch_millis))
}
