//! Tracker client
//!
//! Builds the announce URL, performs the HTTP GET, and parses the peer
//! list out of the bencoded response. Both the compact 6-byte form and the
//! dictionary form are understood.

use std::time::Duration;

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use tracing::debug;
use url::Url;

use crate::bencode::{self, Value};
use crate::error::Error;

/// Deadline for the whole announce round trip
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Announce to one tracker and return the peer addresses it offers,
/// formatted `"<ipv4>:<port>"`.
pub async fn announce(
    url: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: u64,
) -> Result<Vec<String>, Error> {
    let url = build_announce_url(url, info_hash, peer_id, port, left)?;
    debug!(%url, "tracker request");

    let client = reqwest::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()
        .map_err(|e| Error::io_with_source("building HTTP client", e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::io_with_source("HTTP GET request to tracker", e.to_string()))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::io_with_source("reading tracker response", e.to_string()))?;

    parse_response(&body)
}

/// Compose the announce URL. `info_hash` goes first because some trackers
/// are order-sensitive, and spaces must come out as `%20`, never `+`.
/// Query parameters already present on the tracker URL are kept.
pub fn build_announce_url(
    url: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: u64,
) -> Result<Url, Error> {
    let mut url: Url =
        url.parse().map_err(|e| Error::config(format!("parsing tracker URL: {}", e)))?;

    let mut query = format!(
        "info_hash={}",
        percent_encode(info_hash, NON_ALPHANUMERIC)
    );
    if let Some(existing) = url.query() {
        if !existing.is_empty() {
            query.push('&');
            query.push_str(existing);
        }
    }
    let rest = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("peer_id", &String::from_utf8_lossy(peer_id))
        .append_pair("port", &port.to_string())
        .append_pair("uploaded", "0")
        .append_pair("downloaded", "0")
        .append_pair("left", &left.to_string())
        .append_pair("compact", "1")
        .finish();
    query.push('&');
    query.push_str(&rest);

    url.set_query(Some(&query));
    Ok(url)
}

/// Parse the bencoded announce response into peer addresses
pub fn parse_response(body: &[u8]) -> Result<Vec<String>, Error> {
    let dict = bencode::parse_dict(body)?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()).and_then(Value::as_str) {
        return Err(Error::protocol(format!(
            "tracker returned failure response: {:?}",
            reason
        )));
    }

    match dict.get(b"peers".as_slice()) {
        Some(Value::Bytes(compact)) => {
            if compact.len() % 6 != 0 {
                return Err(Error::decode(
                    "tracker response contains peers string not divisible by 6",
                ));
            }
            Ok(compact
                .chunks_exact(6)
                .map(|chunk| {
                    let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                    format!("{}.{}.{}.{}:{}", chunk[0], chunk[1], chunk[2], chunk[3], port)
                })
                .collect())
        }
        Some(Value::List(list)) => {
            let mut peers = Vec::with_capacity(list.len());
            for entry in list {
                let entry = entry.as_dict().ok_or_else(|| {
                    Error::decode("tracker response contains a peers entry that is not a dictionary")
                })?;
                let ip = entry
                    .get(b"ip".as_slice())
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::decode("tracker peers entry has no ip entry of type string")
                    })?;
                let port = entry
                    .get(b"port".as_slice())
                    .and_then(Value::as_int)
                    .ok_or_else(|| {
                        Error::decode("tracker peers entry has no port entry of type integer")
                    })?;
                peers.push(format!("{}:{}", ip, port));
            }
            Ok(peers)
        }
        _ => Err(Error::decode(
            "tracker response contains no peers entry of type string or list",
        )),
    }
}
