use derive_builder::Builder;
use getset::CopyGetters;
use serde::{Deserialize, Serialize};

use crate::cid::MAX_CID_SIZE;

/// If the active_connection_id_limit transport parameter is absent,
/// a default of 2 is assumed, and it MUST NOT be less than 2.
pub const MIN_ACTIVE_CID_LIMIT: u64 = 2;

/// Limits applied by the connection ID trackers of one connection.
#[derive(Builder, CopyGetters, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct CidConfig {
    /// The maximum number of peer-issued connection IDs we are willing to store,
    /// advertised to the peer as active_connection_id_limit.
    #[getset(get_copy = "pub")]
    active_cid_limit: u64,
    /// Upper bound of active self-issued connection IDs, even if the peer
    /// allows more. Every issued ID costs a routing entry.
    #[getset(get_copy = "pub")]
    max_issued_cids: u64,
    /// Upper bound of self-issued connection IDs that are either active or
    /// waiting for removal.
    #[getset(get_copy = "pub")]
    max_cids_in_use: usize,
    /// Upper bound of disjoint sequence number intervals remembered for
    /// NEW_CONNECTION_ID deduplication.
    #[getset(get_copy = "pub")]
    max_seq_intervals: usize,
    /// Length of the randomly generated self-issued connection IDs.
    #[getset(get_copy = "pub")]
    cid_len: usize,
}

impl Default for CidConfig {
    fn default() -> Self {
        Self {
            active_cid_limit: MIN_ACTIVE_CID_LIMIT,
            max_issued_cids: 4,
            max_cids_in_use: 10,
            max_seq_intervals: 20,
            cid_len: 8,
        }
    }
}

impl CidConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let default = CidConfig::default();
        let active_cid_limit = self.active_cid_limit.unwrap_or(default.active_cid_limit);
        if active_cid_limit < MIN_ACTIVE_CID_LIMIT {
            return Err(format!("active_cid_limit {active_cid_limit} < 2"));
        }
        let max_issued_cids = self.max_issued_cids.unwrap_or(default.max_issued_cids);
        if max_issued_cids < MIN_ACTIVE_CID_LIMIT {
            return Err(format!("max_issued_cids {max_issued_cids} < 2"));
        }
        let max_cids_in_use = self.max_cids_in_use.unwrap_or(default.max_cids_in_use);
        if max_cids_in_use as u64 <= max_issued_cids {
            return Err(format!(
                "max_cids_in_use {max_cids_in_use} leaves no room for retiring beyond {max_issued_cids} issued"
            ));
        }
        if self.max_seq_intervals == Some(0) {
            return Err("max_seq_intervals must not be 0".to_owned());
        }
        let cid_len = self.cid_len.unwrap_or(default.cid_len);
        if !(1..=MAX_CID_SIZE).contains(&cid_len) {
            return Err(format!("cid_len {cid_len} is out of 1..={MAX_CID_SIZE}"));
        }
        Ok(())
    }
}
