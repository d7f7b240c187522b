//! JSON trace of warp requests.
use crate::{
    address,
    request::{self, RequestError, WarpRequest},
    warp,
};
use color_eyre::eyre::{self, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_size() -> u32 {
    4
}

/// One warp request of a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRequest {
    #[serde(default)]
    pub core_id: usize,
    pub warp_id: usize,
    #[serde(default)]
    pub pc: usize,
    pub kind: request::Kind,
    /// Access width of each lane in bytes
    #[serde(default = "default_size")]
    pub size: u32,
    /// Address of each lane, `null` for inactive lanes.
    pub addrs: Vec<Option<address>>,
    /// Store data of each lane.
    ///
    /// Stores without data write the low address bytes of each lane.
    #[serde(default)]
    pub data: Option<Vec<Vec<u8>>>,
}

impl TraceRequest {
    pub fn build(self) -> Result<WarpRequest, RequestError> {
        let active_mask = warp::active_mask(
            self.addrs
                .iter()
                .enumerate()
                .filter_map(|(lane, addr)| addr.map(|_| lane)),
        );
        let data = match (self.kind, self.data) {
            (request::Kind::Store, None) => Some(
                self.addrs
                    .iter()
                    .map(|addr| match addr {
                        Some(addr) => (0..u64::from(self.size))
                            .map(|i| addr.wrapping_add(i) as u8)
                            .collect(),
                        None => Vec::new(),
                    })
                    .collect(),
            ),
            (_, data) => data,
        };
        request::Builder {
            warp_size: self.addrs.len(),
            active_mask,
            addrs: self.addrs.iter().map(|addr| addr.unwrap_or(0)).collect(),
            data,
            size: self.size,
            kind: self.kind,
            pc: self.pc,
            core_id: self.core_id,
            warp_id: self.warp_id,
        }
        .build()
    }
}

pub fn read(path: impl AsRef<Path>) -> eyre::Result<Vec<TraceRequest>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("failed to open trace {}", path.display()))?;
    let requests = serde_json::from_reader(std::io::BufReader::new(file))
        .wrap_err_with(|| format!("failed to parse trace {}", path.display()))?;
    Ok(requests)
}

/// Synthetic trace where lane `i` of request `r` accesses `(r * warp_size + i) * stride`.
#[must_use]
pub fn strided(
    num_requests: usize,
    warp_size: usize,
    stride: u64,
    size: u32,
    kind: request::Kind,
) -> Vec<TraceRequest> {
    (0..num_requests)
        .map(|r| {
            let base = (r * warp_size) as u64 * stride;
            TraceRequest {
                core_id: 0,
                warp_id: r,
                pc: 0,
                kind,
                size,
                addrs: (0..warp_size as u64)
                    .map(|lane| Some(base + lane * stride))
                    .collect(),
                data: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{strided, TraceRequest};
    use crate::request;
    use color_eyre::eyre;
    use pretty_assertions_sorted::assert_eq;

    #[test]
    fn test_parse_trace() -> eyre::Result<()> {
        let json = r#"[
            {"warp_id": 3, "pc": 16, "kind": "load", "addrs": [256, null, 264, 268]},
            {"warp_id": 4, "kind": "store", "size": 2, "addrs": [null, 2]}
        ]"#;
        let trace: Vec<TraceRequest> = serde_json::from_str(json)?;
        assert_eq!(trace.len(), 2);

        let load = trace[0].clone().build()?;
        assert_eq!(load.warp_size, 4);
        assert_eq!(load.active_lanes().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(load.size, 4);
        assert_eq!(load.pc, 16);

        let store = trace[1].clone().build()?;
        assert_eq!(store.kind, request::Kind::Store);
        assert_eq!(store.data(1), Some([2, 3].as_slice()));
        assert_eq!(store.data(0), None);
        Ok(())
    }

    #[test]
    fn test_strided() -> eyre::Result<()> {
        let trace = strided(2, 4, 8, 4, request::Kind::Load);
        let second = trace[1].clone().build()?;
        assert_eq!(
            second.active_addrs().collect::<Vec<_>>(),
            vec![(0, 32), (1, 40), (2, 48), (3, 56)]
        );
        Ok(())
    }
}
