use chaintask_core::types::{LogIdentity, RawLog};

/// Logs in `logs` that match no entry of `ignore`, in their original order.
///
/// An ignore entry without an index matches every log of its transaction.
pub fn diff(logs: &[RawLog], ignore: &[LogIdentity]) -> Vec<RawLog> {
    logs.iter()
        .filter(|log| {
            let id = log.identity();
            !ignore.iter().any(|i| i.matches(&id))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(tx: &str, index: u32) -> RawLog {
        RawLog {
            address: "0xabc".into(),
            topics: vec![],
            data: "0x".into(),
            block_number: "0x64".into(),
            block_hash: String::new(),
            tx_hash: tx.into(),
            log_index: format!("0x{index:x}"),
            removed: None,
        }
    }

    #[test]
    fn drops_ignored_keeps_order() {
        let logs = vec![log("0xa", 0), log("0xb", 2), log("0xc", 1)];
        let out = diff(&logs, &[LogIdentity::new("0xa", 0)]);
        let txs: Vec<_> = out.iter().map(|l| l.tx_hash.as_str()).collect();
        assert_eq!(txs, vec!["0xb", "0xc"]);
    }

    #[test]
    fn coarse_entry_covers_whole_tx() {
        let logs = vec![log("0xa", 0), log("0xa", 1), log("0xb", 0)];
        let out = diff(&logs, &[LogIdentity::tx("0xa")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tx_hash, "0xb");
    }

    #[test]
    fn index_zero_is_distinct() {
        let logs = vec![log("0xa", 0), log("0xa", 1)];
        let out = diff(&logs, &[LogIdentity::new("0xa", 1)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].log_index_u32(), 0);
    }
}
