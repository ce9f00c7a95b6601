//! Parser for per-interface counters in `/proc/net/dev` format
//!
//! Each interface line looks like `name: f0 f1 ... f15`. Only receive
//! bytes/packets/errs/drop (fields 0-3) and transmit bytes/packets/errs/drop
//! (fields 8-11) are kept.

use crate::models::Snapshot;

/// Command run inside the container to read interface counters
pub const NETDEV_COMMAND: &str = "cat /proc/net/dev";

/// Number of numeric fields on an interface line
const FIELD_COUNT: usize = 16;

/// (field position, metric suffix) pairs retained from each line
const RETAINED_FIELDS: [(usize, &str); 8] = [
    (0, "inbytes"),
    (1, "inpackets"),
    (2, "inerrs"),
    (3, "indrop"),
    (8, "outbytes"),
    (9, "outpackets"),
    (10, "outerrs"),
    (11, "outdrop"),
];

/// Parse probe output into `<iface>.<counter>` entries.
///
/// Lines without a colon, interfaces not starting with `prefix` and lines with
/// fewer than sixteen numeric fields are skipped.
pub fn parse_net_dev(content: &str, prefix: &str) -> Snapshot {
    let mut counters = Snapshot::new();

    for line in content.lines() {
        if let Some((name, fields)) = parse_line(line, prefix) {
            for (pos, suffix) in RETAINED_FIELDS {
                counters.insert(format!("{}.{}", name, suffix), fields[pos]);
            }
        }
    }

    counters
}

fn parse_line<'a>(line: &'a str, prefix: &str) -> Option<(&'a str, [u64; FIELD_COUNT])> {
    let (head, rest) = line.split_once(':')?;
    if head.is_empty() {
        return None;
    }

    let name = head.split_whitespace().next()?;
    if !name.starts_with(prefix) {
        return None;
    }

    let mut fields = [0u64; FIELD_COUNT];
    let mut values = rest.split_whitespace();
    for slot in fields.iter_mut() {
        *slot = values.next()?.parse().ok()?;
    }

    Some((name, fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_interface() {
        let out = parse_net_dev("vnbe1: 100 2 0 0 5 6 7 8 200 3 0 0 9 10 11 12", "vnbe");

        assert_eq!(out.len(), 8);
        assert_eq!(out["vnbe1.inbytes"], 100);
        assert_eq!(out["vnbe1.inpackets"], 2);
        assert_eq!(out["vnbe1.inerrs"], 0);
        assert_eq!(out["vnbe1.indrop"], 0);
        assert_eq!(out["vnbe1.outbytes"], 200);
        assert_eq!(out["vnbe1.outpackets"], 3);
        assert_eq!(out["vnbe1.outerrs"], 0);
        assert_eq!(out["vnbe1.outdrop"], 0);
    }

    #[test]
    fn test_skip_line_without_colon() {
        let out = parse_net_dev("vnbe1 100 2 0 0 5 6 7 8 200 3 0 0 9 10 11 12", "vnbe");
        assert!(out.is_empty());
    }

    #[test]
    fn test_skip_non_matching_prefix() {
        let out = parse_net_dev("eth0: 100 2 0 0 5 6 7 8 200 3 0 0 9 10 11 12", "vnbe");
        assert!(out.is_empty());
    }

    #[test]
    fn test_skip_leading_colon() {
        let out = parse_net_dev(": 100 2 0 0 5 6 7 8 200 3 0 0 9 10 11 12", "");
        assert!(out.is_empty());
    }

    #[test]
    fn test_skip_truncated_line() {
        let out = parse_net_dev("vnbe1: 100 2 0 0 5 6 7", "vnbe");
        assert!(out.is_empty());
    }

    #[test]
    fn test_full_proc_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:    1296      16    0    0    0     0          0         0     1296      16    0    0    0     0       0          0
vnbe10.1:  98765    120    1    2    0     0          0         0    54321      80    3    4    0     0       0          0
  eth0: 5000000    4000    0    0    0     0          0         0  3000000    2500    0    0    0     0       0          0
";
        let out = parse_net_dev(content, "vnbe");

        assert_eq!(out.len(), 8);
        assert_eq!(out["vnbe10.1.inbytes"], 98765);
        assert_eq!(out["vnbe10.1.inerrs"], 1);
        assert_eq!(out["vnbe10.1.indrop"], 2);
        assert_eq!(out["vnbe10.1.outbytes"], 54321);
        assert_eq!(out["vnbe10.1.outerrs"], 3);
        assert_eq!(out["vnbe10.1.outdrop"], 4);
    }
}
