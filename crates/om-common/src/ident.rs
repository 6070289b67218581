//! Stable identifier allocation for processes and replica-set members.
//!
//! Allocation is deterministic for a given snapshot of existing identifiers
//! and never collides with any identifier currently in scope, including those
//! of members not being modified this round.

/// Allocates the next process name under a replica-set/shard prefix.
///
/// Names follow `<prefix>_<n>`. The allocator picks `max(suffixes) + 1`
/// among existing names with this exact prefix, or `<prefix>_0` when none
/// exist. Names under other prefixes, and names whose suffix is not a plain
/// integer, are ignored.
///
/// An older revision of this tool instead filled the first gap of size >= 2
/// between consecutive suffixes. That policy is deliberately not kept:
/// gap-filling can re-issue a recently vacated name to a different host, and
/// max+1 satisfies the same uniqueness requirement.
pub fn next_process_name(existing: &[String], prefix: &str) -> String {
    let mut max: Option<u64> = None;
    for name in existing {
        let Some(rest) = name.strip_prefix(prefix) else {
            continue;
        };
        let Some(n) = rest.strip_prefix('_').and_then(|s| s.parse::<u64>().ok()) else {
            continue;
        };
        max = Some(max.map_or(n, |m| m.max(n)));
    }
    match max {
        Some(m) => format!("{}_{}", prefix, m + 1),
        None => format!("{}_0", prefix),
    }
}

/// Allocates the next member `_id` within a replica set: `max(existing) + 1`,
/// or `0` when the set is empty.
pub fn next_member_id(existing: &[i64]) -> i64 {
    existing.iter().max().map_or(0, |m| m + 1)
}
