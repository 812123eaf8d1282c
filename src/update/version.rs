/// Version assumed when no local record exists yet
pub const BASELINE_VERSION: &str = "v0.0.0";

/// Outcome of comparing a local version against the latest published one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Newer,
    SameOrOlder,
}

/// Split a version string (with or without 'v' prefix) into numeric segments.
/// Returns None if any segment is not a non-negative integer.
fn parse_segments(version: &str) -> Option<Vec<u64>> {
    let trimmed = version.trim();
    let cleaned = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    cleaned
        .split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect()
}

/// Compare `latest` against `local` segment by segment, padding the shorter
/// one with zeros. Anything unparsable declines the update.
pub fn compare(local: &str, latest: &str) -> Comparison {
    let (Some(local), Some(latest)) = (parse_segments(local), parse_segments(latest)) else {
        return Comparison::SameOrOlder;
    };

    let len = local.len().max(latest.len());
    for i in 0..len {
        let l = local.get(i).copied().unwrap_or(0);
        let r = latest.get(i).copied().unwrap_or(0);
        if r != l {
            return if r > l {
                Comparison::Newer
            } else {
                Comparison::SameOrOlder
            };
        }
    }

    Comparison::SameOrOlder
}

/// Returns true if `latest` is strictly newer than `local`
pub fn is_newer(local: &str, latest: &str) -> bool {
    compare(local, latest) == Comparison::Newer
}
