//! Byte-level text primitives shared by the index and the query pipeline:
//! normalization, trigram and prefix extraction, subsequence predicates, and
//! path scoring.
//!
//! Everything here is ASCII-case-insensitive. Non-ASCII bytes pass through
//! untouched and compare byte-for-byte, which is the right trade for the
//! identifier-style paths this library indexes.

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Canonicalize a raw query: backslashes become slashes, ASCII letters are
/// lowercased, space runs collapse to one space, trailing space is stripped.
/// Slashes are preserved — they separate directory tokens from the basename
/// token.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut prev_space = true;
    for mut c in query.chars() {
        if c == '\\' {
            c = '/';
        }
        c = c.to_ascii_lowercase();
        if c == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        out.push(c);
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Canonicalize a path: backslashes become slashes, ASCII letters are
/// lowercased, slash runs collapse to one slash. Idempotent.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for mut c in path.chars() {
        if c == '\\' {
            c = '/';
        }
        c = c.to_ascii_lowercase();
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Locate the basename of a normalized path: one trailing slash is ignored,
/// then everything after the previous slash. Returns (offset, length).
pub(crate) fn extract_basename(path: &[u8]) -> (usize, usize) {
    let mut end = path.len();
    if end > 0 && path[end - 1] == b'/' {
        end -= 1;
    }
    if end == 0 {
        return (0, 0);
    }
    let start = path[..end].iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
    (start, end - start)
}

/// Non-empty slices between `/` separators, in order.
pub(crate) fn segments(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|&b| b == b'/').filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Trigrams and prefixes
// ---------------------------------------------------------------------------

/// Pack three bytes into a lowercased 24-bit trigram key.
pub(crate) fn pack_trigram(a: u8, b: u8, c: u8) -> u32 {
    (a.to_ascii_lowercase() as u32) << 16
        | (b.to_ascii_lowercase() as u32) << 8
        | c.to_ascii_lowercase() as u32
}

/// Distinct lowercased trigrams of `s`, sorted ascending. A document matches
/// a query only if every query trigram appears in the document, so these are
/// the primary posting keys.
pub(crate) fn extract_trigrams(s: &[u8]) -> Vec<u32> {
    if s.len() < 3 {
        return Vec::new();
    }
    let mut grams: Vec<u32> = s.windows(3).map(|w| pack_trigram(w[0], w[1], w[2])).collect();
    grams.sort_unstable();
    grams.dedup();
    grams
}

/// Lowercased first byte of a basename, or 0 when empty.
pub(crate) fn prefix1(name: &[u8]) -> u8 {
    name.first().map_or(0, |b| b.to_ascii_lowercase())
}

/// First two lowercased bytes of a basename packed into 16 bits; the low
/// byte is zero for single-byte names.
pub(crate) fn prefix2(name: &[u8]) -> u16 {
    match name {
        [] => 0,
        [a] => (a.to_ascii_lowercase() as u16) << 8,
        [a, b, ..] => (a.to_ascii_lowercase() as u16) << 8 | b.to_ascii_lowercase() as u16,
    }
}

// ---------------------------------------------------------------------------
// Match predicates
// ---------------------------------------------------------------------------

/// Whether the bytes of `needle` appear in order (not necessarily adjacent)
/// in `haystack`, ignoring ASCII case. An empty needle always matches.
pub(crate) fn is_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    let mut ni = 0;
    for &hb in haystack {
        if hb.eq_ignore_ascii_case(&needle[ni]) {
            ni += 1;
            if ni == needle.len() {
                return true;
            }
        }
    }
    false
}

/// Length of the longest run of consecutive haystack positions that match
/// successive needle bytes. A broken run restarts immediately when the
/// current byte matches the first needle byte.
pub(crate) fn longest_contiguous_match(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.is_empty() {
        return 0;
    }
    let mut best = 0;
    let mut run = 0;
    let mut ni = 0;
    for &hb in haystack {
        if ni < needle.len() && hb.eq_ignore_ascii_case(&needle[ni]) {
            run += 1;
            ni += 1;
        } else if hb.eq_ignore_ascii_case(&needle[0]) {
            run = 1;
            ni = 1;
        } else {
            run = 0;
            ni = 0;
        }
        best = best.max(run);
    }
    best
}

/// Bytes that delimit words within a path.
pub(crate) fn is_boundary(b: u8) -> bool {
    matches!(b, b'/' | b'.' | b'_' | b'-')
}

/// Count query bytes consumed in order where each lands at position 0 or
/// right after a boundary byte. Rewards delimited and abbreviated matches
/// (`uh` against `user_handler.go`).
pub(crate) fn count_boundary_hits(path: &[u8], query: &[u8]) -> usize {
    if query.is_empty() || path.is_empty() {
        return 0;
    }
    let mut hits = 0;
    let mut qi = 0;
    for (pi, &pb) in path.iter().enumerate() {
        if qi >= query.len() {
            break;
        }
        let at_boundary = pi == 0 || is_boundary(path[pi - 1]);
        if at_boundary && pb.eq_ignore_ascii_case(&query[qi]) {
            hits += 1;
            qi += 1;
        }
    }
    hits
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Weights for each relevance signal. The defaults are tuned so exact and
/// prefixed basename matches dominate while path structure and proximity
/// still matter at the margin.
#[derive(Clone, Copy, Debug)]
pub struct ScoreParams {
    pub basename_match: f32,
    pub basename_prefix: f32,
    pub exact_segment: f32,
    pub boundary_hit: f32,
    pub contiguous_run: f32,
    pub dir_token_hit: f32,
    pub depth_penalty: f32,
    pub length_penalty: f32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            basename_match: 6.0,
            basename_prefix: 3.5,
            exact_segment: 2.5,
            boundary_hit: 1.8,
            contiguous_run: 1.2,
            dir_token_hit: 0.4,
            depth_penalty: 0.08,
            length_penalty: 0.01,
        }
    }
}

/// Relevance score for a candidate path against a normalized query.
///
/// Combines basename containment, basename prefix, whole-segment equality,
/// word-boundary hits, and the longest contiguous run, minus depth and
/// length penalties. Returns 0 when the query is not a subsequence of the
/// path — such candidates do not match at all.
pub fn score_path(
    path: &[u8],
    base_off: usize,
    base_len: usize,
    depth: u32,
    query: &[u8],
    tokens: &[String],
    params: &ScoreParams,
) -> f32 {
    if !is_subsequence(path, query) {
        return 0.0;
    }
    let mut score = 0.0f32;
    let basename = &path[base_off..base_off + base_len];
    if is_subsequence(basename, query) {
        score += params.basename_match;
    }
    if basename.len() >= query.len() && basename[..query.len()].eq_ignore_ascii_case(query) {
        score += params.basename_prefix;
    }
    for token in tokens {
        if segments(path).any(|seg| seg.eq_ignore_ascii_case(token.as_bytes())) {
            score += params.exact_segment;
        }
    }
    score += count_boundary_hits(path, query) as f32 * params.boundary_hit;
    score += longest_contiguous_match(path, query) as f32 * params.contiguous_run;
    score -= depth as f32 * params.depth_penalty;
    score -= path.len() as f32 * params.length_penalty;
    score
}
