//! Query planning and the search pipeline: strategy selection (prefix,
//! trigram, fuzzy-subsequence fallback), posting-list intersection,
//! candidate materialization, and bounded top-K scoring.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use serde::Serialize;

use crate::index::{Doc, DocId, Snapshot};
use crate::text::{
    extract_trigrams, is_subsequence, normalize_query, prefix1, prefix2, score_path, segments,
    ScoreParams,
};

/// Cap on the number of live documents the last-resort subsequence scan will
/// inspect when even the first-letter bucket comes up empty.
const MAX_SCAN_DOCS: usize = 5000;

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_MAX_CANDIDATES: usize = 10_000;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Knobs for a single search call. Zero means "use the default".
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchOptions {
    /// Maximum results returned (top-K). Default 100.
    pub limit: usize,
    /// Maximum candidates materialized per root snapshot before scoring.
    /// Bounds worst-case cost for very common trigrams. Default 10000.
    pub max_candidates: usize,
}

impl SearchOptions {
    pub(crate) fn limit_or_default(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIMIT
        } else {
            self.limit
        }
    }

    pub(crate) fn max_candidates_or_default(&self) -> usize {
        if self.max_candidates == 0 {
            DEFAULT_MAX_CANDIDATES
        } else {
            self.max_candidates
        }
    }
}

/// A scored search hit. Paths are root-relative, normalized.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub score: f32,
    pub is_dir: bool,
}

// ---------------------------------------------------------------------------
// Query plan
// ---------------------------------------------------------------------------

/// Parsed, normalized representation of a query.
///
/// The last token is treated as the basename target — users typically finish
/// typing the filename last — and earlier tokens are directory hints.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub normalized: String,
    /// Whitespace- and slash-separated non-empty substrings of `normalized`.
    pub tokens: Vec<String>,
    /// Deduplicated trigrams across all tokens of length >= 3; empty when
    /// the query is short.
    pub trigrams: Vec<u32>,
    /// True iff every token is shorter than 3 bytes.
    pub is_short: bool,
    pub has_slash: bool,
}

impl QueryPlan {
    pub fn new(query: &str) -> Self {
        let normalized = normalize_query(query);
        let has_slash = normalized.contains('/');
        let tokens: Vec<String> = normalized
            .split(['/', ' '])
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        let is_short = tokens.iter().all(|t| t.len() < 3);
        let trigrams = if is_short { Vec::new() } else { query_trigrams(&tokens) };
        Self { normalized, tokens, trigrams, is_short, has_slash }
    }

    /// The basename target: the last token, or empty without tokens.
    pub fn basename_query(&self) -> &str {
        self.tokens.last().map_or("", String::as_str)
    }

    /// Directory hints: every token except the last.
    pub fn dir_tokens(&self) -> &[String] {
        match self.tokens.len() {
            0 => &[],
            n => &self.tokens[..n - 1],
        }
    }

    /// Query bytes used for subsequence gating and proximity signals: the
    /// normalized query with token separators elided, since paths carry no
    /// spaces between the fragments a multi-token query names.
    fn match_bytes(&self) -> Cow<'_, [u8]> {
        if self.normalized.contains(' ') {
            Cow::Owned(self.normalized.bytes().filter(|&b| b != b' ').collect())
        } else {
            Cow::Borrowed(self.normalized.as_bytes())
        }
    }
}

fn query_trigrams(tokens: &[String]) -> Vec<u32> {
    let mut grams = Vec::new();
    for token in tokens {
        grams.extend(extract_trigrams(token.as_bytes()));
    }
    grams.sort_unstable();
    grams.dedup();
    grams
}

// ---------------------------------------------------------------------------
// Candidate retrieval
// ---------------------------------------------------------------------------

/// Run strategy selection and candidate materialization against one
/// snapshot: prefix buckets for short queries, trigram intersection
/// otherwise, and the fuzzy subsequence fallback when trigrams miss.
/// Tombstoned and out-of-range ids are skipped; at most `limit` candidates
/// are returned.
pub(crate) fn search_snapshot(plan: &QueryPlan, snap: &Snapshot, limit: usize) -> Vec<Doc> {
    if plan.normalized.is_empty() || snap.doc_count() == 0 {
        return Vec::new();
    }
    let ids = if plan.is_short {
        search_short(plan, snap)
    } else {
        let mut ids = search_trigrams(plan, snap);
        if ids.is_empty() && !plan.basename_query().is_empty() {
            ids = Cow::Owned(search_fuzzy_fallback(plan, snap));
        }
        ids
    };

    let mut candidates = Vec::with_capacity(ids.len().min(limit));
    for &id in ids.iter() {
        if snap.is_deleted(id) {
            continue;
        }
        let Some(doc) = snap.doc(id) else { continue };
        candidates.push(doc.clone());
        if candidates.len() >= limit {
            break;
        }
    }
    candidates
}

/// Sub-trigram queries: exact two-byte basename prefix bucket when the
/// basename target has two or more bytes, else the one-byte bucket.
fn search_short<'s>(plan: &QueryPlan, snap: &'s Snapshot) -> Cow<'s, [DocId]> {
    let basename_q = plan.basename_query().as_bytes();
    if basename_q.is_empty() {
        return Cow::Borrowed(&[]);
    }
    if basename_q.len() >= 2 {
        let ids = snap.prefix2_postings(prefix2(basename_q));
        if !ids.is_empty() {
            return Cow::Borrowed(ids);
        }
    }
    Cow::Borrowed(snap.prefix1_postings(prefix1(basename_q)))
}

/// Intersect the posting lists of every query trigram. Any absent or empty
/// list makes the whole intersection empty.
fn search_trigrams<'s>(plan: &QueryPlan, snap: &'s Snapshot) -> Cow<'s, [DocId]> {
    if plan.trigrams.is_empty() {
        return Cow::Borrowed(&[]);
    }
    let mut lists: Vec<&[DocId]> = Vec::with_capacity(plan.trigrams.len());
    for &gram in &plan.trigrams {
        let ids = snap.gram_postings(gram);
        if ids.is_empty() {
            return Cow::Borrowed(&[]);
        }
        lists.push(ids);
    }
    if lists.len() == 1 {
        Cow::Borrowed(lists[0])
    } else {
        Cow::Owned(intersect_all(lists))
    }
}

/// Trigram strategy found nothing: try the first-letter bucket of the
/// basename target filtered by path subsequence (this is what still finds
/// `handler.go` when the user types `hndlr`), then fall back to a capped
/// scan of the earliest live documents for when even the first letter was
/// mistyped.
fn search_fuzzy_fallback(plan: &QueryPlan, snap: &Snapshot) -> Vec<DocId> {
    let basename_q = plan.basename_query().as_bytes();
    if basename_q.is_empty() {
        return Vec::new();
    }
    let bucket = snap.prefix1_postings(prefix1(basename_q));
    if bucket.is_empty() {
        return subsequence_scan(basename_q, snap, MAX_SCAN_DOCS);
    }
    let mut ids = Vec::new();
    for &id in bucket {
        if snap.is_deleted(id) {
            continue;
        }
        let Some(doc) = snap.doc(id) else { continue };
        if is_subsequence(doc.path.as_bytes(), basename_q) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return subsequence_scan(basename_q, snap, MAX_SCAN_DOCS);
    }
    ids
}

fn subsequence_scan(basename_q: &[u8], snap: &Snapshot, max_check: usize) -> Vec<DocId> {
    let mut ids = Vec::new();
    let mut checked = 0;
    for id in 0..snap.doc_count() as DocId {
        if checked >= max_check {
            break;
        }
        if snap.is_deleted(id) {
            continue;
        }
        checked += 1;
        let Some(doc) = snap.doc(id) else { continue };
        if is_subsequence(doc.path.as_bytes(), basename_q) {
            ids.push(id);
        }
    }
    ids
}

// ---------------------------------------------------------------------------
// Posting-list intersection
// ---------------------------------------------------------------------------

fn intersect_sorted(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let mut out = Vec::new();
    let (mut ai, mut bi) = (0, 0);
    while ai < a.len() && bi < b.len() {
        match a[ai].cmp(&b[bi]) {
            std::cmp::Ordering::Less => ai += 1,
            std::cmp::Ordering::Greater => bi += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[ai]);
                ai += 1;
                bi += 1;
            }
        }
    }
    out
}

/// Merge-intersect ascending lists, shortest first, bailing out as soon as
/// the running result drains.
fn intersect_all(mut lists: Vec<&[DocId]>) -> Vec<DocId> {
    lists.sort_unstable_by_key(|l| l.len());
    let mut result = lists[0].to_vec();
    for list in &lists[1..] {
        if result.is_empty() {
            break;
        }
        result = intersect_sorted(&result, list);
    }
    result
}

// ---------------------------------------------------------------------------
// Scoring and top-K selection
// ---------------------------------------------------------------------------

/// Newtype ordering search results by score alone, totally (NaN-safe), so
/// they can live in a heap.
struct Ranked(SearchResult);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.0.score.total_cmp(&other.0.score).is_eq()
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.score.total_cmp(&other.0.score)
    }
}

/// Score every candidate and keep the best `top_k`, in descending score
/// order. Candidates failing the subsequence gate are dropped.
pub(crate) fn merge_and_score(
    candidates: &[Doc],
    plan: &QueryPlan,
    params: &ScoreParams,
    top_k: usize,
) -> Vec<SearchResult> {
    if top_k == 0 || candidates.is_empty() {
        return Vec::new();
    }
    let query = plan.match_bytes();
    let dir_tokens = plan.dir_tokens();

    let scored: Vec<SearchResult> = candidates
        .par_iter()
        .filter_map(|doc| {
            let path = doc.path.as_bytes();
            let mut score = score_path(
                path,
                doc.base_off as usize,
                doc.base_len as usize,
                doc.depth,
                &query,
                &plan.tokens,
                params,
            );
            if score <= 0.0 {
                return None;
            }
            // The dir-token bonus is applied here rather than in score_path:
            // it depends on the plan's basename/directory token split, which
            // the raw query bytes do not carry.
            for token in dir_tokens {
                if segments(path).any(|seg| seg.eq_ignore_ascii_case(token.as_bytes())) {
                    score += params.dir_token_hit;
                }
            }
            Some(SearchResult {
                path: doc.path.to_string(),
                score,
                is_dir: doc.flags.is_dir(),
            })
        })
        .collect();

    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(top_k + 1);
    for result in scored {
        if heap.len() < top_k {
            heap.push(Reverse(Ranked(result)));
        } else if let Some(Reverse(weakest)) = heap.peek() {
            if result.score > weakest.0.score {
                heap.pop();
                heap.push(Reverse(Ranked(result)));
            }
        }
    }
    let mut results: Vec<SearchResult> = heap.into_iter().map(|Reverse(Ranked(r))| r).collect();
    results.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Full pipeline against a single snapshot: retrieve candidates, score, and
/// rank. The engine uses the same pieces but pools candidates across roots
/// before ranking.
pub fn search(plan: &QueryPlan, snap: &Snapshot, opts: SearchOptions) -> Vec<SearchResult> {
    let candidates = search_snapshot(plan, snap, opts.max_candidates_or_default());
    merge_and_score(&candidates, plan, &ScoreParams::default(), opts.limit_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FileFlags, Index};
    use crate::text::pack_trigram;

    fn make_snapshot(paths: &[&str]) -> Snapshot {
        let mut idx = Index::new();
        for p in paths {
            idx.add(p, FileFlags::FILE);
        }
        idx.snapshot()
    }

    fn paths_of(candidates: &[Doc]) -> Vec<&str> {
        candidates.iter().map(|c| c.path.as_ref()).collect()
    }

    #[test]
    fn plan_parsing() {
        struct Case {
            query: &'static str,
            normalized: &'static str,
            is_short: bool,
            has_slash: bool,
            basename: &'static str,
            tokens: &'static [&'static str],
            dir_tokens: &'static [&'static str],
        }
        let cases = [
            Case {
                query: "foo",
                normalized: "foo",
                is_short: false,
                has_slash: false,
                basename: "foo",
                tokens: &["foo"],
                dir_tokens: &[],
            },
            Case {
                query: "foo bar",
                normalized: "foo bar",
                is_short: false,
                has_slash: false,
                basename: "bar",
                tokens: &["foo", "bar"],
                dir_tokens: &["foo"],
            },
            Case {
                query: "internal/foo",
                normalized: "internal/foo",
                is_short: false,
                has_slash: true,
                basename: "foo",
                tokens: &["internal", "foo"],
                dir_tokens: &["internal"],
            },
            Case {
                query: "a",
                normalized: "a",
                is_short: true,
                has_slash: false,
                basename: "a",
                tokens: &["a"],
                dir_tokens: &[],
            },
            Case {
                query: "ab",
                normalized: "ab",
                is_short: true,
                has_slash: false,
                basename: "ab",
                tokens: &["ab"],
                dir_tokens: &[],
            },
            Case {
                query: ".go",
                normalized: ".go",
                is_short: false,
                has_slash: false,
                basename: ".go",
                tokens: &[".go"],
                dir_tokens: &[],
            },
            Case {
                query: "FOO",
                normalized: "foo",
                is_short: false,
                has_slash: false,
                basename: "foo",
                tokens: &["foo"],
                dir_tokens: &[],
            },
            Case {
                query: "",
                normalized: "",
                is_short: true,
                has_slash: false,
                basename: "",
                tokens: &[],
                dir_tokens: &[],
            },
        ];
        for case in cases {
            let plan = QueryPlan::new(case.query);
            assert_eq!(plan.normalized, case.normalized, "query {:?}", case.query);
            assert_eq!(plan.is_short, case.is_short, "query {:?}", case.query);
            assert_eq!(plan.has_slash, case.has_slash, "query {:?}", case.query);
            assert_eq!(plan.basename_query(), case.basename, "query {:?}", case.query);
            assert_eq!(plan.tokens, case.tokens, "query {:?}", case.query);
            assert_eq!(plan.dir_tokens(), case.dir_tokens, "query {:?}", case.query);
        }
    }

    #[test]
    fn plan_trigrams() {
        let plan = QueryPlan::new("abc");
        assert_eq!(plan.trigrams, vec![pack_trigram(b'a', b'b', b'c')]);

        // Short queries never carry trigrams.
        assert!(QueryPlan::new("ab").trigrams.is_empty());
        assert!(QueryPlan::new("a").trigrams.is_empty());

        // Shortness is decided over all tokens.
        assert!(QueryPlan::new("ab cd").is_short);
        assert!(!QueryPlan::new("ab cde").is_short);
    }

    #[test]
    fn trigram_match_finds_candidates() {
        let snap = make_snapshot(&["src/handler.go", "src/router.go", "lib/utils.go"]);
        let cands = search_snapshot(&QueryPlan::new("handler"), &snap, 100);
        assert!(paths_of(&cands).contains(&"src/handler.go"), "got {:?}", paths_of(&cands));
    }

    #[test]
    fn short_query_uses_prefix_buckets() {
        let snap = make_snapshot(&["foo.go", "bar.go", "fab.go"]);
        let cands = search_snapshot(&QueryPlan::new("fo"), &snap, 100);
        assert!(paths_of(&cands).contains(&"foo.go"), "got {:?}", paths_of(&cands));

        let cands = search_snapshot(&QueryPlan::new("f"), &snap, 100);
        assert!(paths_of(&cands).contains(&"fab.go"));
    }

    #[test]
    fn fuzzy_fallback_finds_elided_spelling() {
        let snap = make_snapshot(&["src/handler.go", "src/router.go", "lib/utils.go"]);
        let cands = search_snapshot(&QueryPlan::new("hndlr"), &snap, 100);
        assert!(paths_of(&cands).contains(&"src/handler.go"), "got {:?}", paths_of(&cands));
    }

    #[test]
    fn fuzzy_fallback_scans_when_first_letter_misses() {
        // "ylophn" defeats the trigram intersection ("phn" appears nowhere)
        // and no basename starts with 'y', so only the capped scan of early
        // documents can still surface the match.
        let snap = make_snapshot(&["src/xylophone.go", "lib/extra.go"]);
        let cands = search_snapshot(&QueryPlan::new("ylophn"), &snap, 100);
        assert!(paths_of(&cands).contains(&"src/xylophone.go"), "got {:?}", paths_of(&cands));
    }

    #[test]
    fn empty_query_returns_no_candidates() {
        let snap = make_snapshot(&["foo.go"]);
        assert!(search_snapshot(&QueryPlan::new(""), &snap, 100).is_empty());
        assert!(search_snapshot(&QueryPlan::new("   "), &snap, 100).is_empty());
    }

    #[test]
    fn deleted_docs_never_surface() {
        let mut idx = Index::new();
        idx.add("handler.go", FileFlags::FILE);
        idx.remove("handler.go");
        let snap = idx.snapshot();
        let cands = search_snapshot(&QueryPlan::new("handler"), &snap, 100);
        assert!(cands.is_empty(), "got {:?}", paths_of(&cands));
    }

    #[test]
    fn candidate_limit_is_respected() {
        let paths: Vec<String> = (0..50).map(|i| format!("handler_{i}.go")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let snap = make_snapshot(&refs);
        let cands = search_snapshot(&QueryPlan::new("handler"), &snap, 3);
        assert_eq!(cands.len(), 3);
    }

    #[test]
    fn intersect_sorted_cases() {
        let cases: &[(&[DocId], &[DocId], &[DocId])] = &[
            (&[], &[], &[]),
            (&[], &[1, 2], &[]),
            (&[1, 2], &[], &[]),
            (&[1, 3, 5], &[2, 4, 6], &[]),
            (&[1, 2, 3], &[1, 2, 3], &[1, 2, 3]),
            (&[1, 2, 3, 5], &[2, 4, 5], &[2, 5]),
            (&[1, 2, 3], &[2], &[2]),
        ];
        for (a, b, want) in cases {
            assert_eq!(intersect_sorted(a, b), *want, "intersect({a:?}, {b:?})");
        }
    }

    #[test]
    fn intersect_all_cases() {
        assert_eq!(intersect_all(vec![&[1, 2, 3]]), vec![1, 2, 3]);
        assert_eq!(
            intersect_all(vec![&[1, 2, 3, 4, 5], &[2, 3, 5], &[3, 5, 7]]),
            vec![3, 5]
        );
        assert!(intersect_all(vec![&[1, 2], &[3, 4]]).is_empty());
    }

    #[test]
    fn results_sorted_descending() {
        let snap = make_snapshot(&["a/b/c/d/e/foo", "src/foo", "foo"]);
        let plan = QueryPlan::new("foo");
        let results = search(&plan, &snap, SearchOptions::default());
        assert!(!results.is_empty());
        for pair in results.windows(2) {
            assert!(
                pair[0].score >= pair[1].score,
                "results out of order: {:?}",
                results.iter().map(|r| (r.path.clone(), r.score)).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn top_k_bounds_result_count() {
        let paths: Vec<String> = (0..20).map(|i| format!("f{i}")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let snap = make_snapshot(&refs);
        let plan = QueryPlan::new("f");
        let results = search(&plan, &snap, SearchOptions { limit: 5, max_candidates: 0 });
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn zero_top_k_yields_nothing() {
        let snap = make_snapshot(&["foo"]);
        let plan = QueryPlan::new("foo");
        let cands = search_snapshot(&plan, &snap, 100);
        assert!(merge_and_score(&cands, &plan, &ScoreParams::default(), 0).is_empty());
    }

    #[test]
    fn non_matching_candidates_are_dropped() {
        let snap = make_snapshot(&["abc", "def"]);
        let plan = QueryPlan::new("xyz");
        let cands = search_snapshot(&plan, &snap, 100);
        assert!(merge_and_score(&cands, &plan, &ScoreParams::default(), 10).is_empty());
    }

    #[test]
    fn directory_results_carry_is_dir() {
        let mut idx = Index::new();
        idx.add("foo", FileFlags::DIR);
        let snap = idx.snapshot();
        let plan = QueryPlan::new("foo");
        let results = search(&plan, &snap, SearchOptions::default());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_dir);
    }

    // End-to-end ranking scenarios over the full single-snapshot pipeline.

    #[test]
    fn scenario_exact_basename() {
        let snap = make_snapshot(&["src/main.go", "src/handler.go", "README.md"]);
        let results = search(&QueryPlan::new("main.go"), &snap, SearchOptions::default());
        assert_eq!(results[0].path, "src/main.go");
    }

    #[test]
    fn scenario_fuzzy_basename() {
        let snap = make_snapshot(&[
            "src/controllers/user_handler.go",
            "src/models/user.go",
            "docs/api.md",
        ]);
        let results = search(&QueryPlan::new("hndlr"), &snap, SearchOptions::default());
        assert_eq!(results[0].path, "src/controllers/user_handler.go");
    }

    #[test]
    fn scenario_depth_penalty() {
        let snap = make_snapshot(&["src/foo.go", "a/b/c/d/e/foo.go"]);
        let results = search(&QueryPlan::new("foo"), &snap, SearchOptions::default());
        assert_eq!(results[0].path, "src/foo.go");
        assert_eq!(results.len(), 2);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn scenario_directory_token_hint() {
        let snap = make_snapshot(&["src/controllers/user.go", "other/user.go"]);
        let results = search(&QueryPlan::new("controllers user"), &snap, SearchOptions::default());
        assert!(!results.is_empty());
        assert_eq!(results[0].path, "src/controllers/user.go");
    }
}
