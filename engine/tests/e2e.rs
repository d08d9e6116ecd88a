//! End-to-end scenarios: index a real directory on disk, then search,
//! re-index incrementally and research against the resulting store.
//!
//! Embeddings stay disabled so the tests run hermetically; the lexical path
//! is exercised end-to-end and the dense path degrades to it by design.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use codescout_engine::CastChunker;
use codescout_engine::CastConfig;
use codescout_engine::Chunk;
use codescout_engine::ChunkType;
use codescout_engine::Config;
use codescout_engine::IndexBackend;
use codescout_engine::IndexingCoordinator;
use codescout_engine::Language;
use codescout_engine::MultiHopResearcher;
use codescout_engine::ParseEngine;
use codescout_engine::ResearchOptions;
use codescout_engine::SearchEngine;
use codescout_engine::SearchMode;
use codescout_engine::cache::ChunkIndex;
use codescout_engine::cache::HashCache;
use codescout_engine::config::SearchSettings;
use codescout_engine::storage::TierOptions;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn backend_at(dir: &Path) -> Arc<IndexBackend> {
    Arc::new(IndexBackend::create(&dir.join(".codescout/index.db"), None, 0).unwrap())
}

/// Two one-function files, batch size 1: exactly two chunks land in the
/// store and lexical search pinpoints the right file.
#[tokio::test]
async fn two_files_index_and_lexical_search() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def alpha(): return 1\n");
    write(dir.path(), "b.py", "def beta(): return 2\n");

    let backend = backend_at(dir.path());
    let mut config = Config::default();
    config.indexing.chunk_batch_size = 1;
    let coordinator = IndexingCoordinator::new(config, backend.clone());

    let stats = coordinator
        .index_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.total_chunks, 2);

    let store_stats = backend.stats().await.unwrap();
    assert_eq!(store_stats.total_chunks, 2);

    let results = backend
        .search_lexical("alpha", 1, &TierOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].chunk.file_path.ends_with("a.py"));
}

/// A 50-line concept under a 100-char limit splits into several chunks, all
/// within the bound, with contiguous line ranges covering 1..50.
#[test]
fn oversized_concept_splits_with_full_line_coverage() {
    let engine = Arc::new(ParseEngine::new());
    let chunker = CastChunker::new(
        CastConfig {
            max_chunk_size: 100,
            min_chunk_size: 20,
            merge_threshold: 0.8,
            greedy_merge: false,
        },
        engine,
    );

    // One concept spanning 50 lines (a single long function body)
    let body: String = (0..49).map(|i| format!("    x{i} = {i}")).collect::<Vec<_>>().join("\n");
    let source = format!("def big():\n{body}\n");
    let chunks = chunker.chunk_source(Path::new("big.py"), &source, Language::Python);

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.size() <= 100, "chunk of {} chars", chunk.size());
    }
    assert_eq!(chunks.first().unwrap().start_line, 1);
    assert_eq!(chunks.last().unwrap().end_line, 50);
    for pair in chunks.windows(2) {
        assert!(pair[0].end_line + 1 >= pair[1].start_line);
    }
}

/// Two adjacent 5-line functions merge into one chunk named "a+b" spanning
/// lines 1..10.
#[test]
fn adjacent_small_functions_merge() {
    let engine = Arc::new(ParseEngine::new());
    let chunker = CastChunker::new(
        CastConfig {
            max_chunk_size: 500,
            min_chunk_size: 20,
            merge_threshold: 0.9,
            greedy_merge: true,
        },
        engine,
    );

    let source = "def first():\n    a = 1\n    b = 2\n    c = 3\n    return a\ndef second():\n    d = 4\n    e = 5\n    f = 6\n    return d\n";
    let chunks = chunker.chunk_source(Path::new("pair.py"), source, Language::Python);

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].symbol.contains('+'));
    assert_eq!(chunks[0].start_line, 1);
    assert_eq!(chunks[0].end_line, 10);
}

/// Modify one file between incremental runs: its previous ids go stale, the
/// untouched file keeps its ids, and the status summary reports staleness.
#[tokio::test]
async fn incremental_reindex_tracks_staleness() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def alpha():\n    return 1\n");
    write(dir.path(), "b.py", "def beta():\n    return 2\n");

    let backend = backend_at(dir.path());
    let coordinator = IndexingCoordinator::new(Config::default(), backend.clone());
    let mut hash_cache = HashCache::load(&dir.path().join(".codescout/cache/file_hashes.json"));
    let mut chunk_index = ChunkIndex::load(&dir.path().join(".codescout/chunk_index.json"));

    coordinator
        .index_directory_incremental(
            dir.path(),
            &mut hash_cache,
            &mut chunk_index,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let b_ids: Vec<String> = hash_cache
        .chunk_ids(&dir.path().join("b.py"))
        .to_vec();
    assert!(!b_ids.is_empty());

    // Shift alpha onto different lines so its previous span is superseded
    write(dir.path(), "a.py", "# moved\n\n\ndef alpha():\n    return 1\n");
    let stats = coordinator
        .index_directory_incremental(
            dir.path(),
            &mut hash_cache,
            &mut chunk_index,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(stats.changed_files, 1);
    assert_eq!(stats.skipped_files, 1);

    let summary = chunk_index.staleness_summary();
    assert!(summary.stale > 0, "expected stale chunks, got {summary:?}");
    assert_eq!(summary.valid + summary.stale, summary.total);

    // b.py untouched: same ids still valid
    let b_ids_after: Vec<String> = hash_cache
        .chunk_ids(&dir.path().join("b.py"))
        .to_vec();
    assert_eq!(b_ids, b_ids_after);
    let valid = chunk_index.valid_chunks();
    for id in &b_ids_after {
        assert!(valid.contains(id));
    }
}

/// Full re-index and incremental re-index from a clean state agree on the
/// set of valid chunk ids.
#[tokio::test]
async fn incremental_from_clean_state_matches_full_reindex() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.py", "def xray():\n    return 1\n");
    write(dir.path(), "y.py", "def yankee():\n    return 2\n");

    // Full index
    let full_dir = tempfile::tempdir().unwrap();
    let full_backend =
        Arc::new(IndexBackend::create(&full_dir.path().join("index.db"), None, 0).unwrap());
    let coordinator = IndexingCoordinator::new(Config::default(), full_backend.clone());
    coordinator
        .index_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    let full_uris = all_uris(&full_backend).await;

    // Incremental from clean state
    let inc_dir = tempfile::tempdir().unwrap();
    let inc_backend =
        Arc::new(IndexBackend::create(&inc_dir.path().join("index.db"), None, 0).unwrap());
    let coordinator = IndexingCoordinator::new(Config::default(), inc_backend.clone());
    let mut hash_cache = HashCache::load(&inc_dir.path().join("file_hashes.json"));
    let mut chunk_index = ChunkIndex::load(&inc_dir.path().join("chunk_index.json"));
    coordinator
        .index_directory_incremental(
            dir.path(),
            &mut hash_cache,
            &mut chunk_index,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let inc_uris = all_uris(&inc_backend).await;

    assert_eq!(full_uris, inc_uris);
    assert_eq!(chunk_index.valid_chunks().len(), inc_uris.len());
}

async fn all_uris(backend: &Arc<IndexBackend>) -> Vec<String> {
    let mut uris = Vec::new();
    // Ids are assigned from 1 upward; stats gives the count
    let total = backend.stats().await.unwrap().total_chunks;
    for id in 1..=total {
        if let Some(chunk) = backend.get_chunk(id).await.unwrap() {
            uris.push(chunk.uri());
        }
    }
    uris.sort();
    uris
}

/// The hybrid ranking is a pure function of the two input rankings.
#[tokio::test]
async fn hybrid_search_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "auth.py",
        "def authenticate(user):\n    return check_password(user)\n\ndef check_password(user):\n    return user.ok\n",
    );
    write(
        dir.path(),
        "session.py",
        "def authenticate_session(token):\n    return token\n",
    );

    let backend = backend_at(dir.path());
    let coordinator = IndexingCoordinator::new(Config::default(), backend.clone());
    coordinator
        .index_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    let opts = codescout_engine::HybridOptions {
        vector_weight: 0.7,
        ..Default::default()
    };
    let first = backend.search_hybrid("authenticate", 5, &opts).await.unwrap();
    assert!(!first.is_empty());

    for _ in 0..5 {
        let again = backend.search_hybrid("authenticate", 5, &opts).await.unwrap();
        let ids: Vec<_> = again.iter().map(|r| r.chunk.id).collect();
        let first_ids: Vec<_> = first.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, first_ids);
    }
}

/// Research follows load_config -> read_file -> parse_json and reports
/// load_config as the only entry point.
#[tokio::test]
async fn research_discovers_call_chain_and_entry_point() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "app/config.py",
        "def load_config():\n    raw = read_file('settings.json')\n    return raw\n",
    );
    write(
        dir.path(),
        "app/io.py",
        "def read_file(path):\n    text = open(path).read()\n    return parse_json(text)\n",
    );
    write(
        dir.path(),
        "app/jsonutil.py",
        "def parse_json(text):\n    import json\n    return json.JSONDecoder().decode(text)\n",
    );

    let backend = backend_at(dir.path());
    let coordinator = IndexingCoordinator::new(Config::default(), backend.clone());
    coordinator
        .index_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    let researcher = MultiHopResearcher::new(
        backend,
        ResearchOptions {
            max_hops: 2,
            max_results_per_hop: 10,
            max_total_chunks: 50,
        },
    );
    let result = researcher
        .research("How does configuration loading work?", &CancellationToken::new())
        .await
        .unwrap();

    let symbols: Vec<&str> = result.chunks.iter().map(|c| c.symbol.as_str()).collect();
    assert!(symbols.contains(&"load_config"), "got {symbols:?}");
    assert!(symbols.contains(&"read_file"), "got {symbols:?}");
    assert!(symbols.contains(&"parse_json"), "got {symbols:?}");

    let entry_points = MultiHopResearcher::get_entry_points(&result.relationships);
    assert!(entry_points.contains(&"load_config".to_string()), "got {entry_points:?}");
}

/// The search engine façade applies the staleness filter end-to-end.
#[tokio::test]
async fn search_facade_filters_superseded_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "old.py", "def shifting():\n    return 'v1'\n");

    let backend = backend_at(dir.path());
    let coordinator = IndexingCoordinator::new(Config::default(), backend.clone());
    let mut hash_cache = HashCache::load(&dir.path().join(".codescout/cache/file_hashes.json"));
    let mut chunk_index = ChunkIndex::load(&dir.path().join(".codescout/chunk_index.json"));

    coordinator
        .index_directory_incremental(
            dir.path(),
            &mut hash_cache,
            &mut chunk_index,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // Move the function so the old span goes stale but stays in the store
    write(dir.path(), "old.py", "# prefix\n\ndef shifting():\n    return 'v2'\n");
    coordinator
        .index_directory_incremental(
            dir.path(),
            &mut hash_cache,
            &mut chunk_index,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let filtered = SearchEngine::new(backend.clone(), SearchSettings::default())
        .with_chunk_index(&chunk_index);
    let hits = filtered
        .search("shifting", SearchMode::Lexical, 10, false)
        .await
        .unwrap();

    let valid = chunk_index.valid_chunks();
    for hit in &hits {
        let id = hit.chunk.id.unwrap().to_string();
        assert!(valid.contains(&id), "stale chunk {id} leaked into results");
    }
}

/// Storing a chunk with the same span twice keeps the same id even through
/// the coordinator.
#[tokio::test]
async fn upsert_stability_across_reindex() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "stable.py", "def stable():\n    return 1\n");

    let backend = backend_at(dir.path());
    let coordinator = IndexingCoordinator::new(Config::default(), backend.clone());

    coordinator
        .index_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    let first = backend
        .search_lexical("stable", 1, &TierOptions::default())
        .await
        .unwrap()[0]
        .chunk
        .id;

    coordinator
        .index_directory(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    let second = backend
        .search_lexical("stable", 1, &TierOptions::default())
        .await
        .unwrap()[0]
        .chunk
        .id;

    assert_eq!(first, second);
    assert_eq!(backend.stats().await.unwrap().total_chunks, 1);
}

/// Invalid chunks are rejected before anything is written.
#[tokio::test]
async fn store_rejects_invalid_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend_at(dir.path());

    let bad = Chunk {
        id: None,
        symbol: "empty".to_string(),
        chunk_type: ChunkType::Function,
        language: Language::Python,
        file_path: PathBuf::from("x.py"),
        start_line: 5,
        end_line: 3,
        code: "x".to_string(),
        parent_header: None,
        metadata: BTreeMap::new(),
        created_at: None,
    };
    assert!(backend.store_chunks_batch(vec![bad]).await.is_err());
    assert_eq!(backend.stats().await.unwrap().total_chunks, 0);
}
