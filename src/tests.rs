use crate::config::LimitsConfig;
use crate::corpus::{AuthorRef, BatchReader, BookRecord, SequenceRef, placeholder_author};
use crate::db::Database;
use crate::fill::{FillStats, fill_batch, run_fill};
use crate::genres::GenreCatalog;
use crate::index::{IndexOptions, build_author_index, build_genre_index, build_sequence_index};
use crate::pages::{Pages, id_to_path, seqs_in_books, sequenceless_books, unicode_upper};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn test_catalog() -> GenreCatalog {
    GenreCatalog::for_tests(&["sf", "det", "prose"])
}

// genre rows reference genres_meta, so fill tests need the meta loaded
fn test_db_with_meta(catalog: &GenreCatalog) -> Database {
    let db = test_db();
    db.load_genres_meta(catalog.meta_groups()).unwrap();
    db
}

fn make_record(book_id: &str, title: &str, authors: &[(&str, &str)]) -> BookRecord {
    BookRecord {
        book_id: book_id.to_string(),
        zipfile: "test-1.zip".to_string(),
        filename: format!("{}.fb2", book_id),
        authors: if authors.is_empty() {
            None
        } else {
            Some(
                authors
                    .iter()
                    .map(|(id, name)| AuthorRef {
                        id: id.to_string(),
                        name: name.to_string(),
                    })
                    .collect(),
            )
        },
        sequences: None,
        genres: Some(vec!["sf".to_string()]),
        lang: "ru".to_string(),
        date_time: "2020-05-01".to_string(),
        size: 1000,
        deleted: 0,
        book_title: title.to_string(),
        annotation: String::new(),
        pub_info: None,
        cover: None,
    }
}

fn with_sequence(mut record: BookRecord, seq_id: &str, seq_name: &str, num: i64) -> BookRecord {
    record.sequences = Some(vec![SequenceRef {
        id: Some(seq_id.to_string()),
        name: Some(seq_name.to_string()),
        num: Some(num),
    }]);
    record
}

fn write_shard(dir: &Path, name: &str, records: &[BookRecord]) {
    let mut out = fs::File::create(dir.join(name)).unwrap();
    for record in records {
        let line = serde_json::to_string(record).unwrap();
        writeln!(out, "{}", line).unwrap();
    }
}

fn opts(max_pass_keys: usize) -> IndexOptions {
    IndexOptions {
        max_pass_keys,
        hide_deleted: false,
        resume: false,
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ========== CORPUS READER ==========

#[test]
fn shards_are_read_in_lexicographic_order() {
    let dir = TempDir::new().unwrap();
    write_shard(dir.path(), "b-2.zip.list", &[make_record("b2", "Two", &[])]);
    write_shard(dir.path(), "a-1.zip.list", &[make_record("b1", "One", &[])]);

    let shards = crate::corpus::list_shards(dir.path()).unwrap();
    let names: Vec<_> = shards
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a-1.zip.list", "b-2.zip.list"]);
}

#[test]
fn gzipped_shards_are_transparent() {
    let dir = TempDir::new().unwrap();
    let record = make_record("bz", "Zipped", &[("a1", "Автор")]);
    let line = serde_json::to_string(&record).unwrap();

    let file = fs::File::create(dir.path().join("z-1.zip.list.gz")).unwrap();
    let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    writeln!(enc, "{}", line).unwrap();
    enc.finish().unwrap();

    let mut seen = Vec::new();
    crate::corpus::for_each_record(dir.path(), |_, record| {
        seen.push(record.book_id);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec!["bz"]);
}

#[test]
fn malformed_lines_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let good = serde_json::to_string(&make_record("ok", "Fine", &[])).unwrap();
    fs::write(
        dir.path().join("x-1.zip.list"),
        format!("{{not json}}\n{}\n{{\"book_id\":}}\n", good),
    )
    .unwrap();

    let mut seen = Vec::new();
    crate::corpus::for_each_record(dir.path(), |_, record| {
        seen.push(record.book_id);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec!["ok"]);
}

#[test]
fn batches_are_bounded_by_bytes_not_rows() {
    let dir = TempDir::new().unwrap();
    let records: Vec<BookRecord> = (0..10)
        .map(|i| make_record(&format!("b{}", i), "Title", &[]))
        .collect();
    write_shard(dir.path(), "a-1.zip.list", &records);

    let line_len = serde_json::to_string(&records[0]).unwrap().len();

    // every batch fits roughly three lines
    let batches: Vec<Vec<BookRecord>> = BatchReader::new(dir.path(), line_len * 3)
        .unwrap()
        .map(|b| b.unwrap())
        .collect();

    assert!(batches.len() > 1);
    let total: usize = batches.iter().map(|b| b.len()).sum();
    assert_eq!(total, 10);
    for batch in &batches[..batches.len() - 1] {
        assert!(batch.len() <= 4);
    }
}

#[test]
fn refine_defaults_missing_fields() {
    let catalog = test_catalog();

    let mut record = make_record("b1", "Title", &[]);
    record.genres = None;
    record.lang = String::new();
    record.refine(&catalog);

    assert_eq!(record.genres.clone().unwrap(), vec!["other"]);
    assert_eq!(record.lang, "en");
    let authors = record.authors.unwrap();
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0].id, placeholder_author().id);

    // unknown genres collapse, known ones pass through
    let mut record = make_record("b2", "Title", &[("a1", "A")]);
    record.genres = Some(vec!["sf".to_string(), "no_such_genre".to_string()]);
    record.refine(&catalog);
    assert_eq!(record.genres.clone().unwrap(), vec!["sf", "other"]);
}

// ========== RELATIONAL FILL ==========

fn fill_fixture() -> Vec<BookRecord> {
    vec![
        make_record("b1", "Первая", &[("a1", "Иванов"), ("a2", "Petrov")]),
        with_sequence(
            make_record("b2", "Вторая", &[("a1", "Иванов")]),
            "s1",
            "Сага",
            1,
        ),
        make_record("b3", "Third", &[]),
    ]
}

#[test]
fn fill_inserts_new_entities_once() {
    let catalog = test_catalog();
    let db = test_db_with_meta(&catalog);

    let stats = fill_batch(&db, &catalog, fill_fixture(), false).unwrap();
    assert_eq!(
        stats,
        FillStats {
            authors: 3, // a1, a2 and the placeholder
            sequences: 1,
            genres: 1,
            books: 3,
            descriptions: 3,
        }
    );

    assert_eq!(db.count_books().unwrap(), 3);
    assert_eq!(db.count_authors().unwrap(), 3);
    assert_eq!(db.count_descriptions().unwrap(), 3);
}

#[test]
fn fill_is_idempotent() {
    let catalog = test_catalog();
    let db = test_db_with_meta(&catalog);

    fill_batch(&db, &catalog, fill_fixture(), false).unwrap();
    let second = fill_batch(&db, &catalog, fill_fixture(), false).unwrap();

    assert_eq!(second, FillStats::default());
    assert_eq!(db.count_books().unwrap(), 3);
    assert_eq!(db.count_authors().unwrap(), 3);
    assert_eq!(db.count_sequences().unwrap(), 1);
}

#[test]
fn fill_hide_deleted_skips_before_existence_check() {
    let catalog = test_catalog();
    let db = test_db_with_meta(&catalog);

    let mut records = fill_fixture();
    records[0].deleted = 1;

    let stats = fill_batch(&db, &catalog, records, true).unwrap();
    assert_eq!(stats.books, 2);
    // a2 only appears on the deleted record
    assert_eq!(stats.authors, 2);
}

#[test]
fn run_fill_covers_whole_corpus() {
    let dir = TempDir::new().unwrap();
    write_shard(dir.path(), "a-1.zip.list", &fill_fixture()[..2].to_vec());
    write_shard(dir.path(), "b-2.zip.list", &fill_fixture()[2..].to_vec());

    let db = test_db();
    let catalog = test_catalog();
    let limits = LimitsConfig::default();

    // fresh database: run_fill must load the meta groups itself, or
    // every genre-bearing batch would hit the meta foreign key
    let outcome = run_fill(&db, &catalog, dir.path(), &limits, false).unwrap();
    assert_eq!(outcome.failed_batches, 0);
    assert_eq!(outcome.stats.books, 3);
    assert_eq!(db.count_books().unwrap(), 3);
    assert_eq!(db.count_genres().unwrap(), 1);
}

// ========== AGGREGATOR ==========

#[test]
fn aggregator_pass_count_matches_key_count_over_cap() {
    let dir = TempDir::new().unwrap();
    // 5 distinct authors, one book each
    let records: Vec<BookRecord> = (0..5)
        .map(|i| {
            make_record(
                &format!("b{}", i),
                &format!("Book {}", i),
                &[(&format!("auth{}", i), &format!("Author {}", i))],
            )
        })
        .collect();
    write_shard(dir.path(), "a-1.zip.list", &records);

    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();
    let stats =
        build_author_index(dir.path(), &pages, &test_db(), &test_catalog(), opts(2)).unwrap();

    // ceil(5 / 2) = 3 materializing passes, every key exactly once
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.keys, 5);
    for i in 0..5 {
        assert!(pages.author_exists(&format!("auth{}", i)));
    }
}

#[test]
fn two_shards_shared_author_merges_without_duplicates() {
    let dir = TempDir::new().unwrap();
    // author "shared" contributes from both shards; 3 distinct authors, cap 2
    write_shard(
        dir.path(),
        "a-1.zip.list",
        &[
            make_record("b1", "Альфа", &[("shared", "Общий")]),
            make_record("b2", "Бета", &[("only1", "Первый")]),
            make_record("b3", "Гамма", &[("shared", "Общий")]),
        ],
    );
    write_shard(
        dir.path(),
        "b-2.zip.list",
        &[
            make_record("b4", "Дельта", &[("shared", "Общий")]),
            make_record("b5", "Эпсилон", &[("only2", "Второй")]),
            make_record("b6", "Дзета", &[("shared", "Общий")]),
        ],
    );

    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();
    let stats =
        build_author_index(dir.path(), &pages, &test_db(), &test_catalog(), opts(2)).unwrap();

    assert_eq!(stats.passes, 2);
    assert_eq!(stats.keys, 3);

    let all = read_json(
        &pages_dir
            .path()
            .join(format!("author/{}/all.json", id_to_path("shared"))),
    );
    let mut ids: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["book_id"].as_str().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["b1", "b3", "b4", "b6"]);
}

#[test]
fn resume_skips_keys_already_on_disk() {
    let dir = TempDir::new().unwrap();
    let records: Vec<BookRecord> = (0..3)
        .map(|i| {
            make_record(
                &format!("b{}", i),
                "Title",
                &[(&format!("auth{}", i), "Name")],
            )
        })
        .collect();
    write_shard(dir.path(), "a-1.zip.list", &records);

    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();
    let db = test_db();
    let catalog = test_catalog();

    let first = build_author_index(dir.path(), &pages, &db, &catalog, opts(10)).unwrap();
    assert_eq!(first.keys, 3);

    let resumed = build_author_index(
        dir.path(),
        &pages,
        &db,
        &catalog,
        IndexOptions {
            max_pass_keys: 10,
            hide_deleted: false,
            resume: true,
        },
    )
    .unwrap();
    assert_eq!(resumed.keys, 0);
    assert_eq!(resumed.passes, 0);
}

#[test]
fn sequence_index_sorts_books_by_number() {
    let dir = TempDir::new().unwrap();
    write_shard(
        dir.path(),
        "a-1.zip.list",
        &[
            with_sequence(make_record("b2", "Вторая", &[("a1", "A")]), "s1", "Сага", 2),
            with_sequence(make_record("b1", "Первая", &[("a1", "A")]), "s1", "Сага", 1),
        ],
    );

    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();
    let stats =
        build_sequence_index(dir.path(), &pages, &test_db(), &test_catalog(), opts(10)).unwrap();
    assert_eq!(stats.keys, 1);

    let doc = read_json(
        &pages_dir
            .path()
            .join(format!("sequence/{}.json", id_to_path("s1"))),
    );
    assert_eq!(doc["name"], "Сага");
    let ids: Vec<&str> = doc["books"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["book_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["b1", "b2"]);
}

// ========== GENRE PAGINATION ==========

#[test]
fn genre_pages_are_fixed_size_and_title_sorted() {
    let mut books: Vec<BookRecord> = (0..120)
        .map(|i| make_record(&format!("b{:03}", i), &format!("T{:03}", 119 - i), &[]))
        .collect();

    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();
    pages.write_genre("sf", &mut books).unwrap();

    let genre_dir = pages_dir.path().join("genre/sf");
    assert!(genre_dir.join("all.json").exists());
    assert!(genre_dir.join("0.json").exists());
    assert!(genre_dir.join("1.json").exists());
    assert!(genre_dir.join("2.json").exists());
    assert!(!genre_dir.join("3.json").exists());

    let sizes: Vec<usize> = (0..3)
        .map(|n| {
            read_json(&genre_dir.join(format!("{}.json", n)))
                .as_array()
                .unwrap()
                .len()
        })
        .collect();
    assert_eq!(sizes, vec![50, 50, 20]);

    // first page starts at the collation-smallest title
    let page0 = read_json(&genre_dir.join("0.json"));
    assert_eq!(page0[0]["book_title"], "T000");

    let all = read_json(&genre_dir.join("all.json"));
    assert_eq!(all.as_array().unwrap().len(), 120);
}

#[test]
fn genre_index_from_corpus() {
    let dir = TempDir::new().unwrap();
    let mut records = vec![
        make_record("b1", "Один", &[("a1", "A")]),
        make_record("b2", "Два", &[("a1", "A")]),
    ];
    records[1].genres = Some(vec!["det".to_string()]);
    write_shard(dir.path(), "a-1.zip.list", &records);

    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();
    let stats =
        build_genre_index(dir.path(), &pages, &test_db(), &test_catalog(), opts(5)).unwrap();

    assert_eq!(stats.keys, 2);
    assert!(pages_dir.path().join("genre/sf/all.json").exists());
    assert!(pages_dir.path().join("genre/det/all.json").exists());
}

// ========== MATERIALIZER HELPERS ==========

#[test]
fn id_to_path_fans_out_two_levels() {
    assert_eq!(id_to_path("abcdef123"), "ab/cd/abcdef123");
    assert_eq!(id_to_path("abc"), "ab/abc");
    assert_eq!(id_to_path("a"), "a");
}

#[test]
fn unicode_upper_folds_letters() {
    assert_eq!(unicode_upper("ёжик"), "ЕЖИК");
    assert_eq!(unicode_upper("Подъём"), "ПОДЬЕМ");
    assert_eq!(unicode_upper("abc"), "ABC");
}

#[test]
fn seqs_in_books_counts_occurrences() {
    let books = vec![
        with_sequence(make_record("b1", "One", &[]), "s1", "Сага", 1),
        with_sequence(make_record("b2", "Two", &[]), "s1", "Сага", 2),
        with_sequence(make_record("b3", "Three", &[]), "s2", "Другая", 1),
        make_record("b4", "Four", &[]),
    ];

    let seqs = seqs_in_books(&books);
    assert_eq!(seqs.len(), 2);
    assert_eq!(seqs[0].id, "s1");
    assert_eq!(seqs[0].cnt, 2);
    assert_eq!(seqs[1].id, "s2");
    assert_eq!(seqs[1].cnt, 1);

    assert_eq!(sequenceless_books(&books), vec!["b4"]);
}

#[test]
fn name_index_groups_letters_and_prefixes() {
    let pages_dir = TempDir::new().unwrap();
    let pages = Pages::new(pages_dir.path()).unwrap();

    let entries = vec![
        ("a1".to_string(), "Иванов Иван".to_string()),
        ("a2".to_string(), "Ивлев Пётр".to_string()),
        ("a3".to_string(), "Smith John".to_string()),
        ("a4".to_string(), "Ян".to_string()),
    ];
    pages.write_name_index("authorsindex", &entries).unwrap();

    let letters = read_json(&pages_dir.path().join("authorsindex/index.json"));
    let letters: Vec<&str> = letters
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    // collation order: Cyrillic first, Latin after
    assert_eq!(letters, vec!["И", "Я", "S"]);

    let prefixes = read_json(&pages_dir.path().join("authorsindex/И/index.json"));
    let prefixes: Vec<&str> = prefixes
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(prefixes, vec!["ИВА", "ИВЛ"]);

    let group = read_json(&pages_dir.path().join("authorsindex/И/ИВА.json"));
    assert_eq!(group[0]["id"], "a1");
    assert_eq!(group[0]["name"], "Иванов Иван");

    // a name shorter than three characters forms its own exact group
    let short = read_json(&pages_dir.path().join("authorsindex/Я/ЯН.json"));
    assert_eq!(short[0]["id"], "a4");
}

// ========== COVERS ==========

#[test]
fn covers_are_extracted_and_failures_skipped() {
    use base64::Engine;

    let dir = TempDir::new().unwrap();
    let mut good = make_record("goodbook1", "With Cover", &[]);
    good.cover = Some(crate::corpus::Cover {
        content_type: Some("image/jpeg".to_string()),
        data: base64::engine::general_purpose::STANDARD.encode(b"jpegbytes"),
    });
    let mut bad = make_record("badbook22", "Broken Cover", &[]);
    bad.cover = Some(crate::corpus::Cover {
        content_type: Some("image/jpeg".to_string()),
        data: "@@@broken@@@base64@@@".to_string(),
    });
    let none = make_record("plainbook", "No Cover", &[]);
    write_shard(dir.path(), "a-1.zip.list", &[good, bad, none]);

    let covers_dir = TempDir::new().unwrap();
    let stats = crate::covers::extract_covers(dir.path(), covers_dir.path()).unwrap();

    assert_eq!(stats.written, 1);
    assert_eq!(stats.failed, 1);

    let path = covers_dir
        .path()
        .join(format!("{}.jpg", id_to_path("goodbook1")));
    assert_eq!(fs::read(path).unwrap(), b"jpegbytes");

    // restart: the existing file is left alone
    let again = crate::covers::extract_covers(dir.path(), covers_dir.path()).unwrap();
    assert_eq!(again.written, 0);
    assert_eq!(again.existing, 1);
}

// ========== DATABASE ==========

#[test]
fn db_bulk_existence_checks() {
    let catalog = test_catalog();
    let db = test_db_with_meta(&catalog);
    fill_batch(&db, &catalog, fill_fixture(), false).unwrap();

    let existing = db
        .existing_authors(&["a1".to_string(), "missing".to_string()])
        .unwrap();
    assert!(existing.contains("a1"));
    assert!(!existing.contains("missing"));

    let existing = db.existing_books(&["b1".to_string(), "b9".to_string()]).unwrap();
    assert_eq!(existing.len(), 1);
}

#[test]
fn db_genres_meta_load_is_idempotent() {
    let db = test_db();
    let meta = vec![
        ("1".to_string(), "Фантастика".to_string()),
        ("2".to_string(), "Детективы".to_string()),
    ];

    assert_eq!(db.load_genres_meta(&meta).unwrap(), 2);
    assert_eq!(db.load_genres_meta(&meta).unwrap(), 0);
}
