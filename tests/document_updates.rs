use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tacheles_lib::fields::REMARK_FIELD;
use tacheles_lib::models::Document;
use tacheles_lib::{AppError, DocumentStore, FsStore, Tracker};

const DOCUMENT: &str = "\
title: Tacheles Mängelliste
defects:
- id: '101'
  nr_ht: MAZ 007
  status: Keyed
  zustaendigkeit: HOCHTIEF
  termin_mangelbeseitigung: 01.03.2024
  bearbeitungsstand: ''
- id: '102'
  status: In Bearbeitung
  termin_mangelbeseitigung: 10.03.2024
  nachfrist_2: 24.03.2024
change_log: []
meta:
  last_modified: 01.01.2024 00:00:00
";

const REMARK: &str = "Abdichtung im Treppenhaus wurde heute vom Nachunternehmer vollständig erneuert und geprüft";

fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp workspace");
    let path = dir.path().join("Tacheles.yaml");
    fs::write(&path, DOCUMENT).expect("seed document");
    (dir, path)
}

fn patch(yaml: &str) -> Mapping {
    serde_yaml::from_str(yaml).expect("patch yaml")
}

fn snapshot_count(root: &Path) -> usize {
    fs::read_dir(root.join(".versions"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

fn reload(path: &Path) -> Document {
    Document::parse(&fs::read_to_string(path).expect("read document")).expect("parse document")
}

#[test]
fn accepted_update_rewrites_document_and_snapshots_it() {
    let (dir, path) = workspace();
    let tracker = Tracker::new(FsStore::open(&path).expect("open"));

    let update = tracker
        .update_record("101", &patch("nachfrist_2: '2024-03-15'\nstatus: Freigemeldet"))
        .expect("update");
    assert!(update.changed);

    let document = reload(&path);
    let record = document.find_record("101").expect("record 101");
    assert_eq!(record.get("nachfrist_2"), Some(&Value::from("15.03.2024")));
    assert_eq!(record.get("status"), Some(&Value::from("Freigemeldet")));
    assert_eq!(document.change_log().len(), 2);
    assert_ne!(document.last_modified(), Some("01.01.2024 00:00:00"));

    assert_eq!(snapshot_count(dir.path()), 1);
    let snapshot = fs::read_dir(dir.path().join(".versions"))
        .expect("versions dir")
        .filter_map(Result::ok)
        .next()
        .expect("one snapshot");
    assert_eq!(
        fs::read_to_string(snapshot.path()).expect("read snapshot"),
        fs::read_to_string(&path).expect("read document")
    );
    assert!(!dir.path().join("Tacheles.yaml.tmp").exists());
}

#[test]
fn rejected_update_leaves_the_file_byte_identical() {
    let (dir, path) = workspace();
    let tracker = Tracker::new(FsStore::open(&path).expect("open"));

    let error = tracker
        .update_record("102", &patch("status: Formal abgenommen\nnachfrist_3: 20.03.2024"))
        .expect_err("nachfrist_3 before nachfrist_2");
    assert!(matches!(error, AppError::Consistency(_)));
    assert!(error.reason().contains("nachfrist_3"));

    assert_eq!(fs::read_to_string(&path).expect("read document"), DOCUMENT);
    assert_eq!(snapshot_count(dir.path()), 0);
}

#[test]
fn repeated_patch_is_idempotent() {
    let (dir, path) = workspace();
    let tracker = Tracker::new(FsStore::open(&path).expect("open"));

    let first = tracker
        .update_record("101", &patch("zustaendigkeit: WISAG"))
        .expect("first update");
    let written = fs::read_to_string(&path).expect("read document");
    let second = tracker
        .update_record("101", &patch("zustaendigkeit: WISAG"))
        .expect("second update");

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(fs::read_to_string(&path).expect("read document"), written);
    assert_eq!(reload(&path).change_log().len(), 1);
    assert_eq!(snapshot_count(dir.path()), 1);
}

#[test]
fn remarks_accumulate_in_order() {
    let (dir, path) = workspace();
    let tracker = Tracker::new(FsStore::open(&path).expect("open"));

    tracker
        .append_remark("101", REMARK_FIELD, "02.03.2024 09:00:00", REMARK)
        .expect("first remark");
    tracker
        .append_remark("101", REMARK_FIELD, "03.03.2024 09:00:00", REMARK)
        .expect("second remark");

    let document = reload(&path);
    let remark = document
        .find_record("101")
        .and_then(|record| record.get(REMARK_FIELD))
        .and_then(Value::as_str)
        .expect("remark text");
    let lines: Vec<_> = remark.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[02.03.2024 09:00:00] "));
    assert!(lines[1].starts_with("[03.03.2024 09:00:00] "));
    assert_eq!(document.change_log().len(), 2);
    assert_eq!(snapshot_count(dir.path()), 2);
}

#[test]
fn unrelated_content_survives_a_rewrite() {
    let (_dir, path) = workspace();
    let tracker = Tracker::new(FsStore::open(&path).expect("open"));
    tracker
        .update_record("102", &patch("acceptance.wisag_formal_acceptance: open"))
        .expect("update");

    let text = fs::read_to_string(&path).expect("read document");
    assert!(text.starts_with("title:"));
    let document = reload(&path);
    assert_eq!(
        document.find_record("101"),
        Document::parse(DOCUMENT).expect("seed").find_record("101")
    );
}

#[test]
fn store_sees_changes_made_by_another_writer() {
    let (_dir, path) = workspace();
    let store = FsStore::open(&path).expect("open");
    fs::write(&path, DOCUMENT.replace("MAZ 007", "MAZ 008")).expect("external edit");
    let document = store.load().expect("load");
    assert_eq!(
        document.find_record("101").and_then(|record| record.get("nr_ht")),
        Some(&Value::from("MAZ 008"))
    );
}

#[test]
fn concurrent_writers_never_lose_an_update() {
    let (dir, path) = workspace();
    let tracker = Arc::new(Tracker::new(FsStore::open(&path).expect("open")));

    let handles: Vec<_> = (0..16)
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                if worker % 2 == 0 {
                    tracker
                        .append_remark("101", REMARK_FIELD, "04.03.2024 08:00:00", REMARK)
                        .expect("concurrent remark");
                } else {
                    tracker
                        .update_record("102", &patch(&format!("beschreibung: 'stand {}'", worker)))
                        .expect("concurrent update");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker finished");
    }

    let document = reload(&path);
    assert_eq!(document.change_log().len(), 16);
    let remark = document
        .find_record("101")
        .and_then(|record| record.get(REMARK_FIELD))
        .and_then(Value::as_str)
        .expect("remark text");
    assert_eq!(remark.lines().count(), 8);

    let updated = document
        .change_log()
        .iter()
        .filter(|entry| entry.get("field").and_then(Value::as_str) == Some("beschreibung"))
        .count();
    assert_eq!(updated, 8);
    assert_eq!(snapshot_count(dir.path()), 16);
}
