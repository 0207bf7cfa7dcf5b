//! File handle release during binding. Kept in its own test binary so no
//! other test opens files while descriptors are counted.

#![cfg(target_os = "linux")]

mod common;

use bookbinder::{bind, BindOutcome};
use common::sample_pdf;
use tempfile::TempDir;

fn open_descriptors() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("Failed to list /proc/self/fd")
        .count()
}

#[tokio::test]
async fn test_bind_releases_every_file_handle() {
    let temp_dir = TempDir::new().unwrap();
    let a = sample_pdf("A", 1);
    std::fs::write(temp_dir.path().join("001_A.pdf"), &a).unwrap();
    std::fs::write(temp_dir.path().join("002_A.pdf"), &a).unwrap();
    std::fs::write(temp_dir.path().join("003_Broken.pdf"), b"not a pdf").unwrap();
    std::fs::write(temp_dir.path().join("Book.pdf"), b"previous binding").unwrap();

    let before = open_descriptors();

    // Collision branch returns before any chapter is opened.
    let outcome = bind(temp_dir.path(), "Book", None).await.unwrap();
    assert!(matches!(outcome, BindOutcome::TargetExists(_)));
    assert_eq!(open_descriptors(), before);

    // Duplicate and unparseable branches, then the output write.
    let outcome = bind(temp_dir.path(), "Bound", None).await.unwrap();
    match outcome {
        BindOutcome::Bound(report) => {
            assert_eq!(report.duplicates, 1);
            // 003_Broken.pdf and the earlier Book.pdf do not parse.
            assert_eq!(report.unreadable, 2);
        }
        BindOutcome::TargetExists(path) => panic!("unexpected collision at {}", path.display()),
    }
    assert_eq!(open_descriptors(), before);
}
