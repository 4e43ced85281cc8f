use super::*;
use std::fs;

#[test]
fn test_first_directory_wins() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    fs::write(first.path().join("web"), "type = internal\n").unwrap();
    fs::write(second.path().join("web"), "type = process\n").unwrap();
    fs::write(second.path().join("db"), "type = scripted\n").unwrap();

    let source = DirServiceSource::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
    assert_eq!(source.read_description("web").unwrap().as_deref(), Some("type = internal\n"));
    assert_eq!(source.read_description("db").unwrap().as_deref(), Some("type = scripted\n"));
}

#[test]
fn test_missing_service_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirServiceSource::new(vec![dir.path().to_path_buf()]);
    assert!(source.read_description("nothing").unwrap().is_none());
}

#[test]
fn test_path_like_names_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("svc"), "type = internal\n").unwrap();

    let source = DirServiceSource::new(vec![dir.path().to_path_buf()]);
    assert!(source.read_description("sub/svc").unwrap().is_none());
    assert!(source.read_description("..").unwrap().is_none());
    // A directory is not a description
    assert!(source.read_description("sub").unwrap().is_none());
}

#[test]
fn test_dependency_dir_relative_to_service() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    fs::write(second.path().join("boot"), "type = internal\n").unwrap();
    let deps = second.path().join("boot.d");
    fs::create_dir(&deps).unwrap();
    fs::write(deps.join("network"), "").unwrap();
    fs::write(deps.join("clock"), "").unwrap();
    fs::write(deps.join(".hidden"), "").unwrap();

    let source = DirServiceSource::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
    let names = source.list_dependency_dir("boot", "boot.d").unwrap();
    assert_eq!(names, vec!["clock".to_string(), "network".to_string()]);
}

#[test]
fn test_missing_dependency_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("boot"), "type = internal\n").unwrap();

    let source = DirServiceSource::new(vec![dir.path().to_path_buf()]);
    assert!(source.list_dependency_dir("boot", "boot.d").unwrap().is_empty());
}

#[test]
fn test_memory_source_counts_reads() {
    let mut source = MemoryServiceSource::new().with("a", "type = internal\n");
    source.insert_dir("a.d", &["b", "c"]);

    assert_eq!(source.read_count("a"), 0);
    assert!(source.read_description("a").unwrap().is_some());
    assert!(source.read_description("missing").unwrap().is_none());
    assert_eq!(source.read_count("a"), 1);
    assert_eq!(source.read_count("missing"), 1);
    assert_eq!(source.list_dependency_dir("a", "a.d").unwrap(), vec!["b", "c"]);
}
