mod common;

use std::path::PathBuf;

use common::{TestWorkspace, VALID_ORDER};
use validate_sch::error::SchematronError;
use validate_sch::resources::FileSet;
use validate_sch::{OutcomePolicy, ResourceCollection, ResourceResolver, collection_from_spec};

fn workspace() -> TestWorkspace {
    let workspace = TestWorkspace::new();
    workspace.write("data/a/x.xml", VALID_ORDER);
    workspace.write("data/a/deep/y.xml", VALID_ORDER);
    workspace.write("data/b/z.xml", VALID_ORDER);
    workspace.write("data/b/notes.txt", "not xml");
    workspace
}

fn resolver(fail_on_error: bool) -> ResourceResolver {
    ResourceResolver::new(OutcomePolicy::new(true, fail_on_error))
}

fn relative_paths(files: &[validate_sch::ResolvedFile]) -> Vec<PathBuf> {
    files.iter().map(|f| f.relative.clone()).collect()
}

#[tokio::test]
async fn test_recursive_and_explicit_inclusions_collapse() {
    let workspace = workspace();
    let base = workspace.path().join("data");
    let collections: Vec<Box<dyn ResourceCollection>> = vec![
        Box::new(FileSet::new(&base, vec!["a/**".to_string()])),
        Box::new(FileSet::new(&base, vec!["a/x.xml".to_string()])),
    ];

    let files = resolver(true).resolve_files(&collections).await.unwrap();

    assert_eq!(
        relative_paths(&files),
        vec![PathBuf::from("a/deep/y.xml"), PathBuf::from("a/x.xml")]
    );
}

#[tokio::test]
async fn test_patterns_sharing_a_root_are_merged() {
    let workspace = workspace();
    let root = workspace.path().join("data").display().to_string();
    let collections = vec![
        collection_from_spec(&format!("{}/**/x.xml", root)),
        collection_from_spec(&format!("{}/*/*.xml", root)),
    ];

    let groups = resolver(true).resolve(&collections).await.unwrap();
    assert_eq!(groups.len(), 1);

    let files = resolver(true).resolve_files(&collections).await.unwrap();
    assert_eq!(
        relative_paths(&files),
        vec![PathBuf::from("a/x.xml"), PathBuf::from("b/z.xml")]
    );
}

#[tokio::test]
async fn test_file_urls_are_local_paths() {
    let workspace = workspace();
    let path = workspace.path().join("data/b/z.xml");
    let collections = vec![collection_from_spec(&format!("file://{}", path.display()))];

    let files = resolver(true).resolve_files(&collections).await.unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].path.ends_with("data/b/z.xml"));
}

#[tokio::test]
async fn test_remote_inputs_are_rejected() {
    let collections = vec![collection_from_spec("http://example.com/orders/1.xml")];
    let result = resolver(false).resolve_files(&collections).await;
    assert!(matches!(result, Err(SchematronError::Resolution(_))));
}

#[tokio::test]
async fn test_missing_input_is_skipped_when_not_failing_fast() {
    let workspace = workspace();
    let collections = vec![
        collection_from_spec(&workspace.path().join("nope.xml").display().to_string()),
        collection_from_spec(&workspace.path().join("data/a/x.xml").display().to_string()),
    ];

    let error = resolver(true).resolve_files(&collections).await.unwrap_err();
    assert!(error.is_build_failure());
    assert!(error.to_string().contains("does not exist"));

    let files = resolver(false).resolve_files(&collections).await.unwrap();
    assert_eq!(files.len(), 1);
}
