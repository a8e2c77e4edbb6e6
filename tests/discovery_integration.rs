//! Discovery against real git repositories.

use std::path::Path;
use std::process::Command;

use gitfleet::discovery::discover_repositories;
use gitfleet::shell_exec::ShellExecutor;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git must be installed");
    assert!(
        output.status.success(),
        "git {args:?} failed in {}: {}",
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn nested_repository_ignored_by_ancestor_is_pruned() {
    let tmp = tempfile::tempdir().unwrap();
    let outer = tmp.path().join("example");
    let nested = outer.join("tools/licenser");

    std::fs::create_dir_all(&nested).unwrap();
    git(&outer, &["init", "-b", "main"]);
    std::fs::write(outer.join(".gitignore"), "tools/licenser\n").unwrap();
    git(&nested, &["init", "-b", "main"]);

    let exec = ShellExecutor::default();
    let repos = discover_repositories(&exec, &[outer.clone(), nested.clone()]).unwrap();
    let names: Vec<String> = repos.iter().map(|r| r.folder_name()).collect();
    assert_eq!(names, vec!["example"], "ignored nested repo must be pruned");
}

#[test]
fn nested_repository_not_ignored_is_kept() {
    let tmp = tempfile::tempdir().unwrap();
    let outer = tmp.path().join("example");
    let nested = outer.join("tools/licenser");

    std::fs::create_dir_all(&nested).unwrap();
    git(&outer, &["init", "-b", "main"]);
    git(&nested, &["init", "-b", "main"]);

    let exec = ShellExecutor::default();
    let repos = discover_repositories(&exec, &[outer.clone(), nested.clone()]).unwrap();
    assert_eq!(repos.len(), 2, "check-ignore exit 1 must not prune anything");
}

#[test]
fn walk_reports_each_top_level_repository_once() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["alpha", "beta/gamma"] {
        let dir = tmp.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        git(&dir, &["init", "-b", "main"]);
    }

    let exec = ShellExecutor::default();
    let repos =
        discover_repositories(&exec, &[tmp.path().to_path_buf(), tmp.path().to_path_buf()])
            .unwrap();
    let names: Vec<String> = repos.iter().map(|r| r.folder_name()).collect();
    assert_eq!(names, vec!["alpha", "gamma"]);
}
