//! Volume and environment planning for a new sandbox container

use std::path::{Path, PathBuf};

use crate::containers::VolumeMount;
use crate::registry::ConfigMode;
use crate::sync::{
    CONTAINER_SHARED_MOUNT, CONTAINER_STAGED_MOUNT, CONTAINER_WORKSPACE, WORKSPACE_BACKUP_DIR,
};

/// Where the main repository's `.git` is exposed for worktree checkouts.
pub const CONTAINER_GIT_MAIN: &str = "/workspace/.git_main";

/// Home directory of `user` inside the container.
pub fn container_home(user: Option<&str>) -> String {
    match user {
        Some("root") | None => "/root".to_string(),
        Some(user) => format!("/home/{}", user),
    }
}

/// Main `.git` directory when `workspace` is a linked git worktree, i.e. its
/// `.git` is a file pointing into `<main>/.git/worktrees/<name>`.
pub fn git_main_dir(workspace: &Path) -> Option<PathBuf> {
    let dot_git = workspace.join(".git");
    if !dot_git.is_file() {
        return None;
    }
    let content = std::fs::read_to_string(&dot_git).ok()?;
    let gitdir = content
        .lines()
        .find_map(|l| l.strip_prefix("gitdir:"))?
        .trim();

    let gitdir = Path::new(gitdir);
    let gitdir = if gitdir.is_relative() {
        workspace.join(gitdir)
    } else {
        gitdir.to_path_buf()
    };

    let worktrees = gitdir.parent()?;
    if worktrees.file_name()? != "worktrees" {
        return None;
    }
    let main = worktrees.parent()?;
    main.is_dir()
        .then(|| main.canonicalize().unwrap_or_else(|_| main.to_path_buf()))
}

/// Workspace mounted read-write, plus the main repo metadata read-only for worktrees.
pub fn workspace_mounts(workspace: &Path) -> Vec<VolumeMount> {
    let mut volumes = vec![VolumeMount::rw(
        workspace.to_string_lossy(),
        CONTAINER_WORKSPACE,
    )];
    if let Some(main) = git_main_dir(workspace) {
        tracing::debug!("Workspace is a git worktree of {}", main.display());
        volumes.push(VolumeMount::ro(main.to_string_lossy(), CONTAINER_GIT_MAIN));
    }
    volumes
}

/// Config mounts for `mode`. Only `mounted` adds any: the shared directory
/// read-write and the staged bundle read-only.
pub fn config_mounts(mode: ConfigMode, shared_dir: &Path, staging_dir: &Path) -> Vec<VolumeMount> {
    match mode {
        ConfigMode::Mounted => vec![
            VolumeMount::rw(shared_dir.to_string_lossy(), CONTAINER_SHARED_MOUNT),
            VolumeMount::ro(staging_dir.to_string_lossy(), CONTAINER_STAGED_MOUNT),
        ],
        ConfigMode::Workspace | ConfigMode::None => Vec::new(),
    }
}

/// Host-side staging target for `mode`; `None` means nothing is staged.
pub fn staging_target(mode: ConfigMode, staging_dir: &Path, workspace: &Path) -> Option<PathBuf> {
    match mode {
        ConfigMode::Mounted => Some(staging_dir.to_path_buf()),
        ConfigMode::Workspace => Some(workspace.join(WORKSPACE_BACKUP_DIR)),
        ConfigMode::None => None,
    }
}

/// `~/.gitconfig` read-only when present on the host.
pub fn gitconfig_mount(host_home: &Path, user: Option<&str>) -> Option<VolumeMount> {
    let gitconfig = host_home.join(".gitconfig");
    gitconfig.is_file().then(|| {
        VolumeMount::ro(
            gitconfig.to_string_lossy(),
            format!("{}/.gitconfig", container_home(user)),
        )
    })
}

pub fn sandbox_environment(
    identifier: &str,
    project: &str,
    feature: &str,
    mode: ConfigMode,
) -> Vec<(String, String)> {
    vec![
        ("SANDBOX_PROJECT".to_string(), project.to_string()),
        ("SANDBOX_FEATURE".to_string(), feature.to_string()),
        ("SANDBOX_IDENTIFIER".to_string(), identifier.to_string()),
        ("SANDBOX_CONFIG_MODE".to_string(), mode.to_string()),
        (crate::sync::WORKSPACE_ENV.to_string(), CONTAINER_WORKSPACE.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_git_main_dir_for_worktree() {
        let temp = tempfile::tempdir().unwrap();
        let main = temp.path().join("repo");
        let wt_meta = main.join(".git/worktrees/feature-x");
        fs::create_dir_all(&wt_meta).unwrap();
        let workspace = temp.path().join("feature-x");
        fs::create_dir_all(&workspace).unwrap();
        fs::write(
            workspace.join(".git"),
            format!("gitdir: {}\n", wt_meta.display()),
        )
        .unwrap();

        let found = git_main_dir(&workspace).unwrap();
        assert_eq!(found, main.join(".git").canonicalize().unwrap());

        let mounts = workspace_mounts(&workspace);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].container_path, CONTAINER_GIT_MAIN);
        assert!(mounts[1].read_only);
    }

    #[test]
    fn test_git_main_dir_ignores_regular_repo_and_other_gitdirs() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("plain/.git")).unwrap();
        assert!(git_main_dir(&temp.path().join("plain")).is_none());

        let bare = temp.path().join("bare-wt");
        fs::create_dir_all(&bare).unwrap();
        fs::write(bare.join(".git"), "gitdir: ./.bare\n").unwrap();
        assert!(git_main_dir(&bare).is_none());
    }

    #[test]
    fn test_config_mounts_per_mode() {
        let shared = Path::new("/tmp/csandbox");
        let staging = Path::new("/home/me/.sandbox_claude/staging/sb");

        let mounted = config_mounts(ConfigMode::Mounted, shared, staging);
        assert_eq!(
            mounted,
            vec![
                VolumeMount::rw("/tmp/csandbox", CONTAINER_SHARED_MOUNT),
                VolumeMount::ro(
                    "/home/me/.sandbox_claude/staging/sb",
                    CONTAINER_STAGED_MOUNT,
                ),
            ]
        );
        assert!(config_mounts(ConfigMode::Workspace, shared, staging).is_empty());
        assert!(config_mounts(ConfigMode::None, shared, staging).is_empty());
    }

    #[test]
    fn test_staging_target_per_mode() {
        let staging = Path::new("/s");
        let ws = Path::new("/w");
        assert_eq!(
            staging_target(ConfigMode::Mounted, staging, ws),
            Some(PathBuf::from("/s"))
        );
        assert_eq!(
            staging_target(ConfigMode::Workspace, staging, ws),
            Some(PathBuf::from("/w/.sandbox_claude/config"))
        );
        assert_eq!(staging_target(ConfigMode::None, staging, ws), None);
    }

    #[test]
    fn test_container_home() {
        assert_eq!(container_home(None), "/root");
        assert_eq!(container_home(Some("root")), "/root");
        assert_eq!(container_home(Some("sandman")), "/home/sandman");
    }
}
