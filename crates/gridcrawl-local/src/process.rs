//! Container processes: work directories, resource localization and
//! `sh -c` launch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, bail};
use gridcrawl_core::*;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::storage::{local_path, modification_millis};

/// Directories one container runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDirs {
    /// Working directory; localized resources land here.
    pub work_dir: PathBuf,
    /// Target of `<LOG_DIR>`.
    pub log_dir: PathBuf,
}

impl ContainerDirs {
    pub fn under(root: &Path, container_id: &str) -> Self {
        let work_dir = root.join(container_id);
        let log_dir = work_dir.join("logs");
        Self { work_dir, log_dir }
    }

    pub async fn create(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .with_context(|| format!("failed to create {}", self.log_dir.display()))
    }

    /// Substitute `<LOG_DIR>` and `$PWD` in `value`.
    pub fn expand(&self, value: &str) -> String {
        value
            .replace(LOG_DIR_EXPANSION_VAR, &self.log_dir.to_string_lossy())
            .replace(PWD_EXPANSION_VAR, &self.work_dir.to_string_lossy())
    }
}

/// Create the directories, localize resources and start the commands.
pub async fn launch(spec: &LaunchSpec, dirs: &ContainerDirs) -> anyhow::Result<Child> {
    dirs.create().await?;
    localize(&spec.local_resources, &dirs.work_dir).await?;
    spawn(spec, dirs)
}

/// Copy every resource into `work_dir` under its name. A source whose
/// size or modification time differs from what was staged is refused.
pub async fn localize(
    resources: &BTreeMap<String, LocalResource>,
    work_dir: &Path,
) -> anyhow::Result<()> {
    for (name, resource) in resources {
        let source = local_path(&resource.url);
        let meta = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("resource {name} unavailable at {}", resource.url))?;

        if meta.len() != resource.size {
            bail!(
                "resource {name} changed on source: staged {} bytes, found {}",
                resource.size,
                meta.len()
            );
        }
        let modified = modification_millis(&meta);
        if resource.timestamp != 0 && modified != resource.timestamp {
            bail!(
                "resource {name} changed on source: staged at {}, modified at {modified}",
                resource.timestamp
            );
        }

        let target = work_dir.join(name);
        tokio::fs::copy(source, &target)
            .await
            .with_context(|| format!("failed to copy {} to {}", resource.url, target.display()))?;
        make_executable(&target).await?;
        debug!(resource = %name, size = resource.size, "localized resource");
    }
    Ok(())
}

/// Run the commands, joined with `&&`, through `sh -c` in the work
/// directory.
pub fn spawn(spec: &LaunchSpec, dirs: &ContainerDirs) -> anyhow::Result<Child> {
    if spec.commands.is_empty() {
        bail!("launch spec has no commands");
    }
    let script = spec
        .commands
        .iter()
        .map(|command| dirs.expand(command))
        .collect::<Vec<_>>()
        .join(" && ");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&script)
        .current_dir(&dirs.work_dir)
        .envs(
            spec.environment
                .iter()
                .map(|(key, value)| (key.clone(), dirs.expand(value))),
        )
        .stdin(Stdio::null());

    debug!(work_dir = %dirs.work_dir.display(), %script, "spawning container process");

    cmd.spawn()
        .with_context(|| format!("failed to spawn sh in {}", dirs.work_dir.display()))
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(path: &Path) -> LocalResource {
        let meta = std::fs::metadata(path).unwrap();
        LocalResource {
            url: path.to_string_lossy().into_owned(),
            kind: ResourceKind::File,
            visibility: ResourceVisibility::Public,
            size: meta.len(),
            timestamp: modification_millis(&meta),
        }
    }

    fn spec(commands: &[&str]) -> LaunchSpec {
        LaunchSpec {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn expand_substitutes_log_dir_and_pwd() {
        let dirs = ContainerDirs::under(Path::new("/work"), "container_1");
        assert_eq!(
            dirs.expand("run 1><LOG_DIR>/stdout $PWD/*"),
            "run 1>/work/container_1/logs/stdout /work/container_1/*"
        );
    }

    #[tokio::test]
    async fn localize_copies_resource_under_its_name() {
        let source_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let artifact = source_dir.path().join("crawl.sh");
        std::fs::write(&artifact, "#!/bin/sh\necho crawl\n").unwrap();

        let mut resources = BTreeMap::new();
        resources.insert("task".to_string(), staged(&artifact));
        localize(&resources, work_dir.path()).await.unwrap();

        let copied = std::fs::read_to_string(work_dir.path().join("task")).unwrap();
        assert_eq!(copied, "#!/bin/sh\necho crawl\n");
    }

    #[tokio::test]
    async fn localize_refuses_changed_source() {
        let source_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let artifact = source_dir.path().join("crawl.sh");
        std::fs::write(&artifact, "short").unwrap();

        let mut resource = staged(&artifact);
        resource.size += 1;
        let mut resources = BTreeMap::new();
        resources.insert("task".to_string(), resource);

        let err = localize(&resources, work_dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("changed on source"));
        assert!(!work_dir.path().join("task").exists());
    }

    #[tokio::test]
    async fn launch_runs_commands_with_expanded_env() {
        let root = tempfile::tempdir().unwrap();
        let dirs = ContainerDirs::under(root.path(), "container_1");
        let mut spec = spec(&["echo \"$TASK_PATH\" 1><LOG_DIR>/stdout"]);
        spec.environment
            .insert("TASK_PATH".to_string(), "/opt/lib:$PWD/*".to_string());

        let status = launch(&spec, &dirs).await.unwrap().wait().await.unwrap();
        assert!(status.success());

        let stdout = std::fs::read_to_string(dirs.log_dir.join("stdout")).unwrap();
        assert_eq!(
            stdout.trim(),
            format!("/opt/lib:{}/*", dirs.work_dir.display())
        );
    }

    #[tokio::test]
    async fn exit_code_reaches_caller() {
        let root = tempfile::tempdir().unwrap();
        let dirs = ContainerDirs::under(root.path(), "container_2");

        let status = launch(&spec(&["exit 3"]), &dirs)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(
            ContainerExit::from_exit_code(status.code()),
            ContainerExit::Failed { exit_code: 3 }
        );
    }

    #[test]
    fn empty_command_list_is_refused() {
        let dirs = ContainerDirs::under(Path::new("/work"), "container_3");
        assert!(spawn(&LaunchSpec::default(), &dirs).is_err());
    }
}
