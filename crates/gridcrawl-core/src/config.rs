//! gridcrawl.toml configuration parser.
//!
//! Every section is optional; a missing file yields the defaults the
//! cluster wiring has always used (one worker, 128 MB / 1 vcore).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{JobSpec, LOG_DIR_EXPANSION_VAR, ResourceShape};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridcrawlConfig {
    pub job: JobConfig,
    pub resources: ResourcesConfig,
    pub task: TaskConfig,
    pub client: ClientConfig,
    pub standalone: StandaloneConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub worker_count: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { worker_count: 1 }
    }
}

/// Shape shared by every container request of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub memory_mb: u64,
    pub vcores: u32,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            memory_mb: 128,
            vcores: 1,
        }
    }
}

impl ResourcesConfig {
    pub fn shape(&self) -> ResourceShape {
        ResourceShape::new(self.memory_mb, self.vcores)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Command template. `{artifact}`, `{input}` and `{output}` are
    /// substituted before launch.
    pub command: String,
    /// File name the artifact is staged under on the container host.
    pub artifact_name: String,
    /// Search-path entries placed ahead of `$PWD/*` in `TASK_PATH`.
    pub application_path: Vec<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            command: "./{artifact} {input} {output}".to_string(),
            artifact_name: "gridcrawl-task".to_string(),
            application_path: vec![
                "$GRIDCRAWL_HOME/lib".to_string(),
                "$GRIDCRAWL_HOME/share/lib".to_string(),
            ],
        }
    }
}

impl TaskConfig {
    /// Render the container command, redirecting output into the
    /// container's log directory.
    pub fn render_command(&self, input: &str, output: &str) -> String {
        with_log_redirects(&render(&self.command, &self.artifact_name, input, output))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub app_name: String,
    pub queue: String,
    pub am_memory_mb: u64,
    pub am_vcores: u32,
    /// Application master command template. Takes the placeholders of
    /// [`TaskConfig::command`] plus `{workers}`.
    pub am_command: String,
    /// File name the artifact is staged under for the application master.
    pub am_artifact_name: String,
    pub report_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: "gridcrawl".to_string(),
            queue: "default".to_string(),
            am_memory_mb: 256,
            am_vcores: 1,
            am_command: "gridcrawld master {input} {output} {artifact} --workers {workers}".to_string(),
            am_artifact_name: "gridcrawl-app".to_string(),
            report_interval_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn am_shape(&self) -> ResourceShape {
        ResourceShape::new(self.am_memory_mb, self.am_vcores)
    }

    /// Render the application master command for `job`. `{artifact}`
    /// expands to the artifact's logical path so the master can stage it
    /// again for its own containers.
    pub fn render_am_command(&self, job: &JobSpec) -> String {
        let command = render(&self.am_command, &job.artifact, &job.input, &job.output)
            .replace("{workers}", &job.worker_count.to_string());
        with_log_redirects(&command)
    }
}

/// Settings for the single-host backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandaloneConfig {
    pub node_name: String,
    pub work_dir: String,
    pub heartbeat_interval_ms: u64,
    pub block_size: u64,
    /// Upper bound reported to the master at registration.
    pub max_memory_mb: u64,
    pub max_vcores: u32,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_string(),
            work_dir: std::env::temp_dir()
                .join("gridcrawl")
                .to_string_lossy()
                .into_owned(),
            heartbeat_interval_ms: 100,
            block_size: 128 * 1024 * 1024,
            max_memory_mb: 8192,
            max_vcores: 8,
        }
    }
}

impl GridcrawlConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridcrawlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Read `path` if given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn render(template: &str, artifact: &str, input: &str, output: &str) -> String {
    template
        .replace("{artifact}", artifact)
        .replace("{input}", input)
        .replace("{output}", output)
}

fn with_log_redirects(command: &str) -> String {
    format!("{command} 1>{LOG_DIR_EXPANSION_VAR}/stdout 2>{LOG_DIR_EXPANSION_VAR}/stderr")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cluster_wiring() {
        let config = GridcrawlConfig::default();
        assert_eq!(config.job.worker_count, 1);
        assert_eq!(config.resources.shape(), ResourceShape::new(128, 1));
        assert_eq!(config.client.am_shape(), ResourceShape::new(256, 1));
        assert_eq!(config.client.queue, "default");
    }

    #[test]
    fn parse_partial_file() {
        let toml_str = r#"
[job]
worker_count = 3

[resources]
memory_mb = 512
"#;
        let config: GridcrawlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.job.worker_count, 3);
        assert_eq!(config.resources.memory_mb, 512);
        assert_eq!(config.resources.vcores, 1);
        assert_eq!(config.client.report_interval_ms, 1000);
    }

    #[test]
    fn request_priority_is_not_configurable() {
        let toml_str = r#"
[resources]
vcores = 2
priority = 7
"#;
        let config: GridcrawlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resources, ResourcesConfig { memory_mb: 128, vcores: 2 });
        assert!(!config.to_toml_string().unwrap().contains("priority"));
    }

    #[test]
    fn load_without_path_uses_defaults() {
        let config = GridcrawlConfig::load(None).unwrap();
        assert_eq!(config, GridcrawlConfig::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridcrawl.toml");
        std::fs::write(&path, "[client]\nqueue = \"batch\"\n").unwrap();

        let config = GridcrawlConfig::load(Some(&path)).unwrap();
        assert_eq!(config.client.queue, "batch");
    }

    #[test]
    fn round_trips_through_toml() {
        let config = GridcrawlConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed: GridcrawlConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn task_command_substitutes_and_redirects() {
        let task = TaskConfig::default();
        let cmd = task.render_command("hdfs:/in.tsv", "hdfs:/out.tsv");
        assert_eq!(
            cmd,
            "./gridcrawl-task hdfs:/in.tsv hdfs:/out.tsv 1><LOG_DIR>/stdout 2><LOG_DIR>/stderr"
        );
    }

    #[test]
    fn am_command_carries_artifact_path() {
        let client = ClientConfig::default();
        let job = JobSpec::new("in", "out", "/apps/crawl.bin", 4);
        let cmd = client.render_am_command(&job);
        assert!(cmd.starts_with("gridcrawld master in out /apps/crawl.bin --workers 4"));
        assert!(cmd.ends_with("2><LOG_DIR>/stderr"));
    }
}
