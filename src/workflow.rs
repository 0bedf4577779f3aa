//! The deployment workflow: six stages wired into a pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::config_file::DeployConfig;
use crate::error::Result;
use crate::pipeline::{Job, Pipeline, PipelineReport};
use crate::remote_script::RemoteScript;
use crate::secrets::SecretValues;
use crate::step_runner::{RunOptions, run_remote_safe, run_upload_safe};
use crate::steps::{CleanArgs, DependenciesArgs, RuntimeArgs, SecretsArgs, ServicesArgs};
use crate::transport::{Transport, UploadPlan};
use crate::types::Stage;
use crate::units::ServiceUnits;

/// What a stage will do, for `botdeploy plan`
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage: Stage,
    pub needs: Vec<Stage>,
    pub destructive: bool,
    pub timeout: Option<Duration>,
    /// Remote script, or the SFTP batch for the transfer stage
    pub script: String,
    /// Redacted stdin payload
    pub stdin: Option<String>,
}

/// A generated file, for `botdeploy render`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub contents: String,
    /// Written with mode 0600
    pub private: bool,
}

/// Every stage's inputs, resolved from one configuration
#[derive(Debug, Clone)]
pub struct DeployWorkflow {
    clean: CleanArgs,
    runtime: RuntimeArgs,
    source_dir: PathBuf,
    remote_path: String,
    exclude: Vec<String>,
    dependencies: DependenciesArgs,
    secrets: SecretsArgs,
    services: ServicesArgs,
}

impl DeployWorkflow {
    pub fn from_config(config: &DeployConfig, secrets: SecretValues) -> Self {
        let remote_path = config.remote_path();
        Self {
            clean: CleanArgs {
                path: remote_path.clone(),
            },
            runtime: RuntimeArgs {
                interpreter: config.runtime.interpreter.clone(),
                package_manager: config.runtime.package_manager,
                packages: config.runtime.packages(),
            },
            source_dir: config.source_dir.clone(),
            remote_path: remote_path.clone(),
            exclude: config.exclude.clone(),
            dependencies: DependenciesArgs {
                path: remote_path.clone(),
                interpreter: config.runtime.interpreter.clone(),
                requirements: config.requirements_file.clone(),
                timeout: Duration::from_secs(config.dependency_timeout_secs),
            },
            secrets: SecretsArgs {
                path: remote_path,
                file: config.secrets.file.clone(),
                values: secrets,
            },
            services: ServicesArgs {
                units: ServiceUnits::build(config),
            },
        }
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn units(&self) -> &ServiceUnits {
        &self.services.units
    }

    /// Walk the local source tree
    pub fn upload_plan(&self) -> Result<UploadPlan> {
        Ok(UploadPlan::build(
            &self.source_dir,
            &self.remote_path,
            &self.exclude,
        )?)
    }

    /// Typed script for every stage except `transfer`
    fn script(&self, stage: Stage) -> Option<&dyn RemoteScript> {
        match stage {
            Stage::Clean => Some(&self.clean),
            Stage::Runtime => Some(&self.runtime),
            Stage::Transfer => None,
            Stage::Dependencies => Some(&self.dependencies),
            Stage::Secrets => Some(&self.secrets),
            Stage::Services => Some(&self.services),
        }
    }

    /// Describe every stage without running anything
    pub fn plan(&self) -> Result<Vec<StagePlan>> {
        Stage::all()
            .into_iter()
            .map(|stage| -> Result<StagePlan> {
                let (script, stdin, timeout) = match self.script(stage) {
                    Some(s) => (s.script(), s.redacted_stdin(), s.timeout()),
                    None => (self.upload_plan()?.batch_script(), None, None),
                };
                Ok(StagePlan {
                    stage,
                    needs: stage.needs().to_vec(),
                    destructive: stage.is_destructive(),
                    timeout,
                    script,
                    stdin,
                })
            })
            .collect()
    }

    /// The secrets file and both unit files as they would be written remotely
    pub fn artifacts(&self) -> Vec<Artifact> {
        let units = self.units();
        vec![
            Artifact {
                file_name: self.secrets.file.clone(),
                contents: self.secrets.values.render(),
                private: true,
            },
            Artifact {
                file_name: units.main_unit(),
                contents: units.main.render(),
                private: false,
            },
            Artifact {
                file_name: units.watcher_unit(),
                contents: units.watcher.render(),
                private: false,
            },
        ]
    }

    /// Write `artifacts()` into `dir`
    pub fn write_artifacts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for artifact in self.artifacts() {
            let path = dir.join(&artifact.file_name);
            write_artifact(&path, &artifact)?;
            written.push(path);
        }
        Ok(written)
    }

    /// One pipeline job per stage, edges from `Stage::needs`
    pub fn pipeline<'a>(
        &'a self,
        transport: &'a dyn Transport,
        options: &'a RunOptions,
    ) -> Result<Pipeline<'a>> {
        let jobs = Stage::all()
            .into_iter()
            .map(|stage| {
                let needs: Vec<&str> = stage.needs().iter().map(|s| s.name()).collect();
                Job::new(stage.name(), &needs, move || {
                    self.run_stage(stage, transport, options)
                })
            })
            .collect();
        Ok(Pipeline::new(jobs)?)
    }

    pub fn run(&self, transport: &dyn Transport, options: &RunOptions) -> Result<PipelineReport> {
        info!(
            remote = %self.remote_path,
            transport = transport.name(),
            dry_run = options.dry_run,
            parallel = options.parallel,
            "starting deployment"
        );
        let report = self.pipeline(transport, options)?.run(options);
        info!(success = report.is_success(), "deployment finished");
        Ok(report)
    }

    fn run_stage(&self, stage: Stage, transport: &dyn Transport, options: &RunOptions) -> Result<()> {
        match self.script(stage) {
            Some(script) => run_remote_safe(transport, script, options)?.ensure_success(stage.name()),
            None => {
                let plan = self.upload_plan()?;
                run_upload_safe(transport, &plan, options)?.ensure_success(stage.name())
            }
        }
    }
}

fn write_artifact(path: &Path, artifact: &Artifact) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mode = if artifact.private { 0o600 } else { 0o644 };
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    // `mode` only applies on creation; a rerun must tighten an existing file
    file.set_permissions(std::fs::Permissions::from_mode(mode))?;
    file.write_all(artifact.contents.as_bytes())?;
    Ok(())
}
