//! Dependency-ordered job runner
//!
//! Jobs declare the jobs they need. `Pipeline::new` checks the graph, `waves`
//! groups jobs into topological layers and `run` executes the layers in
//! order. A job only runs when every job it needs succeeded; otherwise it is
//! skipped and names the dependency that blocked it.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::step_runner::RunOptions;

type JobFn<'a> = Box<dyn Fn() -> Result<()> + Send + Sync + 'a>;

/// A named unit of work with its dependencies
pub struct Job<'a> {
    name: String,
    needs: Vec<String>,
    run: JobFn<'a>,
}

impl<'a> Job<'a> {
    pub fn new<F>(name: impl Into<String>, needs: &[&str], run: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'a,
    {
        Self {
            name: name.into(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn needs(&self) -> &[String] {
        &self.needs
    }
}

impl fmt::Debug for Job<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("needs", &self.needs)
            .finish_non_exhaustive()
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Skipped { blocked_by: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "ok"),
            JobOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            JobOutcome::Skipped { blocked_by } => write!(f, "skipped (needs {})", blocked_by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub outcome: JobOutcome,
    pub duration: Duration,
}

/// Outcome of every job, in execution order
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub jobs: Vec<JobReport>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|j| j.outcome.is_success())
    }

    /// Jobs that ran and failed (skipped jobs are not included)
    pub fn failed(&self) -> Vec<&JobReport> {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Failed(_)))
            .collect()
    }

    pub fn outcome(&self, name: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.name == name).map(|j| &j.outcome)
    }

    pub fn order(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.jobs.iter().map(|j| j.duration).sum()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.jobs.iter().map(|j| j.name.len()).max().unwrap_or(0);
        for job in &self.jobs {
            writeln!(
                f,
                "{:<width$}  {:>7.1}s  {}",
                job.name,
                job.duration.as_secs_f64(),
                job.outcome,
                width = width
            )?;
        }
        let verdict = if self.is_success() { "succeeded" } else { "FAILED" };
        write!(f, "pipeline {} in {:.1}s", verdict, self.total_duration().as_secs_f64())
    }
}

/// A validated job graph
pub struct Pipeline<'a> {
    jobs: Vec<Job<'a>>,
    waves: Vec<Vec<usize>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(jobs: Vec<Job<'a>>) -> std::result::Result<Self, PipelineError> {
        let mut index = HashMap::new();
        for (i, job) in jobs.iter().enumerate() {
            if index.insert(job.name.clone(), i).is_some() {
                return Err(PipelineError::DuplicateJob(job.name.clone()));
            }
        }
        for job in &jobs {
            if let Some(need) = job.needs.iter().find(|n| !index.contains_key(*n)) {
                return Err(PipelineError::UnknownNeed {
                    job: job.name.clone(),
                    need: need.clone(),
                });
            }
        }

        let waves = layer(&jobs, &index)?;
        Ok(Self { jobs, waves })
    }

    /// Job names grouped by topological layer, declaration order within a layer
    pub fn waves(&self) -> Vec<Vec<&str>> {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(|&i| self.jobs[i].name.as_str()).collect())
            .collect()
    }

    pub fn jobs(&self) -> &[Job<'a>] {
        &self.jobs
    }

    pub fn run(&self, options: &RunOptions) -> PipelineReport {
        let mut outcomes: HashMap<String, JobOutcome> = HashMap::new();
        let mut report = PipelineReport::default();

        for (n, wave) in self.waves.iter().enumerate() {
            let mut runnable = Vec::new();
            for &i in wave {
                let job = &self.jobs[i];
                let blocked = job
                    .needs
                    .iter()
                    .find(|need| !outcomes.get(need.as_str()).is_some_and(JobOutcome::is_success));
                match blocked {
                    Some(need) => {
                        warn!(job = %job.name, blocked_by = %need, "skipping job");
                        let outcome = JobOutcome::Skipped {
                            blocked_by: need.clone(),
                        };
                        outcomes.insert(job.name.clone(), outcome.clone());
                        report.jobs.push(JobReport {
                            name: job.name.clone(),
                            outcome,
                            duration: Duration::ZERO,
                        });
                    }
                    None => runnable.push(job),
                }
            }

            if runnable.is_empty() {
                continue;
            }
            info!(
                wave = n + 1,
                jobs = ?runnable.iter().map(|j| j.name.as_str()).collect::<Vec<_>>(),
                "starting wave"
            );

            let results: Vec<JobReport> = if options.parallel && runnable.len() > 1 {
                std::thread::scope(|scope| {
                    let handles: Vec<_> = runnable
                        .iter()
                        .map(|&job| (job, scope.spawn(move || execute(job))))
                        .collect();
                    handles
                        .into_iter()
                        .map(|(job, handle)| {
                            handle.join().unwrap_or_else(|_| JobReport {
                                name: job.name.clone(),
                                outcome: JobOutcome::Failed("job panicked".to_string()),
                                duration: Duration::ZERO,
                            })
                        })
                        .collect()
                })
            } else {
                runnable.iter().map(|job| execute(job)).collect()
            };

            for result in results {
                outcomes.insert(result.name.clone(), result.outcome.clone());
                report.jobs.push(result);
            }
        }

        report
    }
}

fn execute(job: &Job<'_>) -> JobReport {
    info!(job = %job.name, "job started");
    let started = Instant::now();
    let outcome = match (job.run)() {
        Ok(()) => JobOutcome::Succeeded,
        Err(e) => {
            error!(job = %job.name, error = %e, "job failed");
            JobOutcome::Failed(e.to_string())
        }
    };
    JobReport {
        name: job.name.clone(),
        outcome,
        duration: started.elapsed(),
    }
}

/// Assign every job to layer `1 + max(layer of its needs)`.
fn layer(
    jobs: &[Job<'_>],
    index: &HashMap<String, usize>,
) -> std::result::Result<Vec<Vec<usize>>, PipelineError> {
    let mut level: Vec<Option<usize>> = vec![None; jobs.len()];
    let mut placed = 0;

    while placed < jobs.len() {
        let mut progressed = false;
        for (i, job) in jobs.iter().enumerate() {
            if level[i].is_some() {
                continue;
            }
            let mut max = Some(0);
            for need in &job.needs {
                match level[index[need]] {
                    Some(l) => max = max.map(|m: usize| m.max(l + 1)),
                    None => {
                        max = None;
                        break;
                    }
                }
            }
            if let Some(l) = max {
                level[i] = Some(l);
                placed += 1;
                progressed = true;
            }
        }
        if !progressed {
            let mut names: Vec<&str> = jobs
                .iter()
                .zip(&level)
                .filter(|(_, l)| l.is_none())
                .map(|(j, _)| j.name.as_str())
                .collect();
            names.sort_unstable();
            return Err(PipelineError::Cycle(names.join(", ")));
        }
    }

    let depth = level.iter().flatten().max().map_or(0, |m| m + 1);
    let mut waves = vec![Vec::new(); depth];
    for (i, l) in level.into_iter().enumerate() {
        if let Some(l) = l {
            waves[l].push(i);
        }
    }
    Ok(waves)
}
