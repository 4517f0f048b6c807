use std::collections::HashMap;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::atlas;
use crate::config::PipelineConfig;
use crate::domain::{AtlasName, ReconMethod};
use crate::error::PipelineError;
use crate::fs_util;
use crate::layout::{Library, SubjectLayout};
use crate::manifest::{Manifest, StepStatus};
use crate::recon;
use crate::scratch::ScratchDir;
use crate::signal::CancelToken;
use crate::status::{self, CompletionRecord, StageStatus};
use crate::steps::{Step, StepContext, StepEnv};
use crate::tools::{Tool, ToolRunner};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Skipped,
    Ran,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub id: String,
    pub action: StepAction,
    pub status: StepStatus,
    pub detail: Option<String>,
    pub outputs: Vec<String>,
}

impl StepOutcome {
    pub fn counts(&self) -> bool {
        self.status == StepStatus::Done
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub subject: String,
    pub surface_recon: ReconMethod,
    pub atlases: Vec<AtlasName>,
    pub status: StageStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub steps: Vec<StepOutcome>,
    pub completion_record: String,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannedState {
    Satisfied,
    Pending,
    Redo,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub id: String,
    pub state: PlannedState,
    pub manifest_status: StepStatus,
    pub missing_inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub subject: String,
    pub surface_recon: ReconMethod,
    pub atlases: Vec<AtlasName>,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone)]
pub struct Preflight {
    pub layout: SubjectLayout,
    pub library: Library,
    pub method: ReconMethod,
    pub atlases: Vec<AtlasName>,
}

enum Disposition {
    Satisfied,
    Blocked(Vec<Utf8PathBuf>),
    Run { redo: bool },
}

pub struct Orchestrator<R: ToolRunner> {
    config: PipelineConfig,
    runner: R,
    cancel: CancelToken,
}

impl<R: ToolRunner> Orchestrator<R> {
    pub fn new(config: PipelineConfig, runner: R, cancel: CancelToken) -> Self {
        Self {
            config,
            runner,
            cancel,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn layout(&self) -> SubjectLayout {
        SubjectLayout::new(
            &self.config.out_root,
            &self.config.pipeline_dir,
            self.config.subject.clone(),
        )
    }

    pub fn preflight(&self, sink: &dyn ProgressSink) -> Result<Preflight, PipelineError> {
        let layout = self.layout();
        let bids_id = layout.bids_id().to_string();
        sink.event(ProgressEvent {
            message: format!("phase=Preflight; checking inputs for {bids_id}"),
            elapsed: None,
        });

        let completed = recon::completed_methods(&layout);
        let method = recon::select_method(&completed, self.config.prefer_fastsurfer, &bids_id)?;

        let required = [
            ("native anatomical image", layout.nativepro_t1w()),
            ("segmentation", layout.nativepro_segmentation()),
            ("surface-space anatomical image", layout.recon_t1(method)),
        ];
        for (what, path) in required {
            if !path.as_std_path().is_file() {
                return Err(PipelineError::missing_input(what, path));
            }
        }

        let library = Library::new(&self.config.library_dir);
        for path in library.required_files() {
            if !path.as_std_path().exists() {
                return Err(PipelineError::MissingLibraryFile(path.to_string()));
            }
        }
        let atlases = atlas::resolve_atlases(&library, &self.config.atlas)?;

        for tool in Tool::ALL {
            if self.runner.locate(tool).is_none() {
                return Err(PipelineError::MissingTool(tool.default_program().to_string()));
            }
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Preflight; surface recon {method}, {} atlas(es)",
                atlases.len()
            ),
            elapsed: None,
        });
        Ok(Preflight {
            layout,
            library,
            method,
            atlases,
        })
    }

    pub fn plan(&self, sink: &dyn ProgressSink) -> Result<PlanResult, PipelineError> {
        let preflight = self.preflight(sink)?;
        let env = self.env(&preflight);
        let manifest = Manifest::load_or_new(
            &preflight.layout.manifest(),
            preflight.layout.bids_id(),
        )?;
        let graph = StepGraph::new(&preflight.atlases, &env);

        let mut states: Vec<PlannedState> = Vec::with_capacity(graph.len());
        let mut steps = Vec::with_capacity(graph.len());
        for index in 0..graph.len() {
            let id = &graph.ids[index];
            let manifest_status = manifest.status(id);
            // A step downstream of one that will run is rebuilt as well.
            let upstream_runs = graph
                .upstream(index)
                .any(|j| matches!(states[j], PlannedState::Pending | PlannedState::Redo));
            let trusted = manifest.trusts_outputs(id) && !upstream_runs;
            let disposition =
                self.classify(&graph, index, trusted, |j| states[j] != PlannedState::Blocked);
            let (state, missing) = match disposition {
                Disposition::Satisfied => (PlannedState::Satisfied, Vec::new()),
                Disposition::Blocked(missing) => (PlannedState::Blocked, missing),
                Disposition::Run { redo: true } => (PlannedState::Redo, Vec::new()),
                Disposition::Run { redo: false } => (PlannedState::Pending, Vec::new()),
            };
            states.push(state);
            steps.push(PlannedStep {
                id: id.clone(),
                state,
                manifest_status,
                missing_inputs: missing.iter().map(ToString::to_string).collect(),
                outputs: graph.outputs[index].iter().map(ToString::to_string).collect(),
            });
        }

        Ok(PlanResult {
            subject: preflight.layout.bids_id().to_string(),
            surface_recon: preflight.method,
            atlases: preflight.atlases.clone(),
            steps,
        })
    }

    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let preflight = self.preflight(sink)?;
        let layout = &preflight.layout;
        let bids_id = layout.bids_id();
        let env = self.env(&preflight);

        let scratch = ScratchDir::create(
            &self.config.tmp_root,
            &format!("{bids_id}_post_structural_"),
            self.config.no_cleanup,
        )?;
        layout.ensure_output_dirs()?;

        let manifest_path = layout.manifest();
        let mut manifest = Manifest::load_or_new(&manifest_path, bids_id)?;
        if let Some(previous) = manifest.recon.filter(|previous| *previous != preflight.method) {
            warn!(
                previous = %previous,
                current = %preflight.method,
                "surface recon method changed since the last run"
            );
        }
        manifest.recon = Some(preflight.method);
        manifest.save(&manifest_path)?;

        let ctx = StepContext::new(&env, scratch.path(), &self.runner, &self.cancel);
        let graph = StepGraph::new(&preflight.atlases, &env);
        let mut outcomes = Vec::with_capacity(graph.len());
        for index in 0..graph.len() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Steps; [{}/{}] {}",
                    index + 1,
                    graph.len(),
                    graph.ids[index]
                ),
                elapsed: None,
            });
            let outcome = self.run_step(&graph, index, &ctx, &mut manifest, &manifest_path, sink)?;
            outcomes.push(outcome);
        }

        let completed_steps = outcomes.iter().filter(|outcome| outcome.counts()).count();
        let total_steps = graph.len();
        let stage_status = StageStatus::from_counts(completed_steps, total_steps);
        let elapsed = started.elapsed();

        let record = CompletionRecord {
            module: CompletionRecord::module_name(),
            status: stage_status,
            progress: CompletionRecord::progress(completed_steps, total_steps),
            completed_steps,
            total_steps,
            subject: bids_id.to_string(),
            participant: format!("sub-{}", self.config.subject.participant),
            session: self
                .config
                .subject
                .session
                .as_ref()
                .map(|session| format!("ses-{session}")),
            surface_recon: preflight.method.to_string(),
            atlases: preflight.atlases.iter().map(ToString::to_string).collect(),
            threads: self.config.threads,
            processing_mode: self.config.proc_mode.clone(),
            user: status::current_user(),
            workstation: status::workstation(),
            date: chrono::Local::now().to_rfc3339(),
            duration_minutes: (elapsed.as_secs_f64() / 60.0 * 100.0).round() / 100.0,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        status::write_completion(layout, &record)?;
        status::append_status_row(layout, &record)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Status; {stage_status} {completed_steps}/{total_steps} steps"
            ),
            elapsed: Some(elapsed),
        });
        if stage_status == StageStatus::Incomplete {
            warn!(
                completed = completed_steps,
                total = total_steps,
                "post-structural stage incomplete"
            );
        }

        Ok(RunReport {
            subject: bids_id.to_string(),
            surface_recon: preflight.method,
            atlases: preflight.atlases.clone(),
            status: stage_status,
            completed_steps,
            total_steps,
            steps: outcomes,
            completion_record: layout.completion_record().to_string(),
            elapsed_seconds: elapsed.as_secs_f64(),
        })
    }

    fn env<'a>(&'a self, preflight: &'a Preflight) -> StepEnv<'a> {
        StepEnv {
            config: &self.config,
            layout: &preflight.layout,
            library: &preflight.library,
            method: preflight.method,
        }
    }

    fn classify(
        &self,
        graph: &StepGraph,
        index: usize,
        trusted: bool,
        available: impl Fn(usize) -> bool,
    ) -> Disposition {
        let outputs_present = graph.outputs[index]
            .iter()
            .all(|path| path.as_std_path().exists());
        if outputs_present && trusted && !self.config.force {
            return Disposition::Satisfied;
        }
        let missing = graph.inputs[index]
            .iter()
            .filter(|path| match graph.producer(path, index) {
                Some(upstream) => !available(upstream),
                None => !path.as_std_path().exists(),
            })
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Disposition::Blocked(missing);
        }
        Disposition::Run {
            redo: outputs_present,
        }
    }

    fn run_step(
        &self,
        graph: &StepGraph,
        index: usize,
        ctx: &StepContext<'_>,
        manifest: &mut Manifest,
        manifest_path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<StepOutcome, PipelineError> {
        let id = graph.ids[index].as_str();
        let outputs = &graph.outputs[index];
        let prior = manifest.status(id);

        let disposition = self.classify(graph, index, manifest.trusts_outputs(id), |upstream| {
            manifest.status(&graph.ids[upstream]) == StepStatus::Done
        });
        let (action, status, detail) = match disposition {
            Disposition::Satisfied => {
                sink.event(ProgressEvent {
                    message: format!("step={id}; outputs present, skipping"),
                    elapsed: None,
                });
                (StepAction::Skipped, StepStatus::Done, None)
            }
            Disposition::Blocked(missing) => {
                let detail = format!("input not available: {}", missing[0]);
                warn!(step = %id, "{detail}");
                (StepAction::Blocked, StepStatus::Failed, Some(detail))
            }
            Disposition::Run { redo } => {
                if redo && !self.config.force {
                    info!(step = %id, prior = %prior, "outputs present but untrusted, redoing");
                }
                manifest.record(id, StepStatus::Running, outputs, None);
                for downstream in graph.downstream(index) {
                    manifest.invalidate(&graph.ids[downstream], id);
                }
                manifest.save(manifest_path)?;
                let started = Instant::now();

                let result = graph.steps[index]
                    .execute(ctx)
                    .and_then(|()| outputs.iter().try_for_each(|path| fs_util::verify_artifact(path)));
                let elapsed = started.elapsed();
                match result {
                    Err(PipelineError::Interrupted) => return Err(PipelineError::Interrupted),
                    Err(err) => {
                        let detail = err.to_string();
                        warn!(step = %id, "step failed: {detail}");
                        sink.event(ProgressEvent {
                            message: format!("step={id}; failed"),
                            elapsed: Some(elapsed),
                        });
                        (StepAction::Ran, StepStatus::Failed, Some(detail))
                    }
                    Ok(()) => {
                        sink.event(ProgressEvent {
                            message: format!("step={id}; done"),
                            elapsed: Some(elapsed),
                        });
                        (StepAction::Ran, StepStatus::Done, None)
                    }
                }
            }
        };

        manifest.record(id, status, outputs, detail.clone());
        manifest.save(manifest_path)?;
        Ok(StepOutcome {
            id: id.to_string(),
            action,
            status,
            detail,
            outputs: outputs.iter().map(ToString::to_string).collect(),
        })
    }
}

struct StepGraph {
    steps: Vec<Step>,
    ids: Vec<String>,
    inputs: Vec<Vec<Utf8PathBuf>>,
    outputs: Vec<Vec<Utf8PathBuf>>,
    producers: HashMap<Utf8PathBuf, usize>,
}

impl StepGraph {
    fn new(atlases: &[AtlasName], env: &StepEnv<'_>) -> Self {
        let steps = Step::sequence(atlases);
        let ids = steps.iter().map(Step::id).collect();
        let inputs = steps.iter().map(|step| step.inputs(env)).collect();
        let outputs = steps
            .iter()
            .map(|step| step.outputs(env))
            .collect::<Vec<_>>();
        let producers = outputs
            .iter()
            .enumerate()
            .flat_map(|(index, paths)| paths.iter().map(move |path| (path.clone(), index)))
            .collect();
        Self {
            steps,
            ids,
            inputs,
            outputs,
            producers,
        }
    }

    fn len(&self) -> usize {
        self.steps.len()
    }

    fn producer(&self, path: &Utf8Path, consumer: usize) -> Option<usize> {
        self.producers
            .get(path)
            .copied()
            .filter(|producer| *producer < consumer)
    }

    fn upstream(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.inputs[index]
            .iter()
            .filter_map(move |path| self.producer(path, index))
    }

    fn downstream(&self, index: usize) -> Vec<usize> {
        (index + 1..self.len())
            .filter(|consumer| self.upstream(*consumer).any(|producer| producer == index))
            .collect()
    }
}
