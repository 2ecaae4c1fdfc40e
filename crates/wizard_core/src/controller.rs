//! Session controller for a multi-step form.
//!
//! The controller owns the draft, the completion flags and the active step
//! of one wizard session. Step forms report validated patches through
//! [`WizardController::report_step_result`]; the controller merges them,
//! gates navigation according to the session's [`ModePolicy`] and talks to
//! the [`RecordStore`] at the two points that need the network: loading an
//! existing record and saving a step.
//!
//! State is kept behind a synchronous mutex that is never held across a
//! store call. Work that resumes after a store call first checks that the
//! controller is still alive and that the session it started in has not been
//! reset or re-initialized; otherwise the result is dropped.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use shared::{
    domain::{CompletionMap, Draft, Mode, Record, RecordId, StepId},
    protocol::SearchFilter,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::{StoreError, WizardError},
    policy::{ModePolicy, SaveStrategy},
    steps::StepSequence,
    store::{MissingRecordStore, RecordStore},
    types::{Navigation, StepOutcome, StepView, WizardEvent},
};

const EVENT_CAPACITY: usize = 256;

pub struct WizardController {
    steps: StepSequence,
    store: Arc<dyn RecordStore>,
    inner: Mutex<WizardState>,
    in_flight: AtomicBool,
    alive: AtomicBool,
    events: broadcast::Sender<WizardEvent>,
}

struct WizardState {
    policy: ModePolicy,
    record_id: Option<RecordId>,
    draft: Draft,
    initial_draft: Draft,
    completion: CompletionMap,
    active: usize,
    generation: u64,
}

impl WizardState {
    fn fresh(steps: &StepSequence, mode: Mode, generation: u64) -> Self {
        Self {
            policy: ModePolicy::for_mode(mode),
            record_id: None,
            draft: Draft::new(),
            initial_draft: Draft::new(),
            completion: CompletionMap::for_steps(steps.ids()),
            active: 0,
            generation,
        }
    }
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Validated patch waiting for its store write to finish.
struct PendingCommit {
    index: usize,
    generation: u64,
    candidate: Draft,
}

impl WizardController {
    /// A controller with no record store wired in. Create-mode sessions work
    /// until the terminal step; anything that needs the store fails.
    pub fn new(steps: StepSequence) -> Arc<Self> {
        Self::new_with_store(steps, Arc::new(MissingRecordStore))
    }

    /// Starts in an empty Create-mode session; call [`Self::initialize`] to
    /// pick the mode and load an existing record.
    pub fn new_with_store(steps: StepSequence, store: Arc<dyn RecordStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = WizardState::fresh(&steps, Mode::Create, 0);
        Arc::new(Self {
            steps,
            store,
            inner: Mutex::new(state),
            in_flight: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            events,
        })
    }

    pub async fn initialize(
        &self,
        mode: Mode,
        existing_record_id: Option<RecordId>,
    ) -> Result<(), WizardError> {
        self.ensure_alive()?;
        let policy = ModePolicy::for_mode(mode);
        if policy.requires_record && existing_record_id.is_none() {
            return Err(WizardError::MissingRecordId { mode });
        }
        let _guard = self.begin_request()?;

        let generation = {
            let mut state = self.state();
            let generation = state.generation + 1;
            *state = WizardState::fresh(&self.steps, mode, generation);
            generation
        };
        self.emit(WizardEvent::ActiveStepChanged(self.steps.first().id.clone()));

        let Some(record_id) = existing_record_id else {
            info!(%mode, "wizard session initialized");
            self.emit(WizardEvent::Initialized {
                mode,
                record_id: None,
            });
            return Ok(());
        };

        let loaded = self.load_record(&record_id).await;

        let mut state = self.state();
        self.ensure_current(&state, generation)?;
        let record = match loaded {
            Ok(record) => record,
            Err(source) => {
                warn!(%mode, %record_id, error = %source, "failed to load record for wizard");
                return Err(WizardError::Load { record_id, source });
            }
        };

        state.draft = record.data.clone();
        state.initial_draft = record.data;
        // Create mode only uses the loaded record as a template.
        if mode != Mode::Create {
            state.record_id = Some(record.id);
        }
        let record_id = state.record_id.clone();
        drop(state);

        info!(%mode, record_id = ?record_id, "wizard session initialized from existing record");
        self.emit(WizardEvent::Initialized { mode, record_id });
        Ok(())
    }

    async fn load_record(&self, record_id: &RecordId) -> Result<Record, StoreError> {
        let records = self
            .store
            .search(&SearchFilter::by_id(record_id.clone()))
            .await?;
        records
            .into_iter()
            .find(|record| &record.id == record_id)
            .ok_or_else(|| StoreError::NotFound(format!("record {record_id}")))
    }

    /// Merges a step's patch once its form validated it locally.
    ///
    /// `validation_passed == false` is answered with
    /// [`StepOutcome::ValidationFailed`] and changes nothing. In Create mode
    /// only the terminal step touches the store; in Edit mode every step
    /// upserts the full merged draft and nothing is committed locally unless
    /// that write succeeds.
    pub async fn report_step_result(
        &self,
        step: &StepId,
        patch: Draft,
        validation_passed: bool,
    ) -> Result<StepOutcome, WizardError> {
        self.ensure_alive()?;
        let index = self.index_of(step)?;
        if !validation_passed {
            debug!(%step, "step validation failed; patch discarded");
            return Ok(StepOutcome::ValidationFailed);
        }
        self.check_field_groups(index, &patch)?;
        let _guard = self.begin_request()?;

        let (policy, record_id, pending) = {
            let state = self.state();
            if !state.policy.allows_mutation() {
                return Err(WizardError::ReadOnly);
            }
            if let Some(blocking) = self.blocking_step(&state, index) {
                return Err(WizardError::StepLocked {
                    step: step.clone(),
                    blocking: self.steps[blocking].id.clone(),
                });
            }
            let mut candidate = state.draft.clone();
            candidate.merge_patch(patch);
            (
                state.policy,
                state.record_id.clone(),
                PendingCommit {
                    index,
                    generation: state.generation,
                    candidate,
                },
            )
        };

        let terminal = self.steps.is_terminal(index);
        let write_id = match policy.save {
            SaveStrategy::ReadOnly => return Err(WizardError::ReadOnly),
            SaveStrategy::DeferToTerminal if !terminal => {
                let mut state = self.state();
                self.ensure_current(&state, pending.generation)?;
                return Ok(self.commit(&mut state, pending, None));
            }
            SaveStrategy::DeferToTerminal => record_id,
            SaveStrategy::WriteThrough => match record_id {
                Some(id) => Some(id),
                None => return Err(WizardError::MissingRecordId { mode: policy.mode }),
            },
        };

        info!(%step, mode = %policy.mode, record_id = ?write_id, "saving wizard draft");
        let saved = self
            .store
            .insert(write_id.as_ref(), &pending.candidate)
            .await;

        let mut state = self.state();
        if let Err(err) = self.ensure_current(&state, pending.generation) {
            warn!(%step, error = %err, "discarding save result for a stale wizard session");
            return Err(err);
        }
        match saved {
            Ok(record) => {
                if policy.save == SaveStrategy::DeferToTerminal {
                    state.record_id = Some(record.id.clone());
                }
                Ok(self.commit(&mut state, pending, Some(record)))
            }
            Err(source) => {
                drop(state);
                warn!(%step, mode = %policy.mode, error = %source, "failed to save wizard step");
                self.emit(WizardEvent::SaveFailed {
                    step: step.clone(),
                    message: source.to_string(),
                });
                Err(WizardError::Save {
                    step: step.clone(),
                    source,
                })
            }
        }
    }

    fn commit(
        &self,
        state: &mut WizardState,
        pending: PendingCommit,
        record: Option<Record>,
    ) -> StepOutcome {
        let step = self.steps[pending.index].id.clone();
        state.draft = pending.candidate;
        state.completion.mark_complete(&step);
        self.emit(WizardEvent::StepCommitted {
            step: step.clone(),
            saved: record.is_some(),
        });

        match record {
            Some(record) if self.steps.is_terminal(pending.index) => {
                state.active = pending.index;
                info!(%step, record_id = %record.id, "wizard completed");
                self.emit(WizardEvent::Completed(record.clone()));
                StepOutcome::Completed { record }
            }
            _ => {
                state.active = (pending.index + 1).min(self.steps.len() - 1);
                let to = self.steps[state.active].id.clone();
                debug!(from = %step, to = %to, "step committed; advancing");
                self.emit(WizardEvent::ActiveStepChanged(to.clone()));
                StepOutcome::Advanced { to }
            }
        }
    }

    pub fn advance(&self) -> Result<Navigation, WizardError> {
        self.ensure_alive()?;
        let mut state = self.state();
        let next = state.active + 1;
        if next >= self.steps.len() {
            return Ok(Navigation::AtBoundary);
        }
        if let Some(blocking) = self.blocking_step(&state, next) {
            let blocking = self.steps[blocking].id.clone();
            debug!(%blocking, "advance blocked by incomplete step");
            return Ok(Navigation::Blocked { blocking });
        }
        Ok(self.move_to(&mut state, next))
    }

    /// Always permitted; going back never needs completed steps.
    pub fn retreat(&self) -> Result<Navigation, WizardError> {
        self.ensure_alive()?;
        let mut state = self.state();
        if state.active == 0 {
            return Ok(Navigation::AtBoundary);
        }
        let previous = state.active - 1;
        Ok(self.move_to(&mut state, previous))
    }

    /// Runs the checks a valid report from `step` would face before any store
    /// call, without changing the session. Lets callers skip side effects,
    /// such as uploads, for a report the controller would refuse.
    pub fn check_report(&self, step: &StepId, patch: &Draft) -> Result<(), WizardError> {
        self.ensure_alive()?;
        let index = self.index_of(step)?;
        self.check_field_groups(index, patch)?;
        if self.is_in_flight() {
            return Err(WizardError::InFlight);
        }
        let state = self.state();
        if !state.policy.allows_mutation() {
            return Err(WizardError::ReadOnly);
        }
        if let Some(blocking) = self.blocking_step(&state, index) {
            return Err(WizardError::StepLocked {
                step: step.clone(),
                blocking: self.steps[blocking].id.clone(),
            });
        }
        Ok(())
    }

    /// Unknown steps are never accessible.
    pub fn is_accessible(&self, step: &StepId) -> bool {
        let Some(index) = self.steps.index_of(step) else {
            return false;
        };
        let state = self.state();
        self.blocking_step(&state, index).is_none()
    }

    /// Moves to `step` when it is accessible; otherwise lands on the earliest
    /// incomplete step before it.
    pub fn jump_to(&self, step: &StepId) -> Result<Navigation, WizardError> {
        self.ensure_alive()?;
        let index = self.index_of(step)?;
        let mut state = self.state();
        match self.blocking_step(&state, index) {
            None => Ok(self.move_to(&mut state, index)),
            Some(blocking) => {
                self.move_to(&mut state, blocking);
                let to = self.steps[blocking].id.clone();
                debug!(requested = %step, %to, "jump redirected to incomplete prerequisite");
                Ok(Navigation::Redirected {
                    requested: step.clone(),
                    to,
                })
            }
        }
    }

    /// Returns the session to its start state: the initial draft (empty, or
    /// the loaded record), no completed steps, first step active. Mode and
    /// steps are kept. A loaded record id is kept; an id minted by a completed
    /// Create run is dropped so the next run creates a new record. A save
    /// still in flight is discarded when it resolves.
    pub fn reset(&self) -> Result<(), WizardError> {
        self.ensure_alive()?;
        {
            let mut state = self.state();
            state.draft = state.initial_draft.clone();
            state.completion = CompletionMap::for_steps(self.steps.ids());
            state.active = 0;
            if state.policy.save == SaveStrategy::DeferToTerminal {
                state.record_id = None;
            }
            state.generation += 1;
            info!(mode = %state.policy.mode, "wizard session reset");
        }
        self.emit(WizardEvent::Reset);
        self.emit(WizardEvent::ActiveStepChanged(self.steps.first().id.clone()));
        Ok(())
    }

    /// Tears the session down. Later calls fail with [`WizardError::Disposed`]
    /// and outstanding store calls are ignored when they resolve.
    pub fn dispose(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!("wizard session disposed");
            self.emit(WizardEvent::Disposed);
        }
    }

    pub fn step_view(&self, step: &StepId) -> Result<StepView, WizardError> {
        self.ensure_alive()?;
        let index = self.index_of(step)?;
        let owner = &self.steps[index];
        let state = self.state();
        Ok(StepView {
            step: owner.id.clone(),
            label: owner.label.clone(),
            mode: state.policy.mode,
            data: state
                .draft
                .slice(owner.field_groups.iter().map(String::as_str)),
            completion: state.completion.clone(),
            editable: state.policy.allows_mutation(),
            accessible: self.blocking_step(&state, index).is_none(),
            active: state.active == index,
        })
    }

    pub fn steps(&self) -> &StepSequence {
        &self.steps
    }

    pub fn active_step(&self) -> StepId {
        let active = self.state().active;
        self.steps[active].id.clone()
    }

    pub fn mode(&self) -> Mode {
        self.state().policy.mode
    }

    pub fn policy(&self) -> ModePolicy {
        self.state().policy
    }

    pub fn draft(&self) -> Draft {
        self.state().draft.clone()
    }

    pub fn completion(&self) -> CompletionMap {
        self.state().completion.clone()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.state().record_id.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WizardEvent> {
        self.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, WizardState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WizardEvent) {
        let _ = self.events.send(event);
    }

    fn index_of(&self, step: &StepId) -> Result<usize, WizardError> {
        self.steps
            .index_of(step)
            .ok_or_else(|| WizardError::UnknownStep(step.clone()))
    }

    fn check_field_groups(&self, index: usize, patch: &Draft) -> Result<(), WizardError> {
        let owner = &self.steps[index];
        match patch.groups().find(|group| !owner.owns_group(group)) {
            Some(group) => Err(WizardError::ForeignFieldGroup {
                step: owner.id.clone(),
                group: group.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Earliest incomplete step before `index` when the mode gates navigation.
    fn blocking_step(&self, state: &WizardState, index: usize) -> Option<usize> {
        if !state.policy.gates_navigation {
            return None;
        }
        (0..index).find(|&earlier| !state.completion.is_complete(&self.steps[earlier].id))
    }

    fn move_to(&self, state: &mut WizardState, index: usize) -> Navigation {
        let to = self.steps[index].id.clone();
        if state.active != index {
            state.active = index;
            debug!(%to, "active step changed");
            self.emit(WizardEvent::ActiveStepChanged(to.clone()));
        }
        Navigation::Moved { to }
    }

    fn begin_request(&self) -> Result<InFlightGuard<'_>, WizardError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WizardError::InFlight)?;
        Ok(InFlightGuard {
            flag: &self.in_flight,
        })
    }

    fn ensure_alive(&self) -> Result<(), WizardError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(WizardError::Disposed)
        }
    }

    fn ensure_current(&self, state: &WizardState, generation: u64) -> Result<(), WizardError> {
        self.ensure_alive()?;
        if state.generation != generation {
            return Err(WizardError::Superseded);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
