//! Reconciliation state for one tracking record.
//!
//! [`TrackingSession`] owns everything the operator works on: the view
//! results, the actual-parts list, the migration state and the open
//! annotation editor. Remote calls go through the collaborator traits in
//! [`crate::service`].

use futures::future::join_all;
use image::DynamicImage;

use crate::aggregate::{AggregateCache, AggregateKey, DetectionAggregate, PartAggregate};
use crate::annotation::AnnotationEditor;
use crate::autosave::{AutoSaveCoordinator, Clock, SaveGate, SystemClock};
use crate::catalog::MaterialCatalog;
use crate::config::TrackerConfig;
use crate::error::{Result, ServiceError, ValidationError};
use crate::migration::{MigrationReport, MigrationState, PartStage};
use crate::model::{
    ActualPart, DetectionBox, DetectionResultsPayload, DetectionSettings, TestStatus, TrackingPayload,
    TrackingRecord, ViewDetectionResult, ViewKind,
};
use crate::parts::ActualPartsList;
use crate::service::{Capabilities, InferenceService, MaterialsCatalog, TrackingStore};

/// One image queued for detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// View tag; detection refuses to start while any upload lacks one.
    pub view: Option<ViewKind>,
    /// Encoded image bytes
    pub image: Vec<u8>,
}

impl Upload {
    pub fn new(view: ViewKind, image: Vec<u8>) -> Self {
        Self {
            view: Some(view),
            image,
        }
    }

    pub fn untagged(image: Vec<u8>) -> Self {
        Self { view: None, image }
    }
}

/// An upload whose inference call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedView {
    /// Position in the upload list
    pub index: usize,
    pub view: ViewKind,
    pub error: ServiceError,
}

/// Outcome of a detection run, in upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionRunReport {
    pub detected: Vec<ViewKind>,
    pub failed: Vec<FailedView>,
}

impl DetectionRunReport {
    /// Every upload produced a result.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn checked<T>(result: std::result::Result<T, ValidationError>) -> Result<T> {
    result.map_err(|e| {
        log::warn!("{}", e);
        e.into()
    })
}

fn remote<T>(result: std::result::Result<T, ServiceError>, action: &str) -> Result<T> {
    result.map_err(|e| {
        log::error!("Failed to {}: {}", action, e);
        e.into()
    })
}

/// A tracking record opened for detection review and part reconciliation.
pub struct TrackingSession<S, I, M, C: Clock = SystemClock> {
    record_id: i64,
    store: S,
    inference: I,
    materials: M,
    capabilities: Capabilities,
    config: TrackerConfig,

    /// General fields of the last loaded record.
    record: TrackingRecord,
    settings: DetectionSettings,
    results: Vec<ViewDetectionResult>,
    results_revision: u64,
    parts: ActualPartsList,
    migration: MigrationState,
    cache: AggregateCache,
    editor: Option<AnnotationEditor>,
    catalog: MaterialCatalog,
    autosave: AutoSaveCoordinator<C>,
}

impl<S, I, M, C> TrackingSession<S, I, M, C>
where
    S: TrackingStore,
    I: InferenceService,
    M: MaterialsCatalog,
    C: Clock,
{
    /// Create an empty session. Nothing is fetched until [`load`](Self::load).
    pub fn new(
        record_id: i64,
        store: S,
        inference: I,
        materials: M,
        capabilities: Capabilities,
        config: TrackerConfig,
        clock: C,
    ) -> Self {
        let autosave = AutoSaveCoordinator::new(
            clock,
            config.autosave.debounce(),
            SaveGate::new(),
            capabilities.can_edit,
        );
        Self {
            record_id,
            store,
            inference,
            materials,
            capabilities,
            settings: config.detection,
            config,
            record: TrackingRecord {
                id: record_id,
                ..Default::default()
            },
            results: Vec::new(),
            results_revision: 0,
            parts: ActualPartsList::new(),
            migration: MigrationState::new(),
            cache: AggregateCache::new(),
            editor: None,
            catalog: MaterialCatalog::default(),
            autosave,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn record_id(&self) -> i64 {
        self.record_id
    }

    pub fn record(&self) -> &TrackingRecord {
        &self.record
    }

    pub fn settings(&self) -> DetectionSettings {
        self.settings
    }

    pub fn results(&self) -> &[ViewDetectionResult] {
        &self.results
    }

    pub fn parts(&self) -> &ActualPartsList {
        &self.parts
    }

    pub fn migration(&self) -> &MigrationState {
        &self.migration
    }

    pub fn catalog(&self) -> &MaterialCatalog {
        &self.catalog
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn inference(&self) -> &I {
        &self.inference
    }

    pub fn clock(&self) -> &C {
        self.autosave.clock()
    }

    /// Gate shared by explicit saves and autosaves.
    pub fn save_gate(&self) -> &SaveGate {
        self.autosave.gate()
    }

    pub fn is_autosave_pending(&self) -> bool {
        self.autosave.is_pending()
    }

    /// Saved detections lock uploads and thresholds until reset.
    pub fn detections_locked(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.autosave.set_can_edit(capabilities.can_edit);
        self.capabilities = capabilities;
    }

    fn ensure_can_edit(&self) -> std::result::Result<(), ValidationError> {
        if self.capabilities.can_edit {
            Ok(())
        } else {
            Err(ValidationError::EditNotPermitted {
                role: self.capabilities.role.clone(),
            })
        }
    }

    fn parts_changed(&mut self) {
        self.autosave.observe(self.parts.revision());
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Fetch the record and the materials catalog.
    ///
    /// Changes applied while loading never schedule an autosave. A failed
    /// catalog fetch is logged and leaves the catalog empty.
    pub async fn load(&mut self) -> Result<()> {
        let record = remote(self.store.get_record(self.record_id).await, "load tracking record")?;
        self.autosave.begin_hydration();
        self.apply_record(record, false);

        match self.materials.list_materials().await {
            Ok(materials) => self.catalog = MaterialCatalog::new(materials),
            Err(e) => log::warn!("Failed to load materials catalog: {}", e),
        }

        self.autosave.finish_hydration(self.parts.revision());
        log::info!(
            "Loaded tracking record {} ({} views, {} actual parts)",
            self.record_id,
            self.results.len(),
            self.parts.len()
        );
        Ok(())
    }

    /// Replace local state with a record fetched from the store.
    ///
    /// With `keep_choices`, pending quantities survive as long as the record
    /// still carries detection results.
    fn apply_record(&mut self, mut record: TrackingRecord, keep_choices: bool) {
        let defaults = self.config.detection;
        self.settings = record
            .detection_settings
            .take()
            .unwrap_or(defaults)
            .or_defaults(defaults);
        self.set_results(record.detection_results.take().unwrap_or_default());
        self.parts
            .replace(record.actual_parts.take().unwrap_or_default());
        self.record = record;

        if !keep_choices || self.results.is_empty() {
            self.migration.clear();
        }
        let key = self.aggregate_key();
        let agg = self.cache.get_or_compute(
            key,
            &self.results,
            self.editor.as_ref().map(AnnotationEditor::view),
        );
        self.migration.reconcile(agg, &self.parts);
    }

    fn set_results(&mut self, results: Vec<ViewDetectionResult>) {
        self.results = results;
        self.results_revision += 1;
        let open_view = self.editor.as_ref().map(|e| e.view().view);
        if let Some(view) = open_view {
            if !self.results.iter().any(|r| r.view == view) {
                log::debug!("Closing editor for view '{}' which no longer exists", view);
                self.editor = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Aggregate
    // ------------------------------------------------------------------

    fn aggregate_key(&self) -> AggregateKey {
        AggregateKey {
            results_revision: self.results_revision,
            edit_revision: self.editor.as_ref().map(AnnotationEditor::revision),
        }
    }

    fn with_aggregate<T>(
        &mut self,
        f: impl FnOnce(&DetectionAggregate, &mut MigrationState, &mut ActualPartsList) -> T,
    ) -> T {
        let key = self.aggregate_key();
        let agg = self.cache.get_or_compute(
            key,
            &self.results,
            self.editor.as_ref().map(AnnotationEditor::view),
        );
        self.migration.sync_defaults(agg);
        f(agg, &mut self.migration, &mut self.parts)
    }

    /// Per-part aggregate of all views, with the open editor's live counts.
    pub fn aggregate(&mut self) -> &DetectionAggregate {
        let key = self.aggregate_key();
        let agg = self.cache.get_or_compute(
            key,
            &self.results,
            self.editor.as_ref().map(AnnotationEditor::view),
        );
        self.migration.sync_defaults(agg);
        agg
    }

    /// Aggregate parts for display, migrated parts last.
    pub fn ordered_parts(&mut self) -> Vec<PartAggregate> {
        self.with_aggregate(|agg, migration, _| {
            agg.ordered(migration.migrated())
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Per-view breakdown of one detected part.
    pub fn part_gallery(&mut self, name: &str) -> Result<PartAggregate> {
        let part = self.with_aggregate(|agg, _, _| agg.get(name).cloned());
        checked(part.ok_or_else(|| ValidationError::NotDetected {
            name: name.to_string(),
        }))
    }

    pub fn part_stage(&mut self, name: &str) -> PartStage {
        self.with_aggregate(|agg, migration, _| migration.stage(name, agg))
    }

    /// Detected parts that are not migrated yet.
    pub fn unmigrated_count(&mut self) -> usize {
        self.with_aggregate(|agg, migration, _| agg.unmigrated_count(migration.migrated()))
    }

    /// Actual parts that revert-all would remove.
    pub fn revertable_count(&mut self) -> usize {
        self.with_aggregate(|agg, migration, parts| migration.revertable_count(agg, parts))
    }

    // ------------------------------------------------------------------
    // Detection runs
    // ------------------------------------------------------------------

    /// Change inference thresholds for the next run.
    pub fn set_detection_settings(&mut self, settings: DetectionSettings) -> Result<()> {
        checked(self.ensure_can_edit())?;
        if self.detections_locked() {
            return checked(Err(ValidationError::DetectionsLocked));
        }
        self.settings = settings.or_defaults(self.config.detection);
        Ok(())
    }

    /// Run inference on every upload and save the results.
    ///
    /// Calls run concurrently; results keep upload order. Views whose call
    /// failed are reported and left out while the others are kept, even when
    /// saving them afterwards fails.
    pub async fn run_detection(&mut self, uploads: &[Upload]) -> Result<DetectionRunReport> {
        checked(self.ensure_can_edit())?;
        if self.detections_locked() {
            return checked(Err(ValidationError::DetectionsLocked));
        }
        if uploads.is_empty() {
            return checked(Err(ValidationError::NoUploads));
        }
        let mut views = Vec::with_capacity(uploads.len());
        for (index, upload) in uploads.iter().enumerate() {
            match upload.view {
                Some(view) if !upload.image.is_empty() => views.push(view),
                _ => return checked(Err(ValidationError::MissingView { index })),
            }
        }

        self.editor = None;
        self.migration.clear();
        let settings = self.settings;
        log::info!(
            "Running detection on {} images (confidence {}, iou {})",
            uploads.len(),
            settings.confidence,
            settings.iou
        );

        let responses = join_all(
            uploads
                .iter()
                .map(|upload| self.inference.predict(&upload.image, settings)),
        )
        .await;

        let mut report = DetectionRunReport::default();
        let mut results = Vec::with_capacity(responses.len());
        for (index, (view, response)) in views.into_iter().zip(responses).enumerate() {
            match response {
                Ok(prediction) => {
                    results.push(ViewDetectionResult::from_prediction(view, prediction));
                    report.detected.push(view);
                }
                Err(error) => {
                    log::error!("Detection failed for image #{} ({}): {}", index, view, error);
                    report.failed.push(FailedView { index, view, error });
                }
            }
        }
        self.set_results(results);
        if self.results.is_empty() {
            return Ok(report);
        }

        let payload = DetectionResultsPayload {
            settings,
            results: self.results.clone(),
        };
        remote(
            self.store
                .put_detection_results(self.record_id, &payload)
                .await,
            "save detection results",
        )?;
        log::info!(
            "Saved detection results for {} of {} views",
            report.detected.len(),
            uploads.len()
        );
        Ok(report)
    }

    /// Delete all saved detections. Actual parts are kept.
    pub async fn reset_detections(&mut self) -> Result<()> {
        checked(self.ensure_can_edit())?;
        remote(
            self.store.delete_detection_results(self.record_id).await,
            "reset detection results",
        )?;
        self.editor = None;
        self.set_results(Vec::new());
        self.migration.clear();
        log::info!("Reset detection results of record {}", self.record_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Annotation editing
    // ------------------------------------------------------------------

    /// Open the editor on a copy of one view's result.
    ///
    /// Any editor already open is discarded.
    pub fn open_edit_view(
        &mut self,
        view: ViewKind,
        source: Option<DynamicImage>,
        image_size: (u32, u32),
    ) -> Result<&mut AnnotationEditor> {
        let result = checked(
            self.results
                .iter()
                .find(|r| r.view == view)
                .cloned()
                .ok_or(ValidationError::UnknownView { view }),
        )?;
        self.close_edit_view();
        let editor = AnnotationEditor::open(
            result,
            source,
            image_size,
            self.capabilities.can_edit,
            self.config.canvas,
        );
        self.cache.invalidate();
        Ok(self.editor.insert(editor))
    }

    pub fn editor(&self) -> Option<&AnnotationEditor> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut AnnotationEditor> {
        self.editor.as_mut()
    }

    /// Close the editor, dropping unsaved changes.
    pub fn close_edit_view(&mut self) {
        if let Some(editor) = self.editor.take() {
            if editor.revision() > 0 {
                log::debug!("Discarded unsaved edits on view '{}'", editor.view().view);
            }
            self.cache.invalidate();
        }
    }

    /// Ask inference to classify the box just drawn.
    ///
    /// Failures are logged and yield `None`; labelling by hand still works.
    pub async fn suggest_label(&self) -> Option<String> {
        let pending = self.editor.as_ref()?.pending_box()?;
        if pending.crop.is_empty() {
            return None;
        }
        match self.inference.predict(&pending.crop, self.settings).await {
            Ok(prediction) => {
                let label = prediction.top_detection().map(|d| d.class_name.clone());
                log::debug!("Suggested label: {:?}", label);
                label
            }
            Err(e) => {
                log::warn!("Label suggestion failed: {}", e);
                None
            }
        }
    }

    /// Label the drawn box with a catalog material and add it to the view.
    pub fn commit_annotation(&mut self, material: &str) -> Result<usize> {
        checked(self.ensure_can_edit())?;
        if self.editor.is_none() {
            return checked(Err(ValidationError::NoEditSession));
        }
        let material = material.trim();
        if material.is_empty() {
            return checked(Err(ValidationError::EmptyPartName));
        }
        if !self.catalog.contains(material) {
            return checked(Err(ValidationError::UnknownMaterial {
                name: material.to_string(),
            }));
        }
        let now = self.autosave.clock().now();
        let editor = checked(self.editor.as_mut().ok_or(ValidationError::NoEditSession))?;
        checked(editor.add_detection(material, now))
    }

    /// Delete one box from the open view.
    pub fn delete_annotation(&mut self, index: usize) -> Result<DetectionBox> {
        checked(self.ensure_can_edit())?;
        let editor = checked(self.editor.as_mut().ok_or(ValidationError::NoEditSession))?;
        checked(editor.delete_detection(index))
    }

    /// Save the open view into the result collection and persist it.
    ///
    /// On success the results are replaced with the store's copy and the
    /// editor closes. On failure the editor stays open with its changes.
    pub async fn save_edit_view(&mut self) -> Result<()> {
        checked(self.ensure_can_edit())?;
        let mut edited = match &self.editor {
            Some(editor) => editor.view().clone(),
            None => return checked(Err(ValidationError::NoEditSession)),
        };
        let Some(_guard) = self.autosave.gate().try_begin() else {
            return checked(Err(ValidationError::SaveInProgress));
        };

        edited.refresh_summary();
        let view = edited.view;
        let mut results = self.results.clone();
        match results.iter_mut().find(|r| r.view == view) {
            Some(slot) => *slot = edited,
            None => results.push(edited),
        }
        let payload = DetectionResultsPayload {
            settings: self.settings,
            results,
        };
        remote(
            self.store
                .put_detection_results(self.record_id, &payload)
                .await,
            "save annotations",
        )?;

        self.editor = None;
        self.set_results(payload.results);
        log::info!("Saved annotations for view '{}'", view);

        let mut echo = remote(self.store.get_record(self.record_id).await, "reload record")?;
        let defaults = self.config.detection;
        self.settings = echo
            .detection_settings
            .take()
            .unwrap_or(defaults)
            .or_defaults(defaults);
        self.set_results(echo.detection_results.take().unwrap_or_default());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------

    /// Pending quantity of a detected part.
    pub fn pending_qty(&mut self, name: &str) -> Option<u32> {
        self.with_aggregate(|_, migration, _| migration.pending_qty(name))
    }

    /// Override the quantity to commit for a detected part.
    pub fn set_pending_qty(&mut self, name: &str, qty: u32) -> Result<()> {
        checked(self.ensure_can_edit())?;
        checked(self.with_aggregate(|agg, migration, _| {
            if !agg.contains(name) {
                return Err(ValidationError::NotDetected {
                    name: name.to_string(),
                });
            }
            migration.set_pending_qty(name, qty);
            Ok(())
        }))
    }

    pub fn migrate_one(&mut self, name: &str) -> Result<u32> {
        checked(self.ensure_can_edit())?;
        let qty = checked(self.with_aggregate(|agg, migration, parts| migration.migrate_one(name, agg, parts)))?;
        self.parts_changed();
        Ok(qty)
    }

    pub fn migrate_all(&mut self) -> Result<MigrationReport> {
        checked(self.ensure_can_edit())?;
        let report = checked(self.with_aggregate(|agg, migration, parts| migration.migrate_all(agg, parts)))?;
        self.parts_changed();
        Ok(report)
    }

    pub fn revert_one(&mut self, name: &str) -> Result<ActualPart> {
        checked(self.ensure_can_edit())?;
        let removed = checked(self.with_aggregate(|agg, migration, parts| migration.revert_one(name, agg, parts)))?;
        self.parts_changed();
        Ok(removed)
    }

    pub fn revert_all(&mut self) -> Result<MigrationReport> {
        checked(self.ensure_can_edit())?;
        let report = checked(self.with_aggregate(|agg, migration, parts| migration.revert_all(agg, parts)))?;
        self.parts_changed();
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Actual parts
    // ------------------------------------------------------------------

    /// Add a manually typed part with quantity 1.
    pub fn add_part(&mut self, name: &str) -> Result<()> {
        checked(self.ensure_can_edit())?;
        checked(self.parts.add_manual(name).map(|_| ()))?;
        self.parts_changed();
        Ok(())
    }

    /// Remove a part. A migrated part becomes merely detected again.
    pub fn remove_part(&mut self, name: &str) -> Result<ActualPart> {
        checked(self.ensure_can_edit())?;
        let removed = checked(self.parts.remove(name).ok_or_else(|| ValidationError::UnknownPart {
            name: name.to_string(),
        }))?;
        self.migration.retain_existing(&self.parts);
        self.parts_changed();
        Ok(removed)
    }

    pub fn set_part_qty(&mut self, name: &str, qty: u32) -> Result<()> {
        checked(self.ensure_can_edit())?;
        checked(self.parts.set_qty(name, qty))?;
        self.parts_changed();
        Ok(())
    }

    pub fn set_part_view(&mut self, name: &str, view: ViewKind, tagged: bool) -> Result<()> {
        checked(self.ensure_can_edit())?;
        checked(self.parts.set_view(name, view, tagged))?;
        self.parts_changed();
        Ok(())
    }

    /// Change the test status; saved with the next explicit save.
    pub fn set_test_status(&mut self, status: TestStatus, username: &str, now: &str) -> Result<()> {
        checked(self.ensure_can_edit())?;
        self.record.set_status(status, username, now);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    fn payload(&self) -> TrackingPayload {
        TrackingPayload::new(&self.record, self.parts.parts())
    }

    /// Save general fields and actual parts, then reload from the store.
    ///
    /// A pending autosave is folded into this save.
    pub async fn save_changes(&mut self) -> Result<()> {
        checked(self.ensure_can_edit())?;
        let Some(_guard) = self.autosave.gate().try_begin() else {
            return checked(Err(ValidationError::SaveInProgress));
        };

        let payload = self.payload();
        remote(
            self.store.put_record(self.record_id, &payload).await,
            "save tracking record",
        )?;
        self.autosave.cancel();

        let echo = remote(self.store.get_record(self.record_id).await, "reload record")?;
        self.autosave.begin_hydration();
        self.apply_record(echo, true);
        self.autosave.finish_hydration(self.parts.revision());
        log::info!("Saved tracking record {}", self.record_id);
        Ok(())
    }

    /// Drive autosave. Returns `true` when a save was issued.
    ///
    /// A failed autosave is not retried; the next change schedules another.
    pub async fn tick(&mut self) -> Result<bool> {
        let Some(guard) = self.autosave.poll() else {
            return Ok(false);
        };
        let payload = self.payload();
        let saved = self.store.put_record(self.record_id, &payload).await;
        drop(guard);
        remote(saved, "auto-save actual parts")?;
        log::info!("Auto-saved {} actual parts", self.parts.len());
        Ok(true)
    }
}
