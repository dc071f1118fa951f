//! Main engine orchestrator
//!
//! The [`Engine`] owns the backend, the frame scheduler and per-view
//! clustering state, and walks a frame through its lifecycle:
//!
//! ```text
//! begin_commands
//!   for each view:
//!     prepare_view    rebuild stale cluster grid, assign lights,
//!                     write frame + cluster table regions
//!     depth_prepass   optional, depth-only pipeline
//!     draw_scene      per object: object region, bind pipeline, draw
//!   compute / trace   optional hooks
//! end_commands        upload the slot's uniform bytes, close the list
//! execute_commands    queue the list, signal the fence
//! present
//! ```
//!
//! [`Engine::render_frame`] runs the whole sequence and abandons the frame
//! if any step fails.

use glam::{Mat4, Vec3};

use crate::backend::{
    Backend, BackendError, BufferHandle, BufferUsage, GraphicsBackend, PipelineDescriptor,
    PipelineHandle, ShaderSource, ShaderStage, Viewport,
};
use crate::clustering::{ClusterGrid, ClusterLightTable, LightAssignment};
use crate::error::{RenderError, Result};
use crate::resources::{
    FrameUniforms, Material, MeshRange, ObjectUniforms, PackedGeometry, ShaderCache, UniformLayout,
    UniformRingBuffer, DEPTH_ONLY_VERTEX_SHADER,
};
use crate::scene::{GpuLight, RenderObject, Scene, View};
use crate::scheduler::{Command, CommandList, FrameBegin, FramePhase, FrameScheduler};
use crate::{Extent2d, RendererConfig};

/// Index of a view created with [`Engine::create_view`]
pub type ViewId = usize;

/// Counters for one frame, returned by [`Engine::present`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: usize,
    pub slot: usize,
    /// Whether `begin_commands` blocked on the fence
    pub waited: bool,
    /// Fence value signaled for this frame
    pub fence_value: u64,
    pub views: usize,
    /// Shading pass draws
    pub draws: usize,
    pub prepass_draws: usize,
    /// Objects skipped for a missing mesh, unavailable material or full ring
    pub skipped_objects: usize,
    pub lights: usize,
    pub light_assignments: usize,
    /// Assignments cut by the per-cluster cap
    pub dropped_assignments: usize,
}

struct ViewState {
    view: View,
    ring: UniformRingBuffer,
    uniform_buffer: BufferHandle,
    grid: Option<ClusterGrid>,
    /// View matrix the clusters stay pinned to while frozen.
    frozen_view: Option<Mat4>,
    /// One per frame slot, rebuilt every frame the slot records.
    assignments: Vec<LightAssignment>,
}

impl ViewState {
    /// View matrix light assignment and debug lines are computed with.
    fn cluster_view(&self) -> Mat4 {
        self.frozen_view.unwrap_or_else(|| self.view.view_matrix())
    }
}

struct GeometryState {
    /// `(vertex, index)` buffers, absent for a scene without geometry.
    buffers: Option<(BufferHandle, BufferHandle)>,
    ranges: Vec<MeshRange>,
}

struct FrameContext {
    begin: FrameBegin,
    stats: FrameStats,
}

/// The main rendering engine
pub struct Engine {
    config: RendererConfig,
    backend: Backend,
    scheduler: FrameScheduler,
    shader_cache: ShaderCache,
    /// Indexed by `ViewId`; removed views leave a `None` so ids stay stable.
    views: Vec<Option<ViewState>>,
    geometry: Option<GeometryState>,
    /// Pipeline per scene material; `None` when the material is unavailable.
    material_pipelines: Vec<Option<PipelineHandle>>,
    depth_pipeline: Option<PipelineHandle>,
    frame: Option<FrameContext>,
    shut_down: bool,
}

impl Engine {
    /// Create the device, the frame slots and the swapchain.
    ///
    /// Fails without leaving a partial engine behind.
    pub fn new(config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let backend = Backend::new(config.backend, &config.backend_options)?;
        Self::with_backend(backend, config)
    }

    /// Create an engine on an already constructed backend.
    pub fn with_backend(mut backend: Backend, config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = FrameScheduler::new(&mut backend, config.scheduler_config())?;

        let info = backend.device_info();
        log::info!(
            "Created {} device on '{}' ({} frames in flight, {}x{})",
            info.backend_name,
            info.adapter_name,
            config.frames_in_flight,
            config.width,
            config.height
        );

        Ok(Self {
            config,
            backend,
            scheduler,
            shader_cache: ShaderCache::new(),
            views: Vec::new(),
            geometry: None,
            material_pipelines: Vec::new(),
            depth_pipeline: None,
            frame: None,
            shut_down: false,
        })
    }

    // === Views ===

    /// Register a view. Its cluster grid is built on first use.
    pub fn create_view(&mut self, view: View) -> Result<ViewId> {
        let clusters = self.config.cluster_dims.x as usize
            * self.config.cluster_dims.y as usize
            * self.config.cluster_dims.z as usize;
        let layout = UniformLayout {
            frame_size: std::mem::size_of::<FrameUniforms>(),
            object_size: std::mem::size_of::<ObjectUniforms>(),
            max_objects: self.config.max_objects,
            cluster_table_size: ClusterLightTable::size_for(
                clusters,
                self.config.max_lights_per_cluster,
                self.config.max_lights,
            ),
        };
        let alignment = self.backend.device_info().min_uniform_alignment;
        let ring = UniformRingBuffer::with_alignment(layout, self.config.frames_in_flight, alignment)?;

        let id = self.views.len();
        let uniform_buffer = self.backend.create_buffer(
            ring.size(),
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            &format!("view {} uniforms", id),
        )?;

        log::debug!("Created view {} ({} byte uniform ring)", id, ring.size());
        self.views.push(Some(ViewState {
            view,
            ring,
            uniform_buffer,
            grid: None,
            frozen_view: None,
            assignments: vec![LightAssignment::new(); self.config.frames_in_flight],
        }));
        Ok(id)
    }

    /// Drop a view and release its uniform buffer.
    ///
    /// In-flight frames may still read the buffer, so the queue is flushed
    /// first. The id is not reused.
    pub fn remove_view(&mut self, id: ViewId) -> Result<()> {
        self.require_idle("remove a view")?;
        if self.view_state(id).is_none() {
            return Err(unknown_view(id));
        }
        if !self.scheduler.is_device_lost() {
            self.scheduler.flush(&mut self.backend)?;
        }
        if let Some(state) = self.views.get_mut(id).and_then(Option::take) {
            self.backend.release_buffer(state.uniform_buffer);
        }
        log::debug!("Removed view {}", id);
        Ok(())
    }

    /// Replace a view's camera and viewport. A projection change rebuilds
    /// the cluster grid on the next frame.
    pub fn update_view(&mut self, id: ViewId, view: View) -> Result<()> {
        self.view_state_mut(id)?.view = view;
        Ok(())
    }

    /// Pin a view's clusters to its current camera.
    ///
    /// While frozen the grid is neither rebuilt nor moved: lights are
    /// assigned against the view matrix captured here even as the camera
    /// keeps moving. Unfreezing resumes following the camera.
    pub fn set_cluster_freeze(&mut self, id: ViewId, freeze: bool) -> Result<()> {
        let state = self.view_state_mut(id)?;
        match (freeze, state.frozen_view) {
            (true, None) => {
                state.frozen_view = Some(state.view.view_matrix());
                log::debug!("Froze clusters of view {}", id);
            }
            (false, Some(_)) => {
                state.frozen_view = None;
                log::debug!("Unfroze clusters of view {}", id);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_cluster_frozen(&self, id: ViewId) -> bool {
        self.view_state(id).is_some_and(|s| s.frozen_view.is_some())
    }

    /// World-space segments of every cluster edge of view `id`, for debug
    /// drawing. `None` until the view's grid is built by `prepare_view`.
    pub fn cluster_lines(&self, id: ViewId) -> Option<Vec<(Vec3, Vec3)>> {
        let state = self.view_state(id)?;
        let grid = state.grid.as_ref()?;
        Some(grid.edge_segments(&state.cluster_view().inverse()))
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.view_state(id).map(|s| &s.view)
    }

    /// Number of live views.
    pub fn view_count(&self) -> usize {
        self.views.iter().flatten().count()
    }

    /// Ids of live views, in creation order.
    pub fn view_ids(&self) -> Vec<ViewId> {
        self.views
            .iter()
            .enumerate()
            .filter_map(|(id, state)| state.as_ref().map(|_| id))
            .collect()
    }

    pub fn cluster_grid(&self, id: ViewId) -> Option<&ClusterGrid> {
        self.view_state(id).and_then(|s| s.grid.as_ref())
    }

    /// Light lists most recently built for `slot` of view `id`.
    pub fn light_assignment(&self, id: ViewId, slot: usize) -> Option<&LightAssignment> {
        self.view_state(id).and_then(|s| s.assignments.get(slot))
    }

    pub fn uniform_ring(&self, id: ViewId) -> Option<&UniformRingBuffer> {
        self.view_state(id).map(|s| &s.ring)
    }

    pub fn uniform_buffer(&self, id: ViewId) -> Option<BufferHandle> {
        self.view_state(id).map(|s| s.uniform_buffer)
    }

    /// Resize the swapchain. Zero width or height is a no-op returning
    /// `Ok(false)`. Every view's viewport follows the new size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        let result = self.scheduler.resize(&mut self.backend, width, height);
        self.sync_frame();
        if result? {
            let extent = Extent2d::new(width, height);
            for state in self.views.iter_mut().flatten() {
                state.view.extent = extent;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // === Scene resources ===

    /// Upload all meshes into shared geometry buffers and build every
    /// material's pipeline.
    ///
    /// Materials whose shaders fail to compile stay unavailable; their
    /// objects are skipped when drawing.
    pub fn build_buffers(&mut self, scene: &mut Scene) -> Result<()> {
        self.require_idle("build buffers")?;

        if let Some(old) = self.geometry.take() {
            // The GPU may still read the old buffers.
            self.scheduler.flush(&mut self.backend)?;
            if let Some((vertices, indices)) = old.buffers {
                self.backend.release_buffer(vertices);
                self.backend.release_buffer(indices);
            }
        }

        let packed = PackedGeometry::pack(&scene.meshes);
        let buffers = if packed.is_empty() {
            None
        } else {
            Some(self.upload_geometry(&packed)?)
        };
        self.geometry = Some(GeometryState {
            buffers,
            ranges: packed.ranges,
        });

        if self.depth_pipeline.is_none() {
            self.depth_pipeline = self.build_depth_pipeline()?;
        }

        self.material_pipelines.clear();
        let built = self.refresh_materials(scene)?;

        log::info!(
            "Built buffers: {} meshes ({} vertices, {} indices), {} materials",
            scene.meshes.len(),
            packed.vertices.len(),
            packed.indices.len(),
            built
        );
        Ok(())
    }

    /// Rebuild pipelines of new or dirty materials. Returns how many were
    /// rebuilt.
    pub fn refresh_materials(&mut self, scene: &mut Scene) -> Result<usize> {
        self.require_idle("rebuild materials")?;

        let mut rebuilt = 0;
        for (id, material) in scene.materials.iter_mut().enumerate() {
            let known = id < self.material_pipelines.len();
            if known && !material.is_dirty() {
                continue;
            }
            if known {
                self.shader_cache.invalidate(&material.vertex_shader.name);
                self.shader_cache.invalidate(&material.pixel_shader.name);
            }

            let pipeline = self.build_material(material)?;
            if known {
                self.material_pipelines[id] = pipeline;
            } else {
                self.material_pipelines.push(pipeline);
            }
            material.clear_dirty();
            rebuilt += 1;
        }
        self.material_pipelines.truncate(scene.materials.len());

        if rebuilt > 0 {
            log::debug!("Rebuilt {} material pipelines", rebuilt);
        }
        Ok(rebuilt)
    }

    /// Pipeline of a scene material, `None` if unavailable or not built.
    pub fn material_pipeline(&self, material_id: usize) -> Option<PipelineHandle> {
        self.material_pipelines.get(material_id).copied().flatten()
    }

    pub fn depth_pipeline(&self) -> Option<PipelineHandle> {
        self.depth_pipeline
    }

    pub fn mesh_range(&self, mesh_id: usize) -> Option<MeshRange> {
        self.geometry.as_ref().and_then(|g| g.ranges.get(mesh_id)).copied()
    }

    // === Frame lifecycle ===

    /// Wait for the next frame slot and start recording.
    pub fn begin_commands(&mut self) -> Result<FrameBegin> {
        if self.frame.is_some() {
            return Err(RenderError::InvalidFrameState(
                "begin_commands called while a frame is in progress".into(),
            ));
        }
        let begin = self.scheduler.begin_frame(&mut self.backend)?;
        self.frame = Some(FrameContext {
            begin,
            stats: FrameStats {
                frame_index: begin.frame_index,
                slot: begin.slot,
                waited: begin.waited,
                ..Default::default()
            },
        });
        Ok(begin)
    }

    /// Rebuild the view's cluster grid if stale, assign the scene lights and
    /// write the frame and cluster table regions of the current slot.
    pub fn prepare_view(&mut self, id: ViewId, scene: &Scene) -> Result<()> {
        let slot = self.active_slot()?;
        let max_lights = self.config.max_lights;
        let max_per_cluster = self.config.max_lights_per_cluster;
        let dims = self.config.cluster_dims;
        let slicing = self.config.depth_slicing;

        let state = self
            .views
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| unknown_view(id))?;
        let frustum = state.view.frustum();
        let cluster_view = state.cluster_view();

        let stale = match (&state.grid, state.frozen_view) {
            (None, _) => true,
            (Some(_), Some(_)) => false,
            (Some(grid), None) => grid.is_stale(&frustum, dims, slicing),
        };
        if stale {
            state.grid = Some(ClusterGrid::build(&frustum, dims, slicing)?);
            log::debug!("Rebuilt cluster grid for view {}", id);
        }
        let Some(grid) = state.grid.as_ref() else {
            return Err(RenderError::InvalidFrameState(format!(
                "view {} has no cluster grid",
                id
            )));
        };

        let lights = if scene.lights.len() > max_lights {
            log::warn!(
                "View {}: {} lights exceed the limit of {}, ignoring the rest",
                id,
                scene.lights.len(),
                max_lights
            );
            &scene.lights[..max_lights]
        } else {
            &scene.lights[..]
        };

        let assignment = &mut state.assignments[slot];
        assignment.assign(grid, &cluster_view, lights);
        let table = assignment.pack(max_per_cluster);
        let light_assignments = assignment.total_assignments();

        let gpu_lights: Vec<GpuLight> = lights.iter().map(|l| l.to_gpu_data(&cluster_view)).collect();
        let cluster_region = state.ring.allocate_cluster_region(slot)?;
        state.ring.write(&cluster_region, &table.encode(&gpu_lights, max_lights)?)?;

        let frame = FrameUniforms::new(
            frustum.view,
            frustum.projection,
            state.view.camera.position,
            grid,
            lights.len() as u32,
            max_per_cluster,
        );
        let frame_region = state.ring.allocate_frame_region(slot)?;
        state.ring.write_pod(&frame_region, &frame)?;

        let list = self.scheduler.command_list()?;
        list.record(Command::SetViewport(Viewport::full(state.view.extent)));
        for region in [frame_region, cluster_region] {
            list.record(Command::BindUniforms {
                scope: region.scope,
                offset: region.offset,
                size: region.size,
            });
        }

        if let Some(frame) = self.frame.as_mut() {
            frame.stats.views += 1;
            frame.stats.lights += lights.len();
            frame.stats.light_assignments += light_assignments;
            frame.stats.dropped_assignments += table.dropped;
        }
        Ok(())
    }

    /// Draw every drawable object with the depth-only pipeline.
    ///
    /// Skipped with a warning if the depth shader is unavailable.
    pub fn depth_prepass(&mut self, id: ViewId, scene: &Scene) -> Result<usize> {
        let Some(pipeline) = self.depth_pipeline else {
            log::warn!("Depth prepass skipped: depth-only pipeline unavailable");
            return Ok(0);
        };
        let (drawn, _) = self.record_objects(id, scene, Some(pipeline))?;
        if let Some(frame) = self.frame.as_mut() {
            frame.stats.prepass_draws += drawn;
        }
        Ok(drawn)
    }

    /// Shading pass: write each object's region, bind its material pipeline
    /// and draw it.
    pub fn draw_scene(&mut self, id: ViewId, scene: &Scene) -> Result<usize> {
        let (drawn, skipped) = self.record_objects(id, scene, None)?;
        if skipped > 0 {
            log::warn!(
                "View {}: skipped {} objects (missing mesh, unavailable material or object limit)",
                id,
                skipped
            );
        }
        if let Some(frame) = self.frame.as_mut() {
            frame.stats.draws += drawn;
            frame.stats.skipped_objects += skipped;
        }
        Ok(drawn)
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<()> {
        self.scheduler.command_list()?.record(Command::BindPipeline(pipeline));
        Ok(())
    }

    /// Write `scene.objects[object]` into its region for view `id` and bind it.
    pub fn bind_object(&mut self, id: ViewId, scene: &Scene, object: usize) -> Result<()> {
        let slot = self.active_slot()?;
        let state = self
            .views
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| unknown_view(id))?;
        let render_object = scene.objects.get(object).ok_or_else(|| {
            RenderError::InvalidParameter(format!("object {} does not exist", object))
        })?;
        let material = scene.materials.get(render_object.material_id).ok_or_else(|| {
            RenderError::InvalidParameter(format!(
                "material {} does not exist",
                render_object.material_id
            ))
        })?;
        let view_projection = state.view.view_projection_matrix();
        let list = self.scheduler.command_list()?;
        write_object(state, slot, object, render_object, material, view_projection, list)
    }

    /// Draw the indexed range of `mesh_id` with the bound pipeline.
    pub fn draw(&mut self, mesh_id: usize) -> Result<()> {
        let range = self.mesh_range(mesh_id).ok_or_else(|| {
            RenderError::InvalidParameter(format!("mesh {} has no uploaded geometry", mesh_id))
        })?;
        self.scheduler.command_list()?.record(draw_command(range));
        if let Some(frame) = self.frame.as_mut() {
            frame.stats.draws += 1;
        }
        Ok(())
    }

    /// Record a compute dispatch.
    pub fn compute(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if x == 0 || y == 0 || z == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "dispatch {}x{}x{} has an empty dimension",
                x, y, z
            )));
        }
        self.scheduler.command_list()?.record(Command::Dispatch { x, y, z });
        Ok(())
    }

    /// Record a ray tracing dispatch over `width × height`.
    pub fn trace(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "trace {}x{} is empty",
                width, height
            )));
        }
        self.scheduler
            .command_list()?
            .record(Command::TraceRays { width, height });
        Ok(())
    }

    /// Upload the slot's uniform bytes of every view and close the list.
    pub fn end_commands(&mut self) -> Result<()> {
        let slot = self.active_slot()?;
        if self.scheduler.phase() != Some(FramePhase::Recording) {
            return Err(RenderError::InvalidFrameState(
                "end_commands called twice".into(),
            ));
        }
        for state in self.views.iter().flatten() {
            let (offset, bytes) = state.ring.slot_bytes(slot)?;
            self.backend.write_buffer(state.uniform_buffer, offset, bytes)?;
        }
        self.scheduler.end_recording()
    }

    /// Queue the closed list. Returns the fence value signaled for it.
    pub fn execute_commands(&mut self) -> Result<u64> {
        let result = self.scheduler.execute(&mut self.backend);
        self.sync_frame();
        let value = result?;
        if let Some(frame) = self.frame.as_mut() {
            frame.stats.fence_value = value;
        }
        Ok(value)
    }

    /// Present the submitted frame and advance to the next slot.
    pub fn present(&mut self) -> Result<FrameStats> {
        if self.scheduler.phase() != Some(FramePhase::Submitted) {
            return Err(RenderError::InvalidFrameState(
                "present called before execute_commands".into(),
            ));
        }
        let stats = self.frame.take().map(|f| f.stats).unwrap_or_default();
        self.scheduler.present(&mut self.backend)?;
        Ok(stats)
    }

    /// Drop the frame in progress, keeping slot and fence bookkeeping intact.
    pub fn abandon_frame(&mut self) {
        self.scheduler.abandon_frame();
        self.frame = None;
    }

    /// Record and present one frame of `scene` through every view.
    pub fn render_frame(&mut self, scene: &Scene) -> Result<FrameStats> {
        let result = self.record_frame(scene).map_err(|e| match e {
            RenderError::Backend(BackendError::DeviceLost) => RenderError::DeviceLost,
            e => e,
        });
        if let Err(e) = &result {
            log::error!("Frame failed: {}", e);
            self.scheduler.note_error(e);
            self.abandon_frame();
        }
        result
    }

    fn record_frame(&mut self, scene: &Scene) -> Result<FrameStats> {
        self.begin_commands()?;
        for id in self.view_ids() {
            self.prepare_view(id, scene)?;
            if self.config.depth_prepass {
                self.depth_prepass(id, scene)?;
            }
            self.draw_scene(id, scene)?;
        }
        self.end_commands()?;
        self.execute_commands()?;
        self.present()
    }

    /// Wait for the GPU to finish all submitted work.
    pub fn flush(&mut self) -> Result<()> {
        self.scheduler.flush(&mut self.backend)
    }

    /// Flush and release every GPU resource. Called by `Drop` if needed.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.frame = None;

        let result = self.scheduler.shutdown(&mut self.backend);
        for state in self.views.drain(..).flatten() {
            self.backend.release_buffer(state.uniform_buffer);
        }
        if let Some((vertices, indices)) = self.geometry.take().and_then(|g| g.buffers) {
            self.backend.release_buffer(vertices);
            self.backend.release_buffer(indices);
        }
        log::debug!("Engine shut down");
        result
    }

    // === Accessors ===

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shader_cache
    }

    pub fn extent(&self) -> Extent2d {
        self.scheduler.extent()
    }

    pub fn is_device_lost(&self) -> bool {
        self.scheduler.is_device_lost()
    }

    /// Commands recorded so far in the current frame.
    pub fn recorded_commands(&self) -> Option<&[Command]> {
        let slot = self.frame.as_ref()?.begin.slot;
        Some(self.scheduler.slot(slot)?.command_list().commands())
    }

    // === Internals ===

    fn active_slot(&self) -> Result<usize> {
        self.frame
            .as_ref()
            .map(|f| f.begin.slot)
            .ok_or_else(|| RenderError::InvalidFrameState("no frame is being recorded".into()))
    }

    fn view_state(&self, id: ViewId) -> Option<&ViewState> {
        self.views.get(id).and_then(Option::as_ref)
    }

    fn view_state_mut(&mut self, id: ViewId) -> Result<&mut ViewState> {
        self.views
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| unknown_view(id))
    }

    fn require_idle(&self, action: &str) -> Result<()> {
        if self.frame.is_some() {
            return Err(RenderError::InvalidFrameState(format!(
                "cannot {} while a frame is in progress",
                action
            )));
        }
        Ok(())
    }

    /// Drop the frame context once the scheduler no longer tracks a frame.
    fn sync_frame(&mut self) {
        if self.scheduler.phase().is_none() {
            self.frame = None;
        }
    }

    /// Shared object loop of the prepass (`depth` set) and the shading pass.
    ///
    /// Returns `(drawn, skipped)`.
    fn record_objects(
        &mut self,
        id: ViewId,
        scene: &Scene,
        depth: Option<PipelineHandle>,
    ) -> Result<(usize, usize)> {
        let slot = self.active_slot()?;
        let geometry = self.geometry.as_ref().ok_or_else(|| {
            RenderError::InvalidFrameState("build_buffers has not been called".into())
        })?;
        let state = self
            .views
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| unknown_view(id))?;
        let view_projection = state.view.view_projection_matrix();
        let max_objects = state.ring.max_objects();
        let list = self.scheduler.command_list()?;

        let mut bound = None;
        let mut drawn = 0;
        let mut skipped = 0;
        for (index, object) in scene.objects.iter().enumerate() {
            if index >= max_objects {
                skipped += scene.objects.len() - index;
                break;
            }
            let Some(range) = geometry.ranges.get(object.mesh_id).copied() else {
                skipped += 1;
                continue;
            };
            let material_pipeline = self.material_pipelines.get(object.material_id).copied().flatten();
            let (Some(material_pipeline), Some(material)) =
                (material_pipeline, scene.materials.get(object.material_id))
            else {
                skipped += 1;
                continue;
            };

            write_object(state, slot, index, object, material, view_projection, list)?;
            let pipeline = depth.unwrap_or(material_pipeline);
            if bound != Some(pipeline) {
                list.record(Command::BindPipeline(pipeline));
                bound = Some(pipeline);
            }
            list.record(draw_command(range));
            drawn += 1;
        }

        log::trace!("View {}: recorded {} draws ({} skipped)", id, drawn, skipped);
        Ok((drawn, skipped))
    }

    fn upload_geometry(&mut self, packed: &PackedGeometry) -> Result<(BufferHandle, BufferHandle)> {
        let vertex_bytes = packed.vertex_bytes();
        let vertices = self.backend.create_buffer(
            vertex_bytes.len() as u64,
            BufferUsage::VERTEX | BufferUsage::COPY_DST,
            "scene vertices",
        )?;
        let index_bytes = packed.index_bytes();
        let indices = match self.backend.create_buffer(
            index_bytes.len() as u64,
            BufferUsage::INDEX | BufferUsage::COPY_DST,
            "scene indices",
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.backend.release_buffer(vertices);
                return Err(e.into());
            }
        };

        let written = self
            .backend
            .write_buffer(vertices, 0, vertex_bytes)
            .and_then(|_| self.backend.write_buffer(indices, 0, index_bytes));
        if let Err(e) = written {
            self.backend.release_buffer(vertices);
            self.backend.release_buffer(indices);
            return Err(e.into());
        }
        Ok((vertices, indices))
    }

    fn build_depth_pipeline(&mut self) -> Result<Option<PipelineHandle>> {
        let source = ShaderSource::new("depth_only", ShaderStage::Vertex, DEPTH_ONLY_VERTEX_SHADER);
        let Some(vertex_shader) = self.shader_cache.get_or_compile(&mut self.backend, &source)? else {
            return Ok(None);
        };
        self.create_pipeline(&PipelineDescriptor {
            label: "depth prepass".to_string(),
            vertex_shader,
            pixel_shader: None,
            color_format: None,
            depth_format: Some(self.config.depth_format),
        })
    }

    fn build_material(&mut self, material: &Material) -> Result<Option<PipelineHandle>> {
        let vertex = self
            .shader_cache
            .get_or_compile(&mut self.backend, &material.vertex_shader)?;
        let pixel = self
            .shader_cache
            .get_or_compile(&mut self.backend, &material.pixel_shader)?;
        let (Some(vertex_shader), Some(pixel_shader)) = (vertex, pixel) else {
            log::warn!("Material '{}' unavailable: shader compilation failed", material.name);
            return Ok(None);
        };
        self.create_pipeline(&PipelineDescriptor {
            label: material.name.clone(),
            vertex_shader,
            pixel_shader: Some(pixel_shader),
            color_format: Some(self.config.format),
            depth_format: Some(self.config.depth_format),
        })
    }

    /// Pipeline creation failures other than device loss leave the
    /// pipeline unavailable.
    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> Result<Option<PipelineHandle>> {
        match self.backend.create_pipeline(descriptor) {
            Ok(pipeline) => Ok(Some(pipeline)),
            Err(BackendError::DeviceLost) => Err(BackendError::DeviceLost.into()),
            Err(e) => {
                log::warn!("Pipeline '{}' unavailable: {}", descriptor.label, e);
                Ok(None)
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Engine shutdown failed: {}", e);
        }
    }
}

fn unknown_view(id: ViewId) -> RenderError {
    RenderError::InvalidParameter(format!("view {} does not exist", id))
}

fn draw_command(range: MeshRange) -> Command {
    Command::Draw {
        first_index: range.first_index,
        index_count: range.index_count,
        base_vertex: range.base_vertex,
    }
}

fn write_object(
    state: &mut ViewState,
    slot: usize,
    index: usize,
    object: &RenderObject,
    material: &Material,
    view_projection: Mat4,
    list: &mut CommandList,
) -> Result<()> {
    let region = state.ring.allocate_object_region(slot, index)?;
    let uniforms = ObjectUniforms::new(
        object.transform.matrix(),
        view_projection,
        material,
        index as u32,
        object.material_id as u32,
    );
    state.ring.write_pod(&region, &uniforms)?;
    list.record(Command::BindUniforms {
        scope: region.scope,
        offset: region.offset,
        size: region.size,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Fault;
    use crate::resources::Mesh;
    use crate::scene::{Camera, Light};
    use glam::Vec3;

    fn config() -> RendererConfig {
        RendererConfig::default()
            .with_size(320, 180)
            .with_cluster_dims(4, 3, 8)
            .with_max_objects(8)
            .with_max_lights(16)
            .with_max_lights_per_cluster(8)
    }

    fn scene() -> Scene {
        let mut scene = Scene::new();
        let cube = scene.add_mesh(Mesh::cube());
        let gold = scene.add_material(Material::gold());
        scene.add_object(RenderObject::new(cube, gold).with_position(Vec3::new(-1.0, 0.0, 0.0)));
        scene.add_object(RenderObject::new(cube, gold).with_position(Vec3::new(1.0, 0.0, 0.0)));
        scene.add_light(Light::new(Vec3::new(0.0, 1.0, 0.0), 4.0));
        scene
    }

    fn engine_with_view(scene: &mut Scene) -> Engine {
        let mut engine = Engine::new(config()).unwrap();
        let camera = Camera::new(Vec3::new(0.0, 1.0, 6.0), Vec3::ZERO);
        engine.create_view(View::new(camera, engine.extent())).unwrap();
        engine.build_buffers(scene).unwrap();
        engine
    }

    #[test]
    fn test_render_frame_draws_objects() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);

        let stats = engine.render_frame(&scene).unwrap();
        assert_eq!(stats.draws, 2);
        assert_eq!(stats.prepass_draws, 2);
        assert_eq!(stats.views, 1);
        assert_eq!(stats.lights, 1);
        assert!(stats.light_assignments > 0);
        assert_eq!(stats.fence_value, 1);
        assert_eq!(engine.scheduler().frame_index(), 1);
        assert!(engine.cluster_grid(0).is_some());
    }

    #[test]
    fn test_uniforms_uploaded() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        engine.render_frame(&scene).unwrap();

        let buffer = engine.uniform_buffer(0).unwrap();
        let ring = engine.uniform_ring(0).unwrap();
        let frame_region = ring.allocate_frame_region(0).unwrap();
        let contents = engine.backend().device().buffer_contents(buffer).unwrap();
        let start = frame_region.offset as usize;
        let expected = ring.region_bytes(&frame_region);
        assert_eq!(&contents[start..start + expected.len()], expected);
    }

    #[test]
    fn test_broken_material_is_skipped() {
        let mut scene = scene();
        let broken = scene.add_material(Material::new("broken").with_shaders(
            ShaderSource::new("broken", ShaderStage::Vertex, "void vs_main() {}"),
            ShaderSource::new("broken", ShaderStage::Pixel, "#error todo\nvoid ps_main() {}"),
        ));
        scene.add_object(RenderObject::new(0, broken));
        let mut engine = engine_with_view(&mut scene);

        assert!(engine.material_pipeline(0).is_some());
        assert!(engine.material_pipeline(broken).is_none());
        let stats = engine.render_frame(&scene).unwrap();
        assert_eq!(stats.draws, 2);
        assert_eq!(stats.skipped_objects, 1);
    }

    #[test]
    fn test_dirty_material_rebuilt() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        assert_eq!(engine.refresh_materials(&mut scene).unwrap(), 0);

        scene
            .material_mut(0)
            .unwrap()
            .set_pixel_shader(ShaderSource::new("gold", ShaderStage::Pixel, "#error\n"));
        assert_eq!(engine.refresh_materials(&mut scene).unwrap(), 1);
        assert!(engine.material_pipeline(0).is_none());
        assert!(!scene.has_dirty_materials());
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        assert!(matches!(engine.present(), Err(RenderError::InvalidFrameState(_))));
        assert!(matches!(engine.draw(0), Err(RenderError::InvalidFrameState(_))));

        engine.begin_commands().unwrap();
        assert!(matches!(engine.begin_commands(), Err(RenderError::InvalidFrameState(_))));
        assert!(matches!(engine.build_buffers(&mut scene), Err(RenderError::InvalidFrameState(_))));
        engine.abandon_frame();
        assert!(engine.render_frame(&scene).is_ok());
    }

    #[test]
    fn test_manual_sequence_with_hooks() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);

        engine.begin_commands().unwrap();
        engine.prepare_view(0, &scene).unwrap();
        let pipeline = engine.material_pipeline(0).unwrap();
        engine.bind_pipeline(pipeline).unwrap();
        engine.bind_object(0, &scene, 0).unwrap();
        engine.draw(0).unwrap();
        engine.compute(8, 8, 1).unwrap();
        engine.trace(320, 180).unwrap();
        assert!(engine.compute(0, 1, 1).is_err());

        let commands = engine.recorded_commands().unwrap();
        assert!(commands.contains(&Command::Dispatch { x: 8, y: 8, z: 1 }));
        assert!(commands.contains(&Command::TraceRays { width: 320, height: 180 }));

        engine.end_commands().unwrap();
        assert_eq!(engine.execute_commands().unwrap(), 1);
        let stats = engine.present().unwrap();
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn test_execute_failure_abandons_frame() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        engine.backend_mut().inject_fault(Fault::Execute);

        assert!(engine.render_frame(&scene).is_err());
        assert_eq!(engine.scheduler().frame_index(), 0);
        assert_eq!(engine.scheduler().pending_fence_values(), vec![0, 0]);

        let stats = engine.render_frame(&scene).unwrap();
        assert_eq!(stats.fence_value, 1);
    }

    #[test]
    fn test_resize_updates_views() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        engine.render_frame(&scene).unwrap();

        assert!(!engine.resize(0, 0).unwrap());
        assert_eq!(engine.view(0).unwrap().extent, Extent2d::new(320, 180));

        assert!(engine.resize(640, 480).unwrap());
        assert_eq!(engine.view(0).unwrap().extent, Extent2d::new(640, 480));
        engine.render_frame(&scene).unwrap();
        let grid = engine.cluster_grid(0).unwrap();
        assert!((grid.frustum().aspect - 640.0 / 480.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_view() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        engine.begin_commands().unwrap();
        assert!(matches!(
            engine.prepare_view(5, &scene),
            Err(RenderError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_remove_view_releases_buffer() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        let camera = Camera::new(Vec3::new(0.0, 4.0, 6.0), Vec3::ZERO);
        let second = engine.create_view(View::new(camera, engine.extent())).unwrap();
        assert_eq!(engine.render_frame(&scene).unwrap().views, 2);
        assert_eq!(engine.backend().device().live_buffer_count(), 4);

        engine.begin_commands().unwrap();
        assert!(matches!(engine.remove_view(0), Err(RenderError::InvalidFrameState(_))));
        engine.abandon_frame();

        engine.remove_view(0).unwrap();
        let fence = engine.scheduler().fence();
        assert_eq!(fence.completed_value(), fence.current_value());
        assert_eq!(engine.backend().device().live_buffer_count(), 3);
        assert_eq!(engine.view_count(), 1);
        assert_eq!(engine.view_ids(), vec![second]);
        assert!(engine.view(0).is_none());
        assert!(engine.uniform_buffer(0).is_none());
        assert!(matches!(engine.remove_view(0), Err(RenderError::InvalidParameter(_))));

        let stats = engine.render_frame(&scene).unwrap();
        assert_eq!(stats.views, 1);
        assert_eq!(stats.draws, 2);

        // Ids are never reused.
        let third = engine.create_view(View::new(camera, engine.extent())).unwrap();
        assert_eq!(third, 2);
        assert_eq!(engine.view_ids(), vec![second, third]);
    }

    #[test]
    fn test_frozen_clusters_ignore_camera() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        assert!(engine.cluster_lines(0).is_none());
        engine.render_frame(&scene).unwrap();

        let pinned = engine.view(0).unwrap().clone();
        engine.set_cluster_freeze(0, true).unwrap();
        assert!(engine.is_cluster_frozen(0));
        let lines = engine.cluster_lines(0).unwrap();
        assert_eq!(lines.len(), engine.cluster_grid(0).unwrap().edges().len());

        let moved = Camera::new(Vec3::new(6.0, 1.0, 6.0), Vec3::new(6.0, 0.0, 0.0));
        engine.update_view(0, View::new(moved, engine.extent())).unwrap();
        let stats = engine.render_frame(&scene).unwrap();
        assert_eq!(engine.cluster_lines(0).unwrap(), lines);

        // Lights were assigned from the pinned camera, not the moved one.
        let grid = engine.cluster_grid(0).unwrap();
        let mut expected = LightAssignment::new();
        expected.assign(grid, &pinned.view_matrix(), &scene.lights);
        let assigned = engine.light_assignment(0, stats.slot).unwrap();
        assert_eq!(assigned.total_assignments(), expected.total_assignments());
        for cluster in 0..grid.cluster_count() {
            assert_eq!(assigned.lights_for(cluster), expected.lights_for(cluster));
        }

        // A frozen grid also survives a projection change.
        engine.resize(640, 480).unwrap();
        engine.render_frame(&scene).unwrap();
        assert_eq!(engine.cluster_grid(0).unwrap().frustum().aspect, pinned.aspect());

        engine.set_cluster_freeze(0, false).unwrap();
        assert!(!engine.is_cluster_frozen(0));
        engine.render_frame(&scene).unwrap();
        assert_eq!(
            engine.cluster_grid(0).unwrap().frustum().aspect,
            engine.view(0).unwrap().aspect()
        );
        assert_ne!(engine.cluster_lines(0).unwrap(), lines);
        assert!(matches!(
            engine.set_cluster_freeze(3, true),
            Err(RenderError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_shutdown_releases_buffers() {
        let mut scene = scene();
        let mut engine = engine_with_view(&mut scene);
        assert_eq!(engine.backend().device().live_buffer_count(), 3);
        engine.shutdown().unwrap();
        assert_eq!(engine.backend().device().live_buffer_count(), 0);
        assert_eq!(engine.backend().device().live_texture_count(), 0);
    }
}
