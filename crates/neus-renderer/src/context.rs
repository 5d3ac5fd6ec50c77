/// Per-call rendering state. Training progress and mode flags travel with every call
/// instead of living on the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    /// Training progress in `[0,1]`. Drives curvature annealing and the scheduled `s_var`.
    pub progress: f64,
    /// Keep derivative graphs and skip inference-only outputs.
    pub training: bool,
    /// Jitter coarse and background samples inside their bins.
    pub stratified: bool,
    /// Produce SDF Hessians outside of training too.
    pub hessians: bool,
}

impl RenderContext {
    pub fn train(progress: f64, stratified: bool) -> Self {
        Self { progress, training: true, stratified, hessians: false }
    }

    pub fn inference(progress: f64) -> Self {
        Self { progress, training: false, stratified: false, hessians: false }
    }

    pub fn with_hessians(mut self, hessians: bool) -> Self {
        self.hessians = hessians;
        self
    }

    /// Whether SDF derivatives need a graph and second-order terms.
    pub fn needs_hessians(&self) -> bool {
        self.training || self.hessians
    }

    /// Linear blend factor of the curvature annealing, reaching 1 at `anneal_end`.
    pub fn anneal_ratio(&self, anneal_end: f64) -> f64 {
        if anneal_end <= 0.0 {
            1.0
        } else {
            (self.progress / anneal_end).min(1.0)
        }
    }
}
