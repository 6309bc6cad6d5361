use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use tsumiki_vulkan::vk;

use crate::{Frame, RenderError, RenderPass, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PassHandle(usize);

struct ScheduledPass {
    pass: Box<dyn RenderPass>,
    enabled: bool,
}

/// Orders passes by the images they read and write and records them frame
/// by frame. A pass that writes an image is recorded before every pass that
/// reads it; otherwise passes keep their registration order.
#[derive(Default)]
pub struct PassScheduler {
    passes: Vec<ScheduledPass>,
}

impl PassScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass<T: RenderPass + 'static>(&mut self, pass: T) -> PassHandle {
        self.add_boxed_pass(Box::new(pass))
    }

    pub fn add_boxed_pass(&mut self, pass: Box<dyn RenderPass>) -> PassHandle {
        let handle = PassHandle(self.passes.len());
        self.passes.push(ScheduledPass {
            pass,
            enabled: true,
        });
        handle
    }

    pub fn is_enabled(&self, handle: PassHandle) -> bool {
        self.passes
            .get(handle.0)
            .map_or(false, |scheduled| scheduled.enabled)
    }

    pub fn pass(&self, handle: PassHandle) -> Option<&dyn RenderPass> {
        self.passes.get(handle.0).map(|scheduled| scheduled.pass.as_ref())
    }

    /// Initializes every pass. A pass that fails is disabled together with
    /// every pass that depends on its output, directly or not; the first
    /// failure is returned after all passes were tried.
    pub fn initialize_all(&mut self) -> Result<()> {
        let mut first_error = None;
        let mut failed = Vec::new();
        for (index, scheduled) in self.passes.iter_mut().enumerate() {
            if !scheduled.enabled {
                continue;
            }
            if let Err(err) = scheduled.pass.initialize() {
                warn!("Pass {} failed to initialize: {err}", scheduled.pass.name());
                scheduled.enabled = false;
                failed.push(index);
                first_error.get_or_insert(err);
            }
        }

        let edges = self.edges();
        while let Some(index) = failed.pop() {
            for &dependent in &edges[index] {
                let scheduled = &mut self.passes[dependent];
                if scheduled.enabled {
                    warn!(
                        "Disabling pass {} because an input pass failed",
                        scheduled.pass.name()
                    );
                    scheduled.pass.shutdown();
                    scheduled.enabled = false;
                    failed.push(dependent);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Records every enabled pass for `frame` and returns the command buffers
    /// in submission order.
    pub fn record(&mut self, frame: &Frame) -> Result<Vec<(String, vk::CommandBuffer)>> {
        let order = self.topological_sort()?;
        let mut command_buffers = Vec::with_capacity(order.len());
        for index in order {
            let pass = &mut self.passes[index].pass;
            let command_buffer = pass.draw(frame)?;
            debug!("Recorded pass {} for frame {}", pass.name(), frame.number());
            command_buffers.push((pass.name().to_string(), command_buffer));
        }
        Ok(command_buffers)
    }

    /// Shuts passes down in reverse registration order.
    pub fn shutdown_all(&mut self) {
        for scheduled in self.passes.iter_mut().rev() {
            scheduled.pass.shutdown();
        }
    }

    /// For every pass, the passes reading an image it writes.
    fn edges(&self) -> Vec<Vec<usize>> {
        let mut writers = HashMap::<vk::Image, Vec<usize>>::new();
        for (index, scheduled) in self.passes.iter().enumerate() {
            for &image in scheduled.pass.writes() {
                writers.entry(image).or_default().push(index);
            }
        }

        let mut edges = vec![Vec::new(); self.passes.len()];
        for (reader, scheduled) in self.passes.iter().enumerate() {
            for image in scheduled.pass.reads() {
                for &writer in writers.get(image).into_iter().flatten() {
                    if writer != reader && !edges[writer].contains(&reader) {
                        edges[writer].push(reader);
                    }
                }
            }
        }
        edges
    }

    fn topological_sort(&self) -> Result<Vec<usize>> {
        let edges = self.edges();
        let enabled = |index: usize| self.passes[index].enabled;

        let mut in_degrees = vec![0usize; self.passes.len()];
        for (from, tos) in edges.iter().enumerate() {
            if !enabled(from) {
                continue;
            }
            for &to in tos {
                in_degrees[to] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.passes.len())
            .filter(|&index| enabled(index) && in_degrees[index] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.passes.len());
        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &to in &edges[index] {
                in_degrees[to] -= 1;
                if in_degrees[to] == 0 && enabled(to) {
                    ready.insert(to);
                }
            }
        }

        let enabled_count = (0..self.passes.len()).filter(|&i| enabled(i)).count();
        if order.len() != enabled_count {
            return Err(RenderError::DependencyCycle);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use tsumiki_vulkan::vk::Handle;

    use super::*;

    struct FakePass {
        name: &'static str,
        reads: Vec<vk::Image>,
        writes: Vec<vk::Image>,
        fail: bool,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl FakePass {
        fn new(
            name: &'static str,
            reads: &[u64],
            writes: &[u64],
            log: &Rc<RefCell<Vec<String>>>,
        ) -> Self {
            Self {
                name,
                reads: reads.iter().map(|&raw| vk::Image::from_raw(raw)).collect(),
                writes: writes.iter().map(|&raw| vk::Image::from_raw(raw)).collect(),
                fail: false,
                log: log.clone(),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl RenderPass for FakePass {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&mut self) -> Result<()> {
            self.log.borrow_mut().push(format!("init {}", self.name));
            if self.fail {
                Err(RenderError::PassNotInitialized(self.name.to_string()))
            } else {
                Ok(())
            }
        }

        fn shutdown(&mut self) {
            self.log.borrow_mut().push(format!("shutdown {}", self.name));
        }

        fn draw(&mut self, _frame: &Frame) -> Result<vk::CommandBuffer> {
            Ok(vk::CommandBuffer::from_raw(self.writes[0].as_raw()))
        }

        fn reads(&self) -> &[vk::Image] {
            &self.reads
        }

        fn writes(&self) -> &[vk::Image] {
            &self.writes
        }
    }

    fn names(recorded: &[(String, vk::CommandBuffer)]) -> Vec<&str> {
        recorded.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn test_writers_recorded_before_readers() {
        let log = Rc::default();
        let mut scheduler = PassScheduler::new();
        scheduler.add_pass(FakePass::new("blur", &[2, 3], &[4], &log));
        scheduler.add_pass(FakePass::new("ssao", &[1], &[2], &log));
        scheduler.add_pass(FakePass::new("other", &[9], &[10], &log));
        scheduler.initialize_all().unwrap();

        let recorded = scheduler.record(&Frame::new(0, 0)).unwrap();
        assert_eq!(names(&recorded), vec!["ssao", "blur", "other"]);
    }

    #[test]
    fn test_failed_pass_disables_dependents() {
        let log = Rc::default();
        let mut scheduler = PassScheduler::new();
        let ssao = scheduler.add_pass(FakePass::new("ssao", &[1], &[2], &log).failing());
        let blur = scheduler.add_pass(FakePass::new("blur", &[2], &[3], &log));
        let composite = scheduler.add_pass(FakePass::new("composite", &[3], &[4], &log));
        let other = scheduler.add_pass(FakePass::new("other", &[1], &[5], &log));

        let result = scheduler.initialize_all();
        assert!(matches!(result, Err(RenderError::PassNotInitialized(name)) if name == "ssao"));
        assert!(!scheduler.is_enabled(ssao));
        assert!(!scheduler.is_enabled(blur));
        assert!(!scheduler.is_enabled(composite));
        assert!(scheduler.is_enabled(other));

        let recorded = scheduler.record(&Frame::new(0, 0)).unwrap();
        assert_eq!(names(&recorded), vec!["other"]);
        assert!(log.borrow().contains(&"shutdown blur".to_string()));
    }

    #[test]
    fn test_cycle_is_reported() {
        let log = Rc::default();
        let mut scheduler = PassScheduler::new();
        scheduler.add_pass(FakePass::new("a", &[2], &[1], &log));
        scheduler.add_pass(FakePass::new("b", &[1], &[2], &log));
        scheduler.initialize_all().unwrap();

        assert!(matches!(
            scheduler.record(&Frame::new(0, 0)),
            Err(RenderError::DependencyCycle)
        ));
    }

    #[test]
    fn test_shutdown_in_reverse_order() {
        let log: Rc<RefCell<Vec<String>>> = Rc::default();
        let mut scheduler = PassScheduler::new();
        scheduler.add_pass(FakePass::new("first", &[], &[1], &log));
        scheduler.add_pass(FakePass::new("second", &[1], &[2], &log));
        scheduler.shutdown_all();

        assert_eq!(
            *log.borrow(),
            vec!["shutdown second".to_string(), "shutdown first".to_string()]
        );
    }
}
