//! Property-based tests for the launcher lifecycle
//!
//! Random interleavings of start, per-handle stop, and stop-all must keep
//! the launcher's bookkeeping consistent with a simple reference model:
//! - the tracked address set matches the model exactly
//! - each backend is started exactly once and stopped at most once
//! - stop-all reports one error per already-stopped instance it visits,
//!   and always leaves the launcher empty
use async_trait::async_trait;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use stagehand::{
    BackingService, Error, Launcher, ServiceRegistry, ServiceType, StopHandle,
};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const STUB: ServiceType = ServiceType::new("stub");

/// Counter so every stub instance reports a distinct address without
/// touching the network.
static NEXT_ADDR: AtomicUsize = AtomicUsize::new(0);

struct StubService {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl BackingService for StubService {
    async fn start(&mut self) -> stagehand::Result<String> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("stub:{}", NEXT_ADDR.fetch_add(1, Ordering::SeqCst)))
    }

    async fn stop(&mut self) -> stagehand::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
enum Operation {
    /// Start a fresh instance.
    Start,
    /// Stop through the handle at (index modulo handle count).
    Stop(usize),
    /// Tear down everything tracked.
    StopAll,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => Just(Operation::Start),
        2 => (0usize..16).prop_map(Operation::Stop),
        1 => Just(Operation::StopAll),
    ]
}

/// Reference model: which handles exist, which of them already stopped, and
/// which handle indices the launcher still tracks.
#[derive(Default)]
struct Model {
    stopped: Vec<bool>,
    tracked: Vec<usize>,
    backend_stops: usize,
}

async fn apply_operation(
    launcher: &Launcher,
    handles: &mut Vec<StopHandle>,
    model: &mut Model,
    op: &Operation,
) {
    match op {
        Operation::Start => {
            let (_, handle) = launcher.start(STUB, &[]).await.unwrap();
            handles.push(handle);
            model.stopped.push(false);
            model.tracked.push(handles.len() - 1);
        }
        Operation::Stop(raw) => {
            if handles.is_empty() {
                return;
            }
            let idx = raw % handles.len();
            let result = handles[idx].stop().await;
            if model.stopped[idx] {
                assert!(
                    matches!(result, Err(Error::InvalidState { .. })),
                    "repeated stop must be rejected"
                );
            } else {
                result.unwrap();
                model.stopped[idx] = true;
                model.backend_stops += 1;
            }
        }
        Operation::StopAll => {
            let already_stopped = model
                .tracked
                .iter()
                .filter(|&&idx| model.stopped[idx])
                .count();
            let result = launcher.stop_all().await;
            match (already_stopped, result) {
                (0, Ok(())) => {}
                (1, Err(Error::InvalidState { .. })) => {}
                (n, Err(Error::Multiple(errors))) => assert_eq!(errors.len(), n),
                (n, other) => panic!("stop_all with {n} dead instances returned {other:?}"),
            }
            for &idx in &model.tracked {
                if !model.stopped[idx] {
                    model.stopped[idx] = true;
                    model.backend_stops += 1;
                }
            }
            model.tracked.clear();
        }
    }
}

proptest! {
    #[test]
    fn launcher_bookkeeping_matches_model(
        ops in prop::collection::vec(operation_strategy(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let starts = Arc::new(AtomicUsize::new(0));
            let stops = Arc::new(AtomicUsize::new(0));
            let registry = ServiceRegistry::new();
            let (s, t) = (Arc::clone(&starts), Arc::clone(&stops));
            registry.register(STUB, move || {
                Box::new(StubService {
                    starts: Arc::clone(&s),
                    stops: Arc::clone(&t),
                })
            });

            let launcher = Launcher::new(Arc::new(registry));
            let mut handles = Vec::new();
            let mut model = Model::default();

            for op in &ops {
                apply_operation(&launcher, &mut handles, &mut model, op).await;
                prop_assert_eq!(
                    launcher.addresses().await.len(),
                    model.tracked.len(),
                    "tracked address count diverged from the model"
                );
            }

            // Every instance started exactly once; backend stops match the
            // transitions the model accepted.
            prop_assert_eq!(starts.load(Ordering::SeqCst), handles.len());
            prop_assert_eq!(stops.load(Ordering::SeqCst), model.backend_stops);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
